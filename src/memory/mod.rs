//! `memory` recycles the numeric buffers behind matrices.
//!
//! Reverse-mode training creates and drops a large number of same-sized
//! matrices at every step. Instead of going through the system allocator
//! each time, buffers are deposited into a `MemoryPool` when their last
//! owner drops them and handed out again to the next request of the same
//! element count. The pool is an explicit object shared through an `Arc`,
//! so each test or each training job may own an isolated one.

pub mod buffer;
pub mod pool;

pub use buffer::Buffer;
pub use pool::{Device, MemoryPool, PoolConfig};
