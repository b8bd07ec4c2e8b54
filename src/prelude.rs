pub use crate::error::{Dims, Error};
pub use crate::graph::loss::{cross_entropy, masked_cross_entropy, masked_sum, softmax, softmax_transpose};
pub use crate::graph::{BackwardClosure, Graph, Tape};
pub use crate::matrix::Matrix;
pub use crate::memory::{Buffer, Device, MemoryPool, PoolConfig};
pub use crate::real::Real;
