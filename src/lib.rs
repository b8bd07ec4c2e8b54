//! `gradtape` is a reverse-mode automatic differentiation library over
//! dense two-dimensional matrices.
//!
//! Operations called on a `Graph` compute their result right away and
//! record a backward closure on the graph's tape. Once the caller has
//! seeded the gradient of its objective, `Graph::backward` replays the
//! tape in reverse and accumulates gradients into every matrix involved.
//! Matrix buffers are drawn from, and returned to, a `MemoryPool` shared
//! between threads.
//!
//! ```
//! use gradtape::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(MemoryPool::new());
//! let graph = Graph::new(&pool);
//! let w = Matrix::from_vec(&pool, 1, 2, vec![0.5, -0.5]).unwrap();
//! let x = Matrix::from_vec(&pool, 2, 1, vec![2.0, 1.0]).unwrap();
//!
//! let y = graph.tanh(&graph.mul(&w, &x).unwrap());
//! y.fill_grad(1.0);
//! graph.backward();
//! assert!(w.grad(0, 0) > 0.0);
//! ```

#[cfg(feature = "blas")]
extern crate openblas_src;


pub mod error;
pub mod graph;
pub mod matrix;
pub mod memory;
pub mod prelude;
pub mod real;
