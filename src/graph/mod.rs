//! `graph` records computations on matrices for reverse-mode
//! differentiation.
//!
//! A `Graph` is built for one forward pass, typically one training example
//! or minibatch segment, and dropped afterwards. Every operation method
//! computes its forward value immediately and, when the graph needs
//! backpropagation, pushes a closure onto the graph's `Tape`. Once the
//! caller has seeded the gradient of the objective with
//! `Matrix::fill_grad`, `Graph::backward` replays the tape in reverse
//! insertion order. Because an operation can only consume matrices that
//! already exist, reverse insertion order is always a valid
//! reverse-topological order, and by the time a closure runs, every
//! consumer of its output has finished accumulating into the output
//! gradient.
//!
//! Operations are grouped as follows:
//! - `elementwise`: sums, differences and products, with their broadcast
//!   forms, and the unary nonlinearities,
//! - `linear_algebra`: matrix products, optionally fused with a bias,
//! - `reduction`: sums and means down to a scalar,
//! - `reshaping`: transposition, plucks, slices, stacks and broadcasts,
//! - `loss`: the softmax family, applied directly to matrices.
//!
//! Graphs and matrices are reference counted with `Rc` and are therefore
//! confined to the thread that created them. Independent graphs may run
//! on different threads as long as they share nothing but their
//! `Arc<MemoryPool>`.

pub mod elementwise;
pub mod linear_algebra;
pub mod loss;
pub mod reduction;
pub mod reshaping;
pub mod tape;

pub use tape::{BackwardClosure, Tape};

use crate::matrix::Matrix;
use crate::memory::MemoryPool;
use crate::real::Real;
use log::debug;
use std::cell::RefCell;
use std::sync::Arc;

pub struct Graph<R: Real> {
    pool: Arc<MemoryPool<R>>,
    tape: RefCell<Tape>,
    needs_backprop: bool,
}

impl<R: Real> Graph<R> {
    /// Graph recording backward closures, for training.
    pub fn new(pool: &Arc<MemoryPool<R>>) -> Self {
        Self::with_backprop(pool, true)
    }

    /// Graph computing forward values only, for inference.
    pub fn without_backprop(pool: &Arc<MemoryPool<R>>) -> Self {
        Self::with_backprop(pool, false)
    }

    pub fn with_backprop(pool: &Arc<MemoryPool<R>>, needs_backprop: bool) -> Self {
        debug!("new graph (backprop: {})", needs_backprop);
        Graph {
            pool: Arc::clone(pool),
            tape: RefCell::new(Tape::new()),
            needs_backprop,
        }
    }

    #[inline]
    pub fn needs_backprop(&self) -> bool {
        self.needs_backprop
    }

    /// Number of closures waiting on the tape.
    pub fn tape_len(&self) -> usize {
        self.tape.borrow().len()
    }

    pub fn pool(&self) -> &Arc<MemoryPool<R>> {
        &self.pool
    }

    /// Runs the recorded closures in reverse order, then empties the tape.
    ///
    /// Calling it again without recording new operations does nothing.
    pub fn backward(&self) {
        let mut tape = std::mem::take(&mut *self.tape.borrow_mut());
        tape.backward();
    }

    /// Drops the recorded closures without running them, releasing the
    /// matrices they hold.
    pub fn clear(&self) {
        self.tape.borrow_mut().clear();
    }

    /// Matrix allocated from the graph's pool. Weights are stale and must be
    /// fully overwritten; the gradient is zeroed.
    pub(crate) fn output(&self, n: usize, d: usize) -> Matrix<R> {
        Matrix::create(&self.pool, n, d, false)
    }

    pub(crate) fn record<F>(&self, closure: F)
    where
        F: FnOnce() + 'static,
    {
        self.tape.borrow_mut().push(Box::new(closure));
    }
}

impl<R: Real> Drop for Graph<R> {
    fn drop(&mut self) {
        let pending = self.tape.get_mut().len();
        if pending > 0 {
            debug!("dropping graph with {} unreplayed closures", pending);
        }
    }
}
