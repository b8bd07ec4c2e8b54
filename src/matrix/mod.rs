//! `matrix` defines `Matrix`, the shared handle every operation consumes
//! and produces, along with the dense kernels operating on its buffers.
//!
//! A matrix owns two row-major buffers of identical shape: the weights `w`
//! and the gradient `dw`. Handles are reference counted: the operation
//! that produced a matrix, its backward closure, every downstream consumer
//! and their closures all hold clones of the same handle, and the buffers
//! only return to their memory pool once the last clone is dropped.
//!
//! Weights and gradient sit behind separate `RefCell`s. A backward closure
//! routinely reads the weights of an operand while accumulating into the
//! gradient of that very operand (`eltmul(a, a)` or `mul(a, a)`), which a
//! single cell would forbid.

pub mod core_ops;
pub mod linear_algebra;

pub use crate::error::Dims;

use crate::error::{Error, Result};
use crate::memory::{Buffer, MemoryPool};
use crate::real::Real;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

pub struct MatrixNode<R: Real> {
    n: usize,
    d: usize,
    w: RefCell<Buffer<R>>,
    dw: RefCell<Buffer<R>>,
}

pub struct Matrix<R: Real>(Rc<MatrixNode<R>>);

impl<R: Real> Clone for Matrix<R> {
    fn clone(&self) -> Self {
        Matrix(Rc::clone(&self.0))
    }
}

impl<R: Real> Matrix<R> {
    /// Creates an `n x d` matrix with a zeroed gradient. Weights are zeroed
    /// when `zero_fill` is set and left stale otherwise, in which case the
    /// caller must overwrite all of them.
    pub fn create(pool: &Arc<MemoryPool<R>>, n: usize, d: usize, zero_fill: bool) -> Self {
        let w = if zero_fill {
            Buffer::zeroed(pool, n * d)
        } else {
            Buffer::empty(pool, n * d)
        };
        Self::from_buffer(pool, n, d, w)
    }

    pub fn zeros(pool: &Arc<MemoryPool<R>>, n: usize, d: usize) -> Self {
        Self::create(pool, n, d, true)
    }

    /// Wraps row-major `data` of exactly `n * d` elements.
    pub fn from_vec(pool: &Arc<MemoryPool<R>>, n: usize, d: usize, data: Vec<R>) -> Result<Self> {
        if data.len() != n * d {
            return Err(Error::ShapeMismatch {
                op: "from_vec",
                lhs: Dims(n, d),
                rhs: Dims(data.len(), 1),
            });
        }
        Ok(Self::from_buffer(pool, n, d, Buffer::from_vec(pool, data)))
    }

    pub fn from_fn<F>(pool: &Arc<MemoryPool<R>>, n: usize, d: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> R,
    {
        let out = Self::create(pool, n, d, false);
        {
            let mut w = out.w_mut();
            for i in 0..n {
                for j in 0..d {
                    w[i * d + j] = f(i, j);
                }
            }
        }
        out
    }

    fn from_buffer(pool: &Arc<MemoryPool<R>>, n: usize, d: usize, w: Buffer<R>) -> Self {
        Matrix(Rc::new(MatrixNode {
            n,
            d,
            w: RefCell::new(w),
            dw: RefCell::new(Buffer::zeroed(pool, n * d)),
        }))
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.0.n
    }

    #[inline]
    pub fn d(&self) -> usize {
        self.0.d
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        Dims(self.0.n, self.0.d)
    }

    #[inline]
    pub fn num_elements(&self) -> usize {
        self.0.n * self.0.d
    }

    pub fn w(&self) -> Ref<'_, [R]> {
        Ref::map(self.0.w.borrow(), |buffer| &**buffer)
    }

    pub fn w_mut(&self) -> RefMut<'_, [R]> {
        RefMut::map(self.0.w.borrow_mut(), |buffer| &mut **buffer)
    }

    pub fn dw(&self) -> Ref<'_, [R]> {
        Ref::map(self.0.dw.borrow(), |buffer| &**buffer)
    }

    pub fn dw_mut(&self) -> RefMut<'_, [R]> {
        RefMut::map(self.0.dw.borrow_mut(), |buffer| &mut **buffer)
    }

    /// Weight at row `i`, column `j`. Panics when out of bounds.
    pub fn get(&self, i: usize, j: usize) -> R {
        assert!(i < self.n() && j < self.d(), "({}, {}) out of bounds for {}", i, j, self.dims());
        self.w()[i * self.d() + j]
    }

    /// Gradient at row `i`, column `j`. Panics when out of bounds.
    pub fn grad(&self, i: usize, j: usize) -> R {
        assert!(i < self.n() && j < self.d(), "({}, {}) out of bounds for {}", i, j, self.dims());
        self.dw()[i * self.d() + j]
    }

    pub fn to_vec(&self) -> Vec<R> {
        self.w().to_vec()
    }

    pub fn grad_to_vec(&self) -> Vec<R> {
        self.dw().to_vec()
    }

    /// Resets the gradient, typically between two optimizer steps.
    pub fn zero_grad(&self) {
        self.0.dw.borrow_mut().fill(R::ZERO);
    }

    /// Overwrites the gradient with `value`, e.g. `ONE` to seed the objective.
    pub fn fill_grad(&self, value: R) {
        self.0.dw.borrow_mut().fill(value);
    }

    pub fn pool(&self) -> Arc<MemoryPool<R>> {
        Arc::clone(self.0.w.borrow().pool())
    }

    pub fn contains_nan(&self) -> bool {
        self.w().iter().any(|x| x.is_nan())
    }

    /// True when both handles refer to the same matrix.
    pub fn ptr_eq(&self, other: &Matrix<R>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<R: Real> fmt::Debug for Matrix<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("n", &self.n())
            .field("d", &self.d())
            .field("w", &&*self.w())
            .finish()
    }
}

impl<R: Real> fmt::Display for Matrix<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Matrix{} [", self.dims())?;
        let w = self.w();
        for i in 0..self.n() {
            write!(f, "   ")?;
            for j in 0..self.d() {
                write!(f, " {:>8.4}", w[i * self.d() + j])?;
            }
            writeln!(f)?;
        }
        write!(f, "]")
    }
}
