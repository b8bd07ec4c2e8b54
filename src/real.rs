//! `real` defines the `Real` trait, the scalar type stored in matrices.
//!
//! It gathers the algebraic identities, the transcendental maps used by
//! the operation library and the general matrix multiply (GEMM) kernel.
//! It is implemented for `f32` and `f64` thanks to the `expand_impl`
//! procedural macro from the `gradtape_macros` crate, which also routes
//! GEMM to `sgemm` or `dgemm` when the `blas` feature is enabled.

use gradtape_macros::expand_impl;
use rayon::prelude::*;
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::*;

#[cfg(feature = "blas")]
use cblas::{dgemm, sgemm, Layout, Transpose};

pub trait Real:
    Copy
    + Send
    + Sync
    + Default
    + Debug
    + Display
    + PartialOrd
    + Sum
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + 'static
{
    const ZERO: Self;
    const ONE: Self;

    fn from_f64(value: f64) -> Self;
    fn from_usize(value: usize) -> Self;
    fn to_f64(self) -> f64;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn tanh(self) -> Self;
    fn max(self, other: Self) -> Self;
    fn is_nan(self) -> bool;

    #[inline]
    fn sigmoid(self) -> Self {
        Self::ONE / (Self::ONE + (-self).exp())
    }

    #[inline]
    fn relu(self) -> Self {
        if self > Self::ZERO {
            self
        } else {
            Self::ZERO
        }
    }

    #[inline]
    fn square(self) -> Self {
        self * self
    }

    /// Computes `c = op(a) * op(b) + beta * c` on row-major buffers where
    /// `op(a)` is `m x k`, `op(b)` is `k x n` and `c` is `m x n`.
    /// `op` transposes its operand when the matching flag is set.
    ///
    /// When `beta` is zero, `c` is never read, so it may hold stale values.
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        a: &[Self],
        b: &[Self],
        beta: Self,
        c: &mut [Self],
    ) {
        if m == 0 || n == 0 {
            return;
        }

        c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, out) in row.iter_mut().enumerate() {
                let mut acc = Self::ZERO;
                for p in 0..k {
                    let lhs = if trans_a { a[p * m + i] } else { a[i * k + p] };
                    let rhs = if trans_b { b[j * k + p] } else { b[p * n + j] };
                    acc += lhs * rhs;
                }
                *out = if beta == Self::ZERO {
                    acc
                } else {
                    acc + beta * *out
                };
            }
        });
    }
}

#[cfg(feature = "blas")]
fn transpose(flag: bool) -> Transpose {
    if flag {
        Transpose::Ordinary
    } else {
        Transpose::None
    }
}

#[expand_impl(
    dgemm<T=f64>,
    sgemm<T=f32>,
)]
impl<T> Real for T {
    const ZERO: T = 0.0;
    const ONE: T = 1.0;

    #[inline]
    fn from_f64(value: f64) -> T {
        value as T
    }

    #[inline]
    fn from_usize(value: usize) -> T {
        value as T
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn exp(self) -> T {
        self.exp()
    }

    #[inline]
    fn ln(self) -> T {
        self.ln()
    }

    #[inline]
    fn tanh(self) -> T {
        self.tanh()
    }

    #[inline]
    fn max(self, other: T) -> T {
        self.max(other)
    }

    #[inline]
    fn is_nan(self) -> bool {
        self.is_nan()
    }

    #[cfg(feature = "blas")]
    fn gemm(
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        a: &[T],
        b: &[T],
        beta: T,
        c: &mut [T],
    ) {
        if m == 0 || n == 0 {
            return;
        }
        let lda = if trans_a { m } else { k };
        let ldb = if trans_b { k } else { n };

        unsafe {
            placeholder(
                Layout::RowMajor,
                transpose(trans_a),
                transpose(trans_b),
                m as i32,
                n as i32,
                k as i32,
                1.0,
                a,
                lda.max(1) as i32,
                b,
                ldb.max(1) as i32,
                beta,
                c,
                n as i32,
            );
        }
    }
}
