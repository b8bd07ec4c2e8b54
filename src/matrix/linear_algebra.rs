//! Matrix products on row-major buffers, on top of `Real::gemm`.
//!
//! With the `blas` feature, `Real::gemm` is served by `dgemm` and `sgemm`
//! from cblas; otherwise a rayon kernel is used.

use super::Dims;
use crate::real::Real;

/// `out = a * b`, overwriting `out` whatever it held.
pub fn matmul_into<R: Real>(out: &mut [R], a: &[R], a_dims: Dims, b: &[R], b_dims: Dims) {
    let Dims(m, k) = a_dims;
    let Dims(_, n) = b_dims;
    R::gemm(false, false, m, n, k, a, b, R::ZERO, out);
}

/// `out += a * b`
pub fn accumulate_matmul<R: Real>(out: &mut [R], a: &[R], a_dims: Dims, b: &[R], b_dims: Dims) {
    let Dims(m, k) = a_dims;
    let Dims(_, n) = b_dims;
    R::gemm(false, false, m, n, k, a, b, R::ONE, out);
}

/// `dst += g * b^T`, the gradient of `a` in `out = a * b` where `g` is
/// the gradient of `out`.
pub fn accumulate_matmul_nt<R: Real>(dst: &mut [R], g: &[R], b: &[R], a_dims: Dims, b_dims: Dims) {
    let Dims(m, k) = a_dims;
    let Dims(_, n) = b_dims;
    R::gemm(false, true, m, k, n, g, b, R::ONE, dst);
}

/// `dst += a^T * g`, the gradient of `b` in `out = a * b` where `g` is
/// the gradient of `out`.
pub fn accumulate_matmul_tn<R: Real>(dst: &mut [R], a: &[R], g: &[R], a_dims: Dims, b_dims: Dims) {
    let Dims(m, k) = a_dims;
    let Dims(_, n) = b_dims;
    R::gemm(true, false, k, n, m, a, g, R::ONE, dst);
}
