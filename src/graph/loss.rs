//! The softmax family of loss functions.
//!
//! Unlike the rest of the operation library, these functions do not go
//! through a tape: they compute the cost and write the gradient of the
//! logits in the same call, then return the cost. The cross-entropy
//! functions **overwrite** the gradient columns they touch with
//! `probs - one_hot(target)` instead of accumulating into them, so the
//! logits passed to them must not receive gradient from any other branch
//! of the computation. `masked_sum` accumulates like every other operation.
//!
//! Softmax normalizes each column: every column of the logits holds the
//! scores of one stream, and every row one class.

use crate::error::{ensure_index, Dims, Error, Result};
use crate::matrix::Matrix;
use crate::memory::Buffer;
use crate::real::Real;
use rayon::prelude::*;

/// Softmax of every column of the row-major `src`, shifted by the
/// column's maximum before exponentiation.
fn softmax_columns_into<R: Real>(out: &mut [R], src: &[R], d: usize) {
    if d == 0 || src.is_empty() {
        return;
    }
    let max: Vec<R> = (0..d)
        .into_par_iter()
        .map(|j| src.iter().skip(j).step_by(d).copied().fold(src[j], R::max))
        .collect();
    let total: Vec<R> = (0..d)
        .into_par_iter()
        .map(|j| {
            src.iter()
                .skip(j)
                .step_by(d)
                .map(|&x| (x - max[j]).exp())
                .sum::<R>()
        })
        .collect();
    out.par_chunks_mut(d)
        .zip(src.par_chunks(d))
        .for_each(|(out, src)| {
            for j in 0..d {
                out[j] = (src[j] - max[j]).exp() / total[j];
            }
        });
}

fn softmax_rows_into<R: Real>(out: &mut [R], src: &[R], d: usize) {
    if d == 0 {
        return;
    }
    out.par_chunks_mut(d)
        .zip(src.par_chunks(d))
        .for_each(|(out, src)| {
            let max = src.iter().copied().fold(src[0], R::max);
            let mut total = R::ZERO;
            for (out, &x) in out.iter_mut().zip(src) {
                *out = (x - max).exp();
                total += *out;
            }
            for out in out.iter_mut() {
                *out = *out / total;
            }
        });
}

/// Column-wise softmax.
pub fn softmax<R: Real>(x: &Matrix<R>) -> Matrix<R> {
    let out = Matrix::create(&x.pool(), x.n(), x.d(), false);
    softmax_columns_into(&mut out.w_mut(), &x.w(), x.d());
    out
}

/// Row-wise softmax, the variant for logits laid out one stream per row.
pub fn softmax_transpose<R: Real>(x: &Matrix<R>) -> Matrix<R> {
    let out = Matrix::create(&x.pool(), x.n(), x.d(), false);
    softmax_rows_into(&mut out.w_mut(), &x.w(), x.d());
    out
}

/// Column-wise softmax of `logprobs` in a pooled buffer, without the
/// gradient a `Matrix` would carry.
fn probabilities<R: Real>(logprobs: &Matrix<R>) -> Buffer<R> {
    let mut probs = Buffer::empty(&logprobs.pool(), logprobs.num_elements());
    softmax_columns_into(&mut probs, &logprobs.w(), logprobs.d());
    probs
}

fn ensure_per_column(op: &'static str, logits: Dims, len: usize) -> Result<()> {
    if len != logits.1 {
        return Err(Error::ShapeMismatch {
            op,
            lhs: logits,
            rhs: Dims(1, len),
        });
    }
    Ok(())
}

/// Columns `k` for which `loss_start[k] <= t < loss_start[k] + codelens[k]`.
fn active_columns(t: usize, loss_start: &[usize], codelens: &[usize]) -> Vec<usize> {
    loss_start
        .iter()
        .zip(codelens)
        .enumerate()
        .filter(|(_, (&start, &len))| t >= start && t - start < len)
        .map(|(k, _)| k)
        .collect()
}

/// Writes `probs - one_hot(target)` into column `k` of `dw` and returns the
/// cost of that column.
fn cross_entropy_column<R: Real>(dw: &mut [R], probs: &[R], n: usize, d: usize, k: usize, target: usize) -> R {
    for i in 0..n {
        dw[i * d + k] = probs[i * d + k];
    }
    dw[target * d + k] -= R::ONE;
    -probs[target * d + k].ln()
}

/// Cross entropy between `softmax(logprobs)` and one target row per column.
///
/// The whole gradient of `logprobs` is overwritten.
pub fn cross_entropy<R: Real>(logprobs: &Matrix<R>, targets: &[usize]) -> Result<R> {
    ensure_per_column("cross_entropy", logprobs.dims(), targets.len())?;
    for &target in targets {
        ensure_index("cross_entropy", target, logprobs.n())?;
    }

    let (n, d) = (logprobs.n(), logprobs.d());
    let probs = probabilities(logprobs);
    let mut dw = logprobs.dw_mut();
    let mut cost = R::ZERO;
    for (k, &target) in targets.iter().enumerate() {
        cost += cross_entropy_column(&mut dw, &probs, n, d, k, target);
    }
    Ok(cost)
}

/// Cross entropy restricted to the columns whose window
/// `[loss_start[k], loss_start[k] + codelens[k])` contains the time step `t`.
///
/// Only the gradient columns of active streams are overwritten; the other
/// columns are left untouched, and their targets are not checked.
pub fn masked_cross_entropy<R: Real>(
    logprobs: &Matrix<R>,
    t: usize,
    loss_start: &[usize],
    codelens: &[usize],
    targets: &[usize],
) -> Result<R> {
    const OP: &str = "masked_cross_entropy";
    ensure_per_column(OP, logprobs.dims(), loss_start.len())?;
    ensure_per_column(OP, logprobs.dims(), codelens.len())?;
    ensure_per_column(OP, logprobs.dims(), targets.len())?;

    let active = active_columns(t, loss_start, codelens);
    for &k in &active {
        ensure_index(OP, targets[k], logprobs.n())?;
    }
    if active.is_empty() {
        return Ok(R::ZERO);
    }

    let (n, d) = (logprobs.n(), logprobs.d());
    let probs = probabilities(logprobs);
    let mut dw = logprobs.dw_mut();
    let mut cost = R::ZERO;
    for k in active {
        cost += cross_entropy_column(&mut dw, &probs, n, d, k, targets[k]);
    }
    Ok(cost)
}

/// `scale` times the sum of the active columns of `values`, under the same
/// windowing as `masked_cross_entropy`. Adds `scale` to the gradient of
/// every element of the active columns.
pub fn masked_sum<R: Real>(
    values: &Matrix<R>,
    t: usize,
    loss_start: &[usize],
    codelens: &[usize],
    scale: R,
) -> Result<R> {
    ensure_per_column("masked_sum", values.dims(), loss_start.len())?;
    ensure_per_column("masked_sum", values.dims(), codelens.len())?;

    let (n, d) = (values.n(), values.d());
    let w = values.w();
    let mut dw = values.dw_mut();
    let mut cost = R::ZERO;
    for k in active_columns(t, loss_start, codelens) {
        for i in 0..n {
            cost += scale * w[i * d + k];
            dw[i * d + k] += scale;
        }
    }
    Ok(cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPool;
    use std::sync::Arc;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn softmax_is_stable() {
        let pool = Arc::new(MemoryPool::new());
        let x = Matrix::from_vec(&pool, 3, 2, vec![1000.0, -5.0, 1001.0, 0.0, 999.0, 5.0]).unwrap();

        let probs = softmax(&x);
        assert!(!probs.contains_nan());
        for j in 0..2 {
            let total: f64 = (0..3).map(|i| probs.get(i, j)).sum();
            assert!(close(total, 1.0));
            assert!((0..3).all(|i| probs.get(i, j) >= 0.0));
        }
        assert!(probs.get(1, 0) > probs.get(0, 0));

        let rows = softmax_transpose(&x);
        for i in 0..3 {
            assert!(close(rows.get(i, 0) + rows.get(i, 1), 1.0));
        }
    }

    #[test]
    fn column_softmax_matches_row_softmax_of_transpose() {
        let pool = Arc::new(MemoryPool::new());
        let x = Matrix::from_fn(&pool, 3, 5, |i, j| (i as f64 - 1.0) * (j as f64 + 0.5));
        let xt = Matrix::from_fn(&pool, 5, 3, |i, j| x.get(j, i));

        let columns = softmax(&x);
        let rows = softmax_transpose(&xt);
        for i in 0..3 {
            for j in 0..5 {
                assert!(close(columns.get(i, j), rows.get(j, i)));
            }
        }
    }

    #[test]
    fn cross_entropy_reuses_its_probability_buffer() {
        let pool = Arc::new(MemoryPool::new());
        let logits = Matrix::from_vec(&pool, 2, 3, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();

        cross_entropy(&logits, &[0, 1, 0]).unwrap();
        assert_eq!(pool.cached(6), 1);
        let allocations = pool.num_allocations();

        cross_entropy(&logits, &[1, 1, 0]).unwrap();
        masked_cross_entropy(&logits, 0, &[0, 0, 0], &[1, 1, 1], &[1, 0, 1]).unwrap();
        assert_eq!(pool.num_allocations(), allocations);
    }

    #[test]
    fn windows_near_the_end_of_the_index_range() {
        let pool = Arc::new(MemoryPool::new());
        let values = Matrix::from_vec(&pool, 1, 2, vec![1.0, 2.0]).unwrap();

        let cost = masked_sum(&values, usize::MAX, &[usize::MAX, 0], &[2, usize::MAX], 1.0).unwrap();
        assert_eq!(cost, 1.0);
        assert_eq!(values.grad_to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn cross_entropy_gradient_is_probs_minus_one_hot() {
        let pool = Arc::new(MemoryPool::new());
        let logits = Matrix::from_vec(&pool, 3, 1, vec![1.0, 2.0, 3.0]).unwrap();
        logits.fill_grad(42.0);

        let cost = cross_entropy(&logits, &[1]).unwrap();

        let e: Vec<f64> = vec![1.0_f64.exp(), 2.0_f64.exp(), 3.0_f64.exp()];
        let total: f64 = e.iter().sum();
        let probs: Vec<f64> = e.iter().map(|e| e / total).collect();
        assert!(close(cost, -probs[1].ln()));

        let grad = logits.grad_to_vec();
        assert!(close(grad[0], probs[0]));
        assert!(close(grad[1], probs[1] - 1.0));
        assert!(close(grad[2], probs[2]));
    }

    #[test]
    fn cross_entropy_validates_targets() {
        let pool = Arc::new(MemoryPool::new());
        let logits = Matrix::zeros(&pool, 3, 2);
        logits.fill_grad(7.0);

        assert!(matches!(
            cross_entropy(&logits, &[0]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            cross_entropy(&logits, &[0, 3]),
            Err(Error::IndexOutOfRange { index: 3, bound: 3, .. })
        ));
        assert_eq!(logits.grad_to_vec(), vec![7.0; 6]);
    }

    #[test]
    fn masked_cross_entropy_windows() {
        let pool = Arc::new(MemoryPool::new());
        let logits = Matrix::from_vec(&pool, 2, 2, vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let loss_start = [0, 2];
        let codelens = [2, 2];
        let targets = [1, 0];
        let expected = -(1.0_f64.exp() / (1.0 + 1.0_f64.exp())).ln();

        // t = 1: only column 0
        logits.fill_grad(9.0);
        let cost = masked_cross_entropy(&logits, 1, &loss_start, &codelens, &targets).unwrap();
        assert!(close(cost, expected));
        let grad = logits.grad_to_vec();
        assert!(close(grad[0] + grad[2], 0.0));
        assert!(grad[2] < 0.0);
        assert_eq!((grad[1], grad[3]), (9.0, 9.0));

        // t = 3: only column 1
        logits.fill_grad(9.0);
        let cost = masked_cross_entropy(&logits, 3, &loss_start, &codelens, &targets).unwrap();
        assert!(close(cost, expected));
        let grad = logits.grad_to_vec();
        assert_eq!((grad[0], grad[2]), (9.0, 9.0));
        assert!(grad[1] < 0.0);

        // t = 5: nothing
        logits.fill_grad(9.0);
        let cost = masked_cross_entropy(&logits, 5, &loss_start, &codelens, &targets).unwrap();
        assert_eq!(cost, 0.0);
        assert_eq!(logits.grad_to_vec(), vec![9.0; 4]);
    }

    #[test]
    fn masked_sum_accumulates() {
        let pool = Arc::new(MemoryPool::new());
        let values = Matrix::from_vec(&pool, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        values.fill_grad(1.0);

        let cost = masked_sum(&values, 2, &[0, 2], &[2, 2], 0.5).unwrap();
        assert_eq!(cost, 3.0);
        assert_eq!(values.grad_to_vec(), vec![1.0, 1.5, 1.0, 1.5]);

        assert!(masked_sum(&values, 2, &[0], &[2, 2], 0.5).is_err());
    }
}
