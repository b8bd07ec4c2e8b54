//! `core_ops` contains the dense kernels operating on the row-major
//! buffers of matrices. There are two families of kernels: writing
//! kernels, which overwrite their destination and are used by forward
//! passes, and accumulating kernels, which add into their destination and
//! are used by backward closures.
//!
//! Kernels work on plain slices so that a caller may borrow the weights
//! and the gradient of the same matrix at once. They iterate in parallel
//! with rayon, row by row when the layout matters. Slices passed together
//! must have matching lengths; this is checked by the operation library
//! before any kernel runs.

use crate::real::Real;
use rayon::prelude::*;

/// `out[i] = f(x[i])`
pub fn map_into<R, F>(out: &mut [R], x: &[R], f: F)
where
    R: Real,
    F: Fn(R) -> R + Sync + Send,
{
    out.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(out, &x)| *out = f(x));
}

/// `out[i] = f(a[i], b[i])`
pub fn zip_map_into<R, F>(out: &mut [R], a: &[R], b: &[R], f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(out, (&a, &b))| *out = f(a, b));
}

/// `dst[i] += src[i]`
pub fn accumulate<R: Real>(dst: &mut [R], src: &[R]) {
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(dst, &src)| *dst += src);
}

/// `dst[i] += alpha * src[i]`
pub fn accumulate_scaled<R: Real>(dst: &mut [R], src: &[R], alpha: R) {
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(dst, &src)| *dst += alpha * src);
}

/// `dst[i] += f(a[i], b[i])`
pub fn accumulate_zip<R, F>(dst: &mut [R], a: &[R], b: &[R], f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    dst.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(dst, (&a, &b))| *dst += f(a, b));
}

/// `dst[i] += value`
pub fn add_scalar<R: Real>(dst: &mut [R], value: R) {
    dst.par_iter_mut().for_each(|dst| *dst += value);
}

/// `dst[i, j] += col[i]` where `dst` has `d` columns.
pub fn add_col_vector<R: Real>(dst: &mut [R], col: &[R], d: usize) {
    if d == 0 {
        return;
    }
    dst.par_chunks_mut(d)
        .zip(col.par_iter())
        .for_each(|(dst, &c)| {
            for dst in dst.iter_mut() {
                *dst += c;
            }
        });
}

/// `out[i, j] = f(a[i, j], row[j])` where `a` has `d` columns and `row` holds `d` values.
pub fn broadcast_rows_into<R, F>(out: &mut [R], a: &[R], row: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    out.par_chunks_mut(d)
        .zip(a.par_chunks(d))
        .for_each(|(out, a)| {
            for ((out, &a), &r) in out.iter_mut().zip(a).zip(row) {
                *out = f(a, r);
            }
        });
}

/// `out[i, j] = f(a[i, j], col[i])` where `a` has `d` columns and `col` holds one value per row.
pub fn broadcast_cols_into<R, F>(out: &mut [R], a: &[R], col: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    out.par_chunks_mut(d)
        .zip(a.par_chunks(d))
        .zip(col.par_iter())
        .for_each(|((out, a), &c)| {
            for (out, &a) in out.iter_mut().zip(a) {
                *out = f(a, c);
            }
        });
}

/// `dst[i, j] += f(g[i, j], row[j])`
pub fn accumulate_broadcast_rows<R, F>(dst: &mut [R], g: &[R], row: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    dst.par_chunks_mut(d)
        .zip(g.par_chunks(d))
        .for_each(|(dst, g)| {
            for ((dst, &g), &r) in dst.iter_mut().zip(g).zip(row) {
                *dst += f(g, r);
            }
        });
}

/// `dst[i, j] += f(g[i, j], col[i])`
pub fn accumulate_broadcast_cols<R, F>(dst: &mut [R], g: &[R], col: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    dst.par_chunks_mut(d)
        .zip(g.par_chunks(d))
        .zip(col.par_iter())
        .for_each(|((dst, g), &c)| {
            for (dst, &g) in dst.iter_mut().zip(g) {
                *dst += f(g, c);
            }
        });
}

/// `dst[i] += sum_j f(a[i, j], b[i, j])`, one entry of `dst` per row.
pub fn accumulate_row_sums<R, F>(dst: &mut [R], a: &[R], b: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    dst.par_iter_mut()
        .zip(a.par_chunks(d).zip(b.par_chunks(d)))
        .for_each(|(dst, (a, b))| {
            *dst += a.iter().zip(b).map(|(&a, &b)| f(a, b)).sum::<R>();
        });
}

/// `dst[j] += sum_i f(a[i, j], b[i, j])`, one entry of `dst` per column.
pub fn accumulate_col_sums<R, F>(dst: &mut [R], a: &[R], b: &[R], d: usize, f: F)
where
    R: Real,
    F: Fn(R, R) -> R + Sync + Send,
{
    if d == 0 {
        return;
    }
    dst.par_iter_mut().enumerate().for_each(|(j, dst)| {
        *dst += a
            .iter()
            .skip(j)
            .step_by(d)
            .zip(b.iter().skip(j).step_by(d))
            .map(|(&a, &b)| f(a, b))
            .sum::<R>();
    });
}

/// Writes the transpose of the `n x d` matrix `src` into `dst` (`d x n`).
pub fn transpose_into<R: Real>(dst: &mut [R], src: &[R], n: usize, d: usize) {
    if n == 0 {
        return;
    }
    dst.par_chunks_mut(n).enumerate().for_each(|(j, row)| {
        for (i, out) in row.iter_mut().enumerate() {
            *out = src[i * d + j];
        }
    });
}

/// Adds the transpose of the `n x d` matrix `src` into `dst` (`d x n`).
pub fn accumulate_transposed<R: Real>(dst: &mut [R], src: &[R], n: usize, d: usize) {
    if n == 0 {
        return;
    }
    dst.par_chunks_mut(n).enumerate().for_each(|(j, row)| {
        for (i, out) in row.iter_mut().enumerate() {
            *out += src[i * d + j];
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    // [[1, 2, 3], [4, 5, 6]]
    const A: [f64; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    #[test]
    fn elementwise() {
        let mut out = [0.0; 6];
        map_into(&mut out, &A, |x| x * 2.0);
        assert_eq!(out, [2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);

        zip_map_into(&mut out, &A, &A, |a, b| a - b);
        assert_eq!(out, [0.0; 6]);

        accumulate(&mut out, &A);
        accumulate_scaled(&mut out, &A, -0.5);
        accumulate_zip(&mut out, &A, &A, |a, b| a * b);
        add_scalar(&mut out, 1.0);
        assert_eq!(out, [2.5, 6.0, 11.5, 19.0, 28.5, 40.0]);
    }

    #[test]
    fn broadcasting() {
        let mut out = [0.0; 6];
        broadcast_rows_into(&mut out, &A, &[10.0, 20.0, 30.0], 3, |a, r| a + r);
        assert_eq!(out, [11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);

        broadcast_cols_into(&mut out, &A, &[1.0, -1.0], 3, |a, c| a * c);
        assert_eq!(out, [1.0, 2.0, 3.0, -4.0, -5.0, -6.0]);

        let mut dst = [0.0; 6];
        accumulate_broadcast_rows(&mut dst, &A, &[1.0, 0.0, 2.0], 3, |g, r| g * r);
        accumulate_broadcast_cols(&mut dst, &A, &[0.0, 1.0], 3, |g, c| g * c);
        assert_eq!(dst, [1.0, 0.0, 6.0, 8.0, 5.0, 18.0]);

        add_col_vector(&mut dst, &[-1.0, 1.0], 3);
        assert_eq!(dst, [0.0, -1.0, 5.0, 9.0, 6.0, 19.0]);
    }

    #[test]
    fn reductions() {
        let ones = [1.0; 6];

        let mut rows = [0.5, 0.5];
        accumulate_row_sums(&mut rows, &A, &ones, 3, |a, b| a * b);
        assert_eq!(rows, [6.5, 15.5]);

        let mut cols = [0.0; 3];
        accumulate_col_sums(&mut cols, &A, &ones, 3, |a, b| a * b);
        assert_eq!(cols, [5.0, 7.0, 9.0]);
    }

    #[test]
    fn transposition() {
        let mut t = [0.0; 6];
        transpose_into(&mut t, &A, 2, 3);
        assert_eq!(t, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        accumulate_transposed(&mut t, &A, 2, 3);
        assert_eq!(t, [2.0, 8.0, 4.0, 10.0, 6.0, 12.0]);
    }
}
