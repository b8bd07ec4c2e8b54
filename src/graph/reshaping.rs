//! Operations moving elements around without arithmetic: transposition,
//! row and column plucks, row slices, stacks and vector broadcasts.
//!
//! Their backward closures route each element of the output gradient back
//! to the operand element it was copied from. When an element was copied
//! several times, as with repeated pluck indices or broadcasts, its
//! gradient contributions accumulate.

use super::Graph;
use crate::error::{ensure_index, Dims, Error, Result};
use crate::matrix::core_ops::*;
use crate::matrix::Matrix;
use crate::real::Real;

fn ensure_not_empty<R: Real>(op: &'static str, matrices: &[Matrix<R>]) -> Result<()> {
    if matrices.is_empty() {
        return Err(Error::UnsupportedConfiguration {
            op,
            why: "at least one matrix is required".to_string(),
        });
    }
    Ok(())
}

impl<R: Real> Graph<R> {
    pub fn transpose(&self, x: &Matrix<R>) -> Matrix<R> {
        let out = self.output(x.d(), x.n());
        transpose_into(&mut out.w_mut(), &x.w(), x.n(), x.d());

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                accumulate_transposed(&mut x.dw_mut(), &out.dw(), out.n(), out.d());
            });
        }
        out
    }

    /// Row `row` of `x`, as a `1 x d` matrix.
    pub fn row_pluck(&self, x: &Matrix<R>, row: usize) -> Result<Matrix<R>> {
        ensure_index("row_pluck", row, x.n())?;
        let d = x.d();

        let out = self.output(1, d);
        out.w_mut().copy_from_slice(&x.w()[row * d..(row + 1) * d]);

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                accumulate(&mut x.dw_mut()[row * d..(row + 1) * d], &out.dw());
            });
        }
        Ok(out)
    }

    /// Gathers the rows listed in `indices`, in order, into a
    /// `indices.len() x d` matrix. Indices may repeat.
    pub fn rows_pluck(&self, x: &Matrix<R>, indices: &[usize]) -> Result<Matrix<R>> {
        for &index in indices {
            ensure_index("rows_pluck", index, x.n())?;
        }
        let d = x.d();

        let out = self.output(indices.len(), d);
        {
            let mut w = out.w_mut();
            let src = x.w();
            for (k, &index) in indices.iter().enumerate() {
                w[k * d..(k + 1) * d].copy_from_slice(&src[index * d..(index + 1) * d]);
            }
        }

        if self.needs_backprop {
            let x = x.clone();
            let indices = indices.to_vec();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let mut dw = x.dw_mut();
                for (k, &index) in indices.iter().enumerate() {
                    accumulate(&mut dw[index * d..(index + 1) * d], &g[k * d..(k + 1) * d]);
                }
            });
        }
        Ok(out)
    }

    /// Column `col` of `x`, as an `n x 1` matrix.
    pub fn col_pluck(&self, x: &Matrix<R>, col: usize) -> Result<Matrix<R>> {
        ensure_index("col_pluck", col, x.d())?;
        let d = x.d();

        let out = self.output(x.n(), 1);
        {
            let mut w = out.w_mut();
            let src = x.w();
            for (i, out) in w.iter_mut().enumerate() {
                *out = src[i * d + col];
            }
        }

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let mut dw = x.dw_mut();
                for (i, &g) in g.iter().enumerate() {
                    dw[i * d + col] += g;
                }
            });
        }
        Ok(out)
    }

    /// Rows `start..end` of `x`, copied into a new matrix.
    pub fn slice(&self, x: &Matrix<R>, start: usize, end: usize) -> Result<Matrix<R>> {
        ensure_index("slice", end, x.n() + 1)?;
        ensure_index("slice", start, end + 1)?;
        let d = x.d();

        let out = self.output(end - start, d);
        out.w_mut().copy_from_slice(&x.w()[start * d..end * d]);

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                accumulate(&mut x.dw_mut()[start * d..end * d], &out.dw());
            });
        }
        Ok(out)
    }

    /// Concatenates matrices with the same number of rows side by side.
    pub fn hstack(&self, matrices: &[Matrix<R>]) -> Result<Matrix<R>> {
        ensure_not_empty("hstack", matrices)?;
        let n = matrices[0].n();
        for matrix in matrices {
            if matrix.n() != n {
                return Err(Error::ShapeMismatch {
                    op: "hstack",
                    lhs: matrices[0].dims(),
                    rhs: matrix.dims(),
                });
            }
        }
        let d: usize = matrices.iter().map(Matrix::d).sum();

        let out = self.output(n, d);
        {
            let mut w = out.w_mut();
            let mut offset = 0;
            for matrix in matrices {
                let width = matrix.d();
                let src = matrix.w();
                for i in 0..n {
                    w[i * d + offset..i * d + offset + width]
                        .copy_from_slice(&src[i * width..(i + 1) * width]);
                }
                offset += width;
            }
        }

        if self.needs_backprop {
            let matrices = matrices.to_vec();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let mut offset = 0;
                for matrix in &matrices {
                    let width = matrix.d();
                    let mut dw = matrix.dw_mut();
                    for i in 0..n {
                        accumulate(
                            &mut dw[i * width..(i + 1) * width],
                            &g[i * d + offset..i * d + offset + width],
                        );
                    }
                    offset += width;
                }
            });
        }
        Ok(out)
    }

    /// Concatenates matrices with the same number of columns on top of each other.
    pub fn vstack(&self, matrices: &[Matrix<R>]) -> Result<Matrix<R>> {
        ensure_not_empty("vstack", matrices)?;
        let d = matrices[0].d();
        for matrix in matrices {
            if matrix.d() != d {
                return Err(Error::ShapeMismatch {
                    op: "vstack",
                    lhs: matrices[0].dims(),
                    rhs: matrix.dims(),
                });
            }
        }
        let n: usize = matrices.iter().map(Matrix::n).sum();

        let out = self.output(n, d);
        {
            let mut w = out.w_mut();
            let mut offset = 0;
            for matrix in matrices {
                let len = matrix.num_elements();
                w[offset..offset + len].copy_from_slice(&matrix.w());
                offset += len;
            }
        }

        if self.needs_backprop {
            let matrices = matrices.to_vec();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let mut offset = 0;
                for matrix in &matrices {
                    let len = matrix.num_elements();
                    accumulate(&mut matrix.dw_mut(), &g[offset..offset + len]);
                    offset += len;
                }
            });
        }
        Ok(out)
    }

    /// Repeats the `1 x d` vector `x` on `rows` rows.
    pub fn broadcast_row_vector(&self, x: &Matrix<R>, rows: usize) -> Result<Matrix<R>> {
        if x.n() != 1 {
            return Err(Error::ShapeMismatch {
                op: "broadcast_row_vector",
                lhs: x.dims(),
                rhs: Dims(1, x.d()),
            });
        }
        let d = x.d();

        let out = self.output(rows, d);
        {
            let mut w = out.w_mut();
            let src = x.w();
            for i in 0..rows {
                w[i * d..(i + 1) * d].copy_from_slice(&src);
            }
        }

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                accumulate_col_sums(&mut x.dw_mut(), &g, &g, d, |g, _| g);
            });
        }
        Ok(out)
    }

    /// Repeats the `n x 1` vector `x` on `cols` columns.
    pub fn broadcast_col_vector(&self, x: &Matrix<R>, cols: usize) -> Result<Matrix<R>> {
        if x.d() != 1 {
            return Err(Error::ShapeMismatch {
                op: "broadcast_col_vector",
                lhs: x.dims(),
                rhs: Dims(x.n(), 1),
            });
        }

        let out = self.output(x.n(), cols);
        {
            let mut w = out.w_mut();
            for v in w.iter_mut() {
                *v = R::ZERO;
            }
            add_col_vector(&mut w, &x.w(), cols);
        }

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                accumulate_row_sums(&mut x.dw_mut(), &g, &g, cols, |g, _| g);
            });
        }
        Ok(out)
    }
}
