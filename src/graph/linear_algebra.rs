use super::Graph;
use crate::error::{ensure_same_dims, Dims, Error, Result};
use crate::matrix::core_ops::{accumulate, accumulate_row_sums, add_col_vector};
use crate::matrix::linear_algebra::*;
use crate::matrix::Matrix;
use crate::memory::Buffer;
use crate::real::Real;

fn ensure_product(op: &'static str, a: Dims, b: Dims) -> Result<()> {
    if a.1 != b.0 {
        return Err(Error::ShapeMismatch { op, lhs: a, rhs: b });
    }
    Ok(())
}

fn backward_product<R: Real>(a: &Matrix<R>, b: &Matrix<R>, g: &[R]) {
    accumulate_matmul_nt(&mut a.dw_mut(), g, &b.w(), a.dims(), b.dims());
    accumulate_matmul_tn(&mut b.dw_mut(), &a.w(), g, a.dims(), b.dims());
}

impl<R: Real> Graph<R> {
    /// Matrix product `a * b`.
    pub fn mul(&self, a: &Matrix<R>, b: &Matrix<R>) -> Result<Matrix<R>> {
        ensure_product("mul", a.dims(), b.dims())?;

        let out = self.output(a.n(), b.d());
        matmul_into(&mut out.w_mut(), &a.w(), a.dims(), &b.w(), b.dims());

        if self.needs_backprop {
            let a = a.clone();
            let b = b.clone();
            let out = out.clone();
            self.record(move || backward_product(&a, &b, &out.dw()));
        }
        Ok(out)
    }

    /// `a * b + bias` where `bias` is an `a.n() x 1` column added to every
    /// column of the product.
    pub fn mul_with_bias(&self, a: &Matrix<R>, b: &Matrix<R>, bias: &Matrix<R>) -> Result<Matrix<R>> {
        ensure_product("mul_with_bias", a.dims(), b.dims())?;
        ensure_same_dims("mul_with_bias", Dims(a.n(), 1), bias.dims())?;

        let out = self.output(a.n(), b.d());
        {
            let mut w = out.w_mut();
            matmul_into(&mut w, &a.w(), a.dims(), &b.w(), b.dims());
            add_col_vector(&mut w, &bias.w(), b.d());
        }

        if self.needs_backprop {
            let a = a.clone();
            let b = b.clone();
            let bias = bias.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                backward_product(&a, &b, &g);
                accumulate_row_sums(&mut bias.dw_mut(), &g, &g, out.d(), |g, _| g);
            });
        }
        Ok(out)
    }

    /// `W1 * x1 + W2 * x2 + ... + Wk * xk + bias` from the sequence
    /// `[W1, x1, ..., Wk, xk, bias]`.
    ///
    /// Products are either `n x d` or a single `n x 1` column, which is
    /// broadcast across the `d` columns of the result like `bias` is. The
    /// weights and input of a broadcast product receive the gradient summed
    /// over those columns.
    pub fn mul_add_mul_with_bias(&self, matrices: &[Matrix<R>]) -> Result<Matrix<R>> {
        const OP: &str = "mul_add_mul_with_bias";

        if matrices.len() < 3 || matrices.len() % 2 == 0 {
            return Err(Error::UnsupportedConfiguration {
                op: OP,
                why: format!(
                    "expected weight and input pairs followed by a bias, got {} matrices",
                    matrices.len()
                ),
            });
        }
        let (pairs, bias) = matrices.split_at(matrices.len() - 1);
        let bias = &bias[0];

        let n = pairs[0].n();
        let d = pairs.chunks(2).map(|pair| pair[1].d()).max().unwrap_or(1);
        for pair in pairs.chunks(2) {
            ensure_product(OP, pair[0].dims(), pair[1].dims())?;
            let product = Dims(pair[0].n(), pair[1].d());
            if product != Dims(n, d) && product != Dims(n, 1) {
                return Err(Error::ShapeMismatch {
                    op: OP,
                    lhs: Dims(n, d),
                    rhs: product,
                });
            }
        }
        ensure_same_dims(OP, Dims(n, 1), bias.dims())?;

        let out = Matrix::zeros(self.pool(), n, d);
        {
            let mut w = out.w_mut();
            let mut column = Buffer::empty(self.pool(), n);
            column.copy_from_slice(&bias.w());
            for pair in pairs.chunks(2) {
                let dst: &mut [R] = if pair[1].d() == d { &mut *w } else { &mut *column };
                accumulate_matmul(dst, &pair[0].w(), pair[0].dims(), &pair[1].w(), pair[1].dims());
            }
            add_col_vector(&mut w, &column, d);
        }

        if self.needs_backprop {
            let pairs = pairs.to_vec();
            let bias = bias.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let mut row_sums = Buffer::zeroed(&bias.pool(), out.n());
                accumulate_row_sums(&mut row_sums, &g, &g, out.d(), |g, _| g);
                for pair in pairs.chunks(2) {
                    if pair[1].d() == out.d() {
                        backward_product(&pair[0], &pair[1], &g);
                    } else {
                        backward_product(&pair[0], &pair[1], &row_sums);
                    }
                }
                accumulate(&mut bias.dw_mut(), &row_sums);
            });
        }
        Ok(out)
    }
}
