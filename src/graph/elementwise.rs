//! Elementwise operations: sums, differences and products of matrices,
//! their column-broadcast forms, and unary nonlinearities.
//!
//! Binary operations accept operands of equal shape, or a single column
//! broadcast across every column of the other operand. `eltmul_rowwise`
//! pairs a matrix with the transpose of its operand. When the column
//! comes first, commutative operations swap their operands and `sub`
//! switches to `sub_broadcast_reversed`, so the broadcast operand always
//! sits second in the recorded closure.
//!
//! Much of the code is shared between operations and stamped out by the
//! `expand_impl` procedural macro; the backward closure of each generated
//! method is then filled in by `define_closure`.

use super::Graph;
use crate::error::{ensure_same_dims, Dims, Error, Result};
use crate::matrix::core_ops::*;
use crate::matrix::Matrix;
use crate::memory::Buffer;
use crate::real::Real;
use gradtape_macros::{define_closure, expand_impl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pairing {
    Same,
    RhsColumn,
    LhsColumn,
}

fn pairing(op: &'static str, lhs: Dims, rhs: Dims) -> Result<Pairing> {
    if lhs == rhs {
        Ok(Pairing::Same)
    } else if lhs.0 == rhs.0 && rhs.1 == 1 {
        Ok(Pairing::RhsColumn)
    } else if lhs.0 == rhs.0 && lhs.1 == 1 {
        Ok(Pairing::LhsColumn)
    } else {
        Err(Error::ShapeMismatch { op, lhs, rhs })
    }
}

fn ensure_column(op: &'static str, a: Dims, col: Dims) -> Result<()> {
    if col != Dims(a.0, 1) {
        return Err(Error::ShapeMismatch { op, lhs: a, rhs: col });
    }
    Ok(())
}

impl<R: Real> Graph<R> {
    /// `a + b`, with a column operand broadcast across the other.
    pub fn add(&self, a: &Matrix<R>, b: &Matrix<R>) -> Result<Matrix<R>> {
        match pairing("add", a.dims(), b.dims())? {
            Pairing::Same => Ok(self.add_elementwise(a, b)),
            Pairing::RhsColumn => self.add_broadcast(a, b),
            Pairing::LhsColumn => self.add_broadcast(b, a),
        }
    }

    /// `a - b`, with a column operand broadcast across the other.
    pub fn sub(&self, a: &Matrix<R>, b: &Matrix<R>) -> Result<Matrix<R>> {
        match pairing("sub", a.dims(), b.dims())? {
            Pairing::Same => Ok(self.sub_elementwise(a, b)),
            Pairing::RhsColumn => self.sub_broadcast(a, b),
            Pairing::LhsColumn => self.sub_broadcast_reversed(b, a),
        }
    }

    /// Hadamard product, with a column operand broadcast across the other.
    pub fn eltmul(&self, a: &Matrix<R>, b: &Matrix<R>) -> Result<Matrix<R>> {
        match pairing("eltmul", a.dims(), b.dims())? {
            Pairing::Same => Ok(self.eltmul_elementwise(a, b)),
            Pairing::RhsColumn => self.eltmul_broadcast(a, b),
            Pairing::LhsColumn => self.eltmul_broadcast(b, a),
        }
    }

    /// `col - a` where `col` is a column broadcast across `a`.
    pub fn sub_broadcast_reversed(&self, a: &Matrix<R>, col: &Matrix<R>) -> Result<Matrix<R>> {
        ensure_column("sub_broadcast_reversed", a.dims(), col.dims())?;

        let out = self.output(a.n(), a.d());
        broadcast_cols_into(&mut out.w_mut(), &a.w(), &col.w(), a.d(), |x, c| c - x);

        if self.needs_backprop {
            let a = a.clone();
            let col = col.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                accumulate_scaled(&mut a.dw_mut(), &g, -R::ONE);
                accumulate_row_sums(&mut col.dw_mut(), &g, &g, a.d(), |g, _| g);
            });
        }
        Ok(out)
    }

    /// `a * row` where `row` is a `1 x d` vector broadcast down every row of `a`.
    pub fn eltmul_broadcast_rowwise(&self, a: &Matrix<R>, row: &Matrix<R>) -> Result<Matrix<R>> {
        if row.dims() != Dims(1, a.d()) {
            return Err(Error::ShapeMismatch {
                op: "eltmul_broadcast_rowwise",
                lhs: a.dims(),
                rhs: row.dims(),
            });
        }

        let out = self.output(a.n(), a.d());
        broadcast_rows_into(&mut out.w_mut(), &a.w(), &row.w(), a.d(), |x, r| x * r);

        if self.needs_backprop {
            let a = a.clone();
            let row = row.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                accumulate_broadcast_rows(&mut a.dw_mut(), &g, &row.w(), a.d(), |g, r| g * r);
                accumulate_col_sums(&mut row.dw_mut(), &a.w(), &g, a.d(), |x, g| x * g);
            });
        }
        Ok(out)
    }

    /// `a * transpose(b)` elementwise, where `b` has the transposed shape of `a`.
    pub fn eltmul_rowwise(&self, a: &Matrix<R>, b: &Matrix<R>) -> Result<Matrix<R>> {
        if b.dims() != Dims(a.d(), a.n()) {
            return Err(Error::ShapeMismatch {
                op: "eltmul_rowwise",
                lhs: a.dims(),
                rhs: b.dims(),
            });
        }

        let out = self.output(a.n(), a.d());
        {
            let mut bt = Buffer::empty(self.pool(), b.num_elements());
            transpose_into(&mut bt, &b.w(), b.n(), b.d());
            zip_map_into(&mut out.w_mut(), &a.w(), &bt, |x, y| x * y);
        }

        if self.needs_backprop {
            let a = a.clone();
            let b = b.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                let pool = a.pool();

                let mut bt = Buffer::empty(&pool, b.num_elements());
                transpose_into(&mut bt, &b.w(), b.n(), b.d());
                accumulate_zip(&mut a.dw_mut(), &bt, &g, |y, g| y * g);

                let mut ag = Buffer::empty(&pool, a.num_elements());
                zip_map_into(&mut ag, &a.w(), &g, |x, g| x * g);
                accumulate_transposed(&mut b.dw_mut(), &ag, a.n(), a.d());
            });
        }
        Ok(out)
    }

    /// Sum of one or more matrices of identical shape.
    pub fn add_many(&self, matrices: &[Matrix<R>]) -> Result<Matrix<R>> {
        let first = matrices.first().ok_or_else(|| Error::UnsupportedConfiguration {
            op: "add_many",
            why: "at least one matrix is required".to_string(),
        })?;
        for matrix in &matrices[1..] {
            ensure_same_dims("add_many", first.dims(), matrix.dims())?;
        }

        let out = self.output(first.n(), first.d());
        out.w_mut().copy_from_slice(&first.w());
        for matrix in &matrices[1..] {
            accumulate(&mut out.w_mut(), &matrix.w());
        }

        if self.needs_backprop {
            let matrices = matrices.to_vec();
            let out = out.clone();
            self.record(move || {
                let g = out.dw();
                for matrix in &matrices {
                    accumulate(&mut matrix.dw_mut(), &g);
                }
            });
        }
        Ok(out)
    }

    /// `1 / (1 + exp(-aggressiveness * x))`
    pub fn steep_sigmoid(&self, x: &Matrix<R>, aggressiveness: R) -> Matrix<R> {
        let out = self.output(x.n(), x.d());
        map_into(&mut out.w_mut(), &x.w(), |v| (aggressiveness * v).sigmoid());

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                accumulate_zip(&mut x.dw_mut(), &out.w(), &out.dw(), |y, g| {
                    aggressiveness * y * (R::ONE - y) * g
                });
            });
        }
        out
    }
}

#[expand_impl(add, sub, mul as eltmul)]
#[define_closure(
    add_elementwise: move || {
        let g = out.dw();
        accumulate(&mut a.dw_mut(), &g);
        accumulate(&mut b.dw_mut(), &g);
    }
)]
#[define_closure(
    sub_elementwise: move || {
        let g = out.dw();
        accumulate(&mut a.dw_mut(), &g);
        accumulate_scaled(&mut b.dw_mut(), &g, -R::ONE);
    }
)]
#[define_closure(
    eltmul_elementwise: move || {
        let g = out.dw();
        accumulate_zip(&mut a.dw_mut(), &b.w(), &g, |y, g| y * g);
        accumulate_zip(&mut b.dw_mut(), &a.w(), &g, |x, g| x * g);
    }
)]
impl<R: Real> Graph<R> {
    fn operation_elementwise(&self, a: &Matrix<R>, b: &Matrix<R>) -> Matrix<R> {
        let out = self.output(a.n(), a.d());
        zip_map_into(&mut out.w_mut(), &a.w(), &b.w(), |x, y| x.placeholder(y));

        if self.needs_backprop {
            let a = a.clone();
            let b = b.clone();
            let out = out.clone();
            self.record(|| ());
        }
        out
    }
}

#[expand_impl(add as add_broadcast, sub as sub_broadcast, mul as eltmul_broadcast)]
#[define_closure(
    add_broadcast: move || {
        let g = out.dw();
        accumulate(&mut a.dw_mut(), &g);
        accumulate_row_sums(&mut col.dw_mut(), &g, &g, a.d(), |g, _| g);
    }
)]
#[define_closure(
    sub_broadcast: move || {
        let g = out.dw();
        accumulate(&mut a.dw_mut(), &g);
        accumulate_row_sums(&mut col.dw_mut(), &g, &g, a.d(), |g, _| -g);
    }
)]
#[define_closure(
    eltmul_broadcast: move || {
        let g = out.dw();
        accumulate_broadcast_cols(&mut a.dw_mut(), &g, &col.w(), a.d(), |g, c| g * c);
        accumulate_row_sums(&mut col.dw_mut(), &a.w(), &g, a.d(), |x, g| x * g);
    }
)]
impl<R: Real> Graph<R> {
    /// Combines `a` with `col`, an `a.n() x 1` column broadcast across every
    /// column of `a`.
    pub fn operation(&self, a: &Matrix<R>, col: &Matrix<R>) -> Result<Matrix<R>> {
        ensure_column("operation", a.dims(), col.dims())?;

        let out = self.output(a.n(), a.d());
        broadcast_cols_into(&mut out.w_mut(), &a.w(), &col.w(), a.d(), |x, c| x.placeholder(c));

        if self.needs_backprop {
            let a = a.clone();
            let col = col.clone();
            let out = out.clone();
            self.record(|| ());
        }
        Ok(out)
    }
}

#[expand_impl(sigmoid, tanh, relu, square, exp, ln as log)]
#[define_closure(
    sigmoid: move || {
        accumulate_zip(&mut x.dw_mut(), &out.w(), &out.dw(), |y, g| y * (R::ONE - y) * g);
    }
)]
#[define_closure(
    tanh: move || {
        accumulate_zip(&mut x.dw_mut(), &out.w(), &out.dw(), |y, g| (R::ONE - y * y) * g);
    }
)]
#[define_closure(
    relu: move || {
        accumulate_zip(&mut x.dw_mut(), &out.w(), &out.dw(), |y, g| {
            if y > R::ZERO {
                g
            } else {
                R::ZERO
            }
        });
    }
)]
#[define_closure(
    square: move || {
        let two = R::ONE + R::ONE;
        accumulate_zip(&mut x.dw_mut(), &x.w(), &out.dw(), |v, g| two * v * g);
    }
)]
#[define_closure(
    exp: move || {
        accumulate_zip(&mut x.dw_mut(), &out.w(), &out.dw(), |y, g| y * g);
    }
)]
#[define_closure(
    log: move || {
        accumulate_zip(&mut x.dw_mut(), &x.w(), &out.dw(), |v, g| g / v);
    }
)]
impl<R: Real> Graph<R> {
    pub fn operation(&self, x: &Matrix<R>) -> Matrix<R> {
        let out = self.output(x.n(), x.d());
        map_into(&mut out.w_mut(), &x.w(), |v| v.placeholder());

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(|| ());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryPool<f64>>, Graph<f64>) {
        let pool = Arc::new(MemoryPool::new());
        let graph = Graph::new(&pool);
        (pool, graph)
    }

    #[test]
    fn add_accumulates_into_both_operands() {
        let (pool, graph) = setup();
        let a = Matrix::from_vec(&pool, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::from_vec(&pool, 2, 2, vec![0.5; 4]).unwrap();

        let out = graph.add(&a, &b).unwrap();
        assert_eq!(out.to_vec(), vec![1.5, 2.5, 3.5, 4.5]);

        out.dw_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        graph.backward();
        assert_eq!(a.grad_to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(b.grad_to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn broadcast_column_gets_row_sums() {
        let (pool, graph) = setup();
        let a = Matrix::from_vec(&pool, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let col = Matrix::from_vec(&pool, 2, 1, vec![10.0, 20.0]).unwrap();

        // column first: operands are swapped
        let out = graph.add(&col, &a).unwrap();
        assert_eq!(out.dims(), Dims(2, 3));
        assert_eq!(out.to_vec(), vec![11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);

        out.dw_mut().copy_from_slice(&[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        graph.backward();
        assert_eq!(a.grad_to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(col.grad_to_vec(), vec![3.0, 6.0]);
    }

    #[test]
    fn reversed_broadcast_subtraction() {
        let (pool, graph) = setup();
        let col = Matrix::from_vec(&pool, 2, 1, vec![10.0, 20.0]).unwrap();
        let a = Matrix::from_vec(&pool, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let out = graph.sub(&col, &a).unwrap();
        assert_eq!(out.to_vec(), vec![9.0, 8.0, 17.0, 16.0]);

        out.fill_grad(1.0);
        graph.backward();
        assert_eq!(a.grad_to_vec(), vec![-1.0; 4]);
        assert_eq!(col.grad_to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn incompatible_shapes() {
        let (pool, graph) = setup();
        let a = Matrix::zeros(&pool, 2, 3);
        let b = Matrix::zeros(&pool, 3, 2);
        let row = Matrix::zeros(&pool, 1, 3);

        assert!(matches!(graph.add(&a, &b), Err(Error::ShapeMismatch { op: "add", .. })));
        assert!(graph.eltmul(&a, &row).is_err());
        assert!(graph.eltmul_broadcast_rowwise(&a, &b).is_err());
        assert!(matches!(
            graph.add_many(&[]),
            Err(Error::UnsupportedConfiguration { .. })
        ));
        assert_eq!(graph.tape_len(), 0);
    }

    #[test]
    fn rowwise_product_with_transposed_operand() {
        let (pool, graph) = setup();
        let a = Matrix::from_vec(&pool, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(&pool, 3, 2, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]).unwrap();

        let out = graph.eltmul_rowwise(&a, &b).unwrap();
        assert_eq!(out.dims(), Dims(2, 3));
        assert_eq!(out.to_vec(), vec![1.0, 4.0, 9.0, -4.0, -10.0, -18.0]);

        out.fill_grad(1.0);
        graph.backward();
        assert_eq!(a.grad_to_vec(), vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]);
        assert_eq!(b.grad_to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        assert!(matches!(
            graph.eltmul_rowwise(&a, &a),
            Err(Error::ShapeMismatch { op: "eltmul_rowwise", .. })
        ));
    }

    #[test]
    fn broadcast_errors_name_the_operation() {
        let (pool, graph) = setup();
        let a = Matrix::zeros(&pool, 2, 3);
        let wrong = Matrix::zeros(&pool, 3, 1);

        assert!(matches!(
            graph.add_broadcast(&a, &wrong),
            Err(Error::ShapeMismatch { op: "add_broadcast", .. })
        ));
        assert!(matches!(
            graph.sub_broadcast(&a, &wrong),
            Err(Error::ShapeMismatch { op: "sub_broadcast", .. })
        ));
        assert!(matches!(
            graph.eltmul_broadcast(&a, &wrong),
            Err(Error::ShapeMismatch { op: "eltmul_broadcast", .. })
        ));
        assert_eq!(graph.tape_len(), 0);
    }

    #[test]
    fn eltmul_with_itself() {
        let (pool, graph) = setup();
        let a = Matrix::from_vec(&pool, 1, 3, vec![1.0, -2.0, 3.0]).unwrap();

        let out = graph.eltmul(&a, &a).unwrap();
        assert_eq!(out.to_vec(), vec![1.0, 4.0, 9.0]);

        out.fill_grad(1.0);
        graph.backward();
        assert_eq!(a.grad_to_vec(), vec![2.0, -4.0, 6.0]);
    }

    #[test]
    fn nonlinearities() {
        let (pool, graph) = setup();
        let x = Matrix::from_vec(&pool, 1, 3, vec![-1.0, 0.5, 2.0]).unwrap();

        assert_eq!(graph.relu(&x).to_vec(), vec![0.0, 0.5, 2.0]);
        assert_eq!(graph.square(&x).to_vec(), vec![1.0, 0.25, 4.0]);
        assert!((graph.log(&graph.exp(&x)).get(0, 2) - 2.0).abs() < 1e-12);
        assert!((graph.tanh(&x).get(0, 1) - 0.5_f64.tanh()).abs() < 1e-12);
        let expected = 1.0 / (1.0 + (-1.0_f64).exp());
        assert!((graph.steep_sigmoid(&x, 2.0).get(0, 1) - expected).abs() < 1e-12);
        assert_eq!(graph.tape_len(), 6);
    }

    #[test]
    fn inference_records_nothing() {
        let pool = Arc::new(MemoryPool::new());
        let graph = Graph::without_backprop(&pool);
        let a = Matrix::from_vec(&pool, 1, 2, vec![1.0, 2.0]).unwrap();

        let out = graph.tanh(&graph.add(&a, &a).unwrap());
        assert_eq!(out.dims(), Dims(1, 2));
        assert_eq!(graph.tape_len(), 0);
    }
}
