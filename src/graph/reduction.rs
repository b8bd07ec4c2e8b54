use super::Graph;
use crate::matrix::core_ops::add_scalar;
use crate::matrix::Matrix;
use crate::real::Real;

impl<R: Real> Graph<R> {
    /// Sum of all elements, as a `1 x 1` matrix.
    pub fn sum(&self, x: &Matrix<R>) -> Matrix<R> {
        self.reduce(x, R::ONE)
    }

    /// Mean of all elements, as a `1 x 1` matrix.
    pub fn mean(&self, x: &Matrix<R>) -> Matrix<R> {
        self.reduce(x, R::ONE / R::from_usize(x.num_elements()))
    }

    fn reduce(&self, x: &Matrix<R>, scale: R) -> Matrix<R> {
        let out = self.output(1, 1);
        out.w_mut()[0] = scale * x.w().iter().copied().sum::<R>();

        if self.needs_backprop {
            let x = x.clone();
            let out = out.clone();
            self.record(move || {
                let g = out.dw()[0];
                add_scalar(&mut x.dw_mut(), scale * g);
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    #[test]
    fn reductions_spread_gradient() {
        let pool = Arc::new(MemoryPool::new());
        let graph = Graph::new(&pool);
        let x = Matrix::from_vec(&pool, 2, 2, vec![1.0, 2.0, 3.0, 6.0]).unwrap();

        let total = graph.sum(&x);
        let mean = graph.mean(&x);
        assert_eq!(total.dims(), Dims(1, 1));
        assert_eq!(total.get(0, 0), 12.0);
        assert_eq!(mean.get(0, 0), 3.0);

        total.fill_grad(1.0);
        mean.fill_grad(2.0);
        graph.backward();
        assert_eq!(x.grad_to_vec(), vec![1.5; 4]);
    }
}
