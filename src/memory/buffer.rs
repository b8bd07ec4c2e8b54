use super::pool::MemoryPool;
use crate::real::Real;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A pooled, fixed-length buffer.
///
/// The underlying `Vec` goes back to the pool it came from when the
/// buffer is dropped.
pub struct Buffer<R: Real> {
    data: Vec<R>,
    pool: Arc<MemoryPool<R>>,
}

impl<R: Real> Buffer<R> {
    /// Buffer whose contents are stale; every element must be written before being read.
    pub fn empty(pool: &Arc<MemoryPool<R>>, len: usize) -> Self {
        Buffer {
            data: pool.allocate(len),
            pool: Arc::clone(pool),
        }
    }

    pub fn zeroed(pool: &Arc<MemoryPool<R>>, len: usize) -> Self {
        Buffer {
            data: pool.allocate_zeroed(len),
            pool: Arc::clone(pool),
        }
    }

    /// Adopts `data`; it is deposited into `pool` on drop like any other buffer.
    pub fn from_vec(pool: &Arc<MemoryPool<R>>, data: Vec<R>) -> Self {
        Buffer {
            data,
            pool: Arc::clone(pool),
        }
    }

    #[inline]
    pub fn pool(&self) -> &Arc<MemoryPool<R>> {
        &self.pool
    }

    pub fn fill(&mut self, value: R) {
        for x in self.data.iter_mut() {
            *x = value;
        }
    }
}

impl<R: Real> Deref for Buffer<R> {
    type Target = [R];

    fn deref(&self) -> &Self::Target {
        self.data.as_slice()
    }
}

impl<R: Real> DerefMut for Buffer<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_mut_slice()
    }
}

impl<R: Real> Drop for Buffer<R> {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if !data.is_empty() {
            self.pool.deposit(data.len(), data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_to_pool_on_drop() {
        let pool: Arc<MemoryPool<f64>> = Arc::new(MemoryPool::new());

        let address = {
            let buffer = Buffer::zeroed(&pool, 6);
            assert_eq!(&*buffer, &[0.0; 6]);
            buffer.as_ptr()
        };
        assert_eq!(pool.cached(6), 1);

        let buffer = Buffer::empty(&pool, 6);
        assert_eq!(buffer.as_ptr(), address);
        assert_eq!(pool.num_allocations(), 1);
    }

    #[test]
    fn adopted_vectors_are_recycled() {
        let pool: Arc<MemoryPool<f32>> = Arc::new(MemoryPool::new());
        drop(Buffer::from_vec(&pool, vec![1.0, 2.0]));
        assert_eq!(pool.cached(2), 1);
        assert_eq!(pool.num_allocations(), 0);
    }
}
