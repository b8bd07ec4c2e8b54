use crate::real::Real;
use dashmap::DashMap;
use log::{debug, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compute target a pool hands out buffers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Host,
    Accelerator,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Host => write!(f, "host"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub device: Device,
    /// When false, deposited buffers are freed instead of cached.
    pub recycle: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            device: Device::Host,
            recycle: true,
        }
    }
}

impl PoolConfig {
    /// Host pool; recycling is turned off when `GRADTAPE_NO_MEMORY_POOL` is set.
    pub fn from_env() -> Self {
        PoolConfig {
            recycle: std::env::var_os("GRADTAPE_NO_MEMORY_POOL").is_none(),
            ..PoolConfig::default()
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

/// Cache of free buffers bucketed by element count.
///
/// Buffers of equal element count are interchangeable whatever the shape
/// of the matrix that used them: callers always carry their own shape and
/// either zero or fully overwrite what they get back. Buckets are sharded
/// so that threads working on unrelated sizes do not contend, and the
/// lifetime counters only ever grow.
///
/// One pool serves one `Device`; build one pool per compute target.
pub struct MemoryPool<R> {
    config: PoolConfig,
    buckets: DashMap<usize, Vec<Vec<R>>>,
    num_allocations: AtomicU64,
    total_memory: AtomicU64,
}

impl<R: Real> MemoryPool<R> {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        debug!(
            "creating {} memory pool (recycle: {})",
            config.device, config.recycle
        );
        MemoryPool {
            config,
            buckets: DashMap::new(),
            num_allocations: AtomicU64::new(0),
            total_memory: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.config.device
    }

    #[inline]
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Returns a buffer of `amount` elements.
    ///
    /// A recycled buffer keeps whatever its previous owner wrote in it;
    /// only freshly allocated memory is zeroed.
    pub fn allocate(&self, amount: usize) -> Vec<R> {
        if let Some(mut deposit_box) = self.buckets.get_mut(&amount) {
            if let Some(buffer) = deposit_box.pop() {
                trace!("{} pool hit for {} elements", self.config.device, amount);
                return buffer;
            }
        }

        let count = self.num_allocations.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_memory.fetch_add(
            (amount * std::mem::size_of::<R>()) as u64,
            Ordering::Relaxed,
        );
        trace!(
            "{} pool miss for {} elements, allocation #{}",
            self.config.device,
            amount,
            count
        );
        vec![R::ZERO; amount]
    }

    /// Same as `allocate` with every element set to zero.
    pub fn allocate_zeroed(&self, amount: usize) -> Vec<R> {
        let mut buffer = self.allocate(amount);
        for x in buffer.iter_mut() {
            *x = R::ZERO;
        }
        buffer
    }

    /// Hands `buffer` back to the bucket of `amount` elements.
    pub fn deposit(&self, amount: usize, buffer: Vec<R>) {
        if !self.config.recycle {
            return;
        }
        if buffer.len() != amount {
            warn!(
                "refusing deposit of {} elements into the bucket of {}",
                buffer.len(),
                amount
            );
            return;
        }
        self.buckets.entry(amount).or_default().push(buffer);
    }

    /// Number of fresh allocations performed since creation.
    pub fn num_allocations(&self) -> u64 {
        self.num_allocations.load(Ordering::Relaxed)
    }

    /// Bytes obtained from the system allocator since creation.
    pub fn total_memory(&self) -> u64 {
        self.total_memory.load(Ordering::Relaxed)
    }

    /// Number of free buffers waiting in the bucket of `amount` elements.
    pub fn cached(&self, amount: usize) -> usize {
        self.buckets
            .get(&amount)
            .map(|deposit_box| deposit_box.len())
            .unwrap_or(0)
    }

    /// Frees every cached buffer. Lifetime counters are left untouched.
    pub fn clear(&self) {
        debug!(
            "clearing {} memory pool ({} buckets)",
            self.config.device,
            self.buckets.len()
        );
        self.buckets.clear();
    }
}

impl<R: Real> Default for MemoryPool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for MemoryPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("config", &self.config)
            .field("buckets", &self.buckets.len())
            .field("num_allocations", &self.num_allocations.load(Ordering::Relaxed))
            .field("total_memory", &self.total_memory.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recycles_identical_buffer() {
        let pool: MemoryPool<f64> = MemoryPool::new();

        let buffer = pool.allocate(12);
        assert_eq!(pool.num_allocations(), 1);
        let address = buffer.as_ptr();

        pool.deposit(12, buffer);
        assert_eq!(pool.cached(12), 1);

        let again = pool.allocate(12);
        assert_eq!(again.as_ptr(), address);
        assert_eq!(pool.num_allocations(), 1);
        assert_eq!(pool.cached(12), 0);

        let _other = pool.allocate(7);
        assert_eq!(pool.num_allocations(), 2);
        assert_eq!(pool.total_memory(), (19 * std::mem::size_of::<f64>()) as u64);
    }

    #[test]
    fn keeps_stale_contents_unless_zeroed() {
        let pool: MemoryPool<f32> = MemoryPool::new();
        let mut buffer = pool.allocate(4);
        buffer.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        pool.deposit(4, buffer);

        assert_eq!(pool.allocate(4), vec![1.0, 2.0, 3.0, 4.0]);

        let mut buffer = pool.allocate(4);
        buffer[0] = 9.0;
        pool.deposit(4, buffer);
        assert_eq!(pool.allocate_zeroed(4), vec![0.0; 4]);
    }

    #[test]
    fn rejects_mismatched_deposit() {
        let pool: MemoryPool<f64> = MemoryPool::new();
        pool.deposit(3, vec![0.0; 4]);
        assert_eq!(pool.cached(3), 0);
        assert_eq!(pool.cached(4), 0);
    }

    #[test]
    fn disabled_recycling() {
        let pool: MemoryPool<f64> = MemoryPool::with_config(PoolConfig {
            recycle: false,
            ..PoolConfig::default()
        });
        let buffer = pool.allocate(5);
        pool.deposit(5, buffer);
        let _buffer = pool.allocate(5);
        assert_eq!(pool.num_allocations(), 2);
    }

    #[test]
    fn configuration_from_environment() {
        std::env::set_var("GRADTAPE_NO_MEMORY_POOL", "1");
        let disabled = PoolConfig::from_env();
        std::env::remove_var("GRADTAPE_NO_MEMORY_POOL");
        let enabled = PoolConfig::from_env();

        assert!(!disabled.recycle);
        assert!(enabled.recycle);
        assert_eq!(enabled.device, Device::Host);

        let pool: MemoryPool<f32> = MemoryPool::with_config(disabled.device(Device::Accelerator));
        assert_eq!(pool.device(), Device::Accelerator);
        assert!(!pool.config().recycle);
        let buffer = pool.allocate(3);
        pool.deposit(3, buffer);
        assert_eq!(pool.cached(3), 0);
    }

    #[test]
    fn clear_frees_cache_but_keeps_counters() {
        let pool: MemoryPool<f64> = MemoryPool::new();
        let a = pool.allocate(8);
        let b = pool.allocate(8);
        let c = pool.allocate(2);
        pool.deposit(8, a);
        pool.deposit(8, b);
        pool.deposit(2, c);
        assert_eq!(pool.cached(8), 2);

        pool.clear();
        assert_eq!(pool.cached(8), 0);
        assert_eq!(pool.cached(2), 0);
        assert_eq!(pool.num_allocations(), 3);
        assert_eq!(pool.total_memory(), (18 * std::mem::size_of::<f64>()) as u64);

        let _again = pool.allocate(8);
        assert_eq!(pool.num_allocations(), 4);
    }

    #[test]
    fn concurrent_allocate_and_deposit() {
        let pool: Arc<MemoryPool<f64>> = Arc::new(MemoryPool::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let amount = 1 + (t + i) % 5;
                        let buffer = pool.allocate(amount);
                        assert_eq!(buffer.len(), amount);
                        pool.deposit(amount, buffer);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // never more live buffers per bucket than threads
        assert!(pool.num_allocations() <= 8 * 5);
        let cached: usize = (1..=5).map(|amount| pool.cached(amount)).sum();
        assert_eq!(cached as u64, pool.num_allocations());
    }
}
