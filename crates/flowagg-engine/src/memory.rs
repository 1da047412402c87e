//! Byte budget shared by the in-memory structures of one aggregator.
//!
//! The bin table, the distinct trackers and the ranking heap reserve from
//! the pool before they grow. A refused reservation is how allocation
//! exhaustion is signalled: the drivers react by spilling to disk rather
//! than aborting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The pool refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryExhausted;

struct PoolInner {
    limit: usize,
    used: AtomicUsize,
}

/// Cloneable handle to a shared byte budget.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    pub fn new(limit: usize) -> Self {
        MemoryPool {
            inner: Arc::new(PoolInner {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// A pool that never refuses.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.inner.limit.saturating_sub(self.used())
    }

    pub fn try_reserve(&self, bytes: usize) -> Result<(), MemoryExhausted> {
        let limit = self.inner.limit;
        self.inner
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|_| MemoryExhausted)
    }

    pub fn release(&self, bytes: usize) {
        let prev = self.inner.used.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(prev >= bytes, "released more than reserved");
    }
}

/// Bytes held against a pool, returned when dropped.
pub struct Reservation {
    pool: MemoryPool,
    bytes: usize,
}

impl Reservation {
    pub fn empty(pool: &MemoryPool) -> Self {
        Reservation {
            pool: pool.clone(),
            bytes: 0,
        }
    }

    pub fn new(pool: &MemoryPool, bytes: usize) -> Result<Self, MemoryExhausted> {
        pool.try_reserve(bytes)?;
        Ok(Reservation {
            pool: pool.clone(),
            bytes,
        })
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Grow the reservation by `bytes`.
    pub fn grow(&mut self, bytes: usize) -> Result<(), MemoryExhausted> {
        self.pool.try_reserve(bytes)?;
        self.bytes += bytes;
        Ok(())
    }

    /// Shrink the reservation to `bytes`, returning the difference.
    pub fn shrink_to(&mut self, bytes: usize) {
        if bytes < self.bytes {
            self.pool.release(self.bytes - bytes);
            self.bytes = bytes;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.pool.release(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_until_full() {
        let pool = MemoryPool::new(100);
        pool.try_reserve(60).unwrap();
        assert_eq!(pool.try_reserve(41), Err(MemoryExhausted));
        pool.try_reserve(40).unwrap();
        assert_eq!(pool.available(), 0);
        pool.release(100);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let pool = MemoryPool::new(1000);
        {
            let mut r = Reservation::new(&pool, 100).unwrap();
            r.grow(200).unwrap();
            assert_eq!(pool.used(), 300);
            r.shrink_to(50);
            assert_eq!(pool.used(), 50);
        }
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_unbounded_does_not_overflow() {
        let pool = MemoryPool::unbounded();
        pool.try_reserve(usize::MAX - 1).unwrap();
        assert!(pool.try_reserve(10).is_err());
    }
}
