//! Open-addressed hash table over fixed-width binary keys and values.
//!
//! Entries are stored inline as `key || value` in one flat byte array with
//! a side bitset marking occupied slots. Probing is linear; the table
//! doubles once it is three quarters full. Every byte of storage is
//! reserved from a [`MemoryPool`] first, so growth fails cleanly with
//! [`MemoryExhausted`] instead of aborting the process.

use std::cmp::Ordering;

use ahash::RandomState;
use tracing::debug;

use crate::memory::{MemoryExhausted, MemoryPool, Reservation};

const MIN_CAPACITY: usize = 8;

fn table_hasher() -> RandomState {
    // fixed seeds keep spill points reproducible from run to run
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

fn storage_bytes(capacity: usize, entry_width: usize) -> usize {
    capacity * entry_width + capacity.div_ceil(64) * 8
}

fn capacity_for(estimate: usize) -> usize {
    let wanted = estimate.saturating_mul(4) / 3 + 1;
    wanted.max(MIN_CAPACITY).checked_next_power_of_two().unwrap_or(usize::MAX / 2 + 1)
}

/// Result of an insert: the slot holding the key and whether it was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub slot: usize,
    pub is_new: bool,
}

pub struct FlatTable {
    key_width: usize,
    value_width: usize,
    entry_width: usize,
    capacity: usize,
    len: usize,
    entries: Vec<u8>,
    occupied: Vec<u64>,
    hasher: RandomState,
    reservation: Reservation,
}

impl FlatTable {
    /// Create a table sized for about `estimate` entries.
    ///
    /// If the pool cannot hold that many, the capacity is halved until it
    /// fits; only a refusal at the minimum size is an error.
    pub fn with_estimate(
        key_width: usize,
        value_width: usize,
        estimate: usize,
        pool: &MemoryPool,
    ) -> Result<Self, MemoryExhausted> {
        let entry_width = key_width + value_width;
        let mut capacity = capacity_for(estimate);
        let reservation = loop {
            match Reservation::new(pool, storage_bytes(capacity, entry_width)) {
                Ok(r) => break r,
                Err(_) if capacity > MIN_CAPACITY => capacity /= 2,
                Err(e) => return Err(e),
            }
        };
        Ok(FlatTable {
            key_width,
            value_width,
            entry_width,
            capacity,
            len: 0,
            entries: vec![0; capacity * entry_width],
            occupied: vec![0; capacity.div_ceil(64)],
            hasher: table_hasher(),
            reservation,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn key_width(&self) -> usize {
        self.key_width
    }

    pub fn value_width(&self) -> usize {
        self.value_width
    }

    /// Bytes currently reserved from the pool.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    fn is_occupied(&self, slot: usize) -> bool {
        (self.occupied[slot / 64] >> (slot % 64)) & 1 == 1
    }

    fn mark_occupied(&mut self, slot: usize) {
        self.occupied[slot / 64] |= 1u64 << (slot % 64);
    }

    pub fn key(&self, slot: usize) -> &[u8] {
        let start = slot * self.entry_width;
        &self.entries[start..start + self.key_width]
    }

    pub fn value(&self, slot: usize) -> &[u8] {
        let start = slot * self.entry_width + self.key_width;
        &self.entries[start..start + self.value_width]
    }

    pub fn value_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = slot * self.entry_width + self.key_width;
        &mut self.entries[start..start + self.value_width]
    }

    /// Probe for `key`: `Ok(slot)` if present, `Err(slot)` with the empty
    /// slot where it would go.
    fn probe(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let mask = self.capacity - 1;
        let mut slot = (self.hasher.hash_one(key) as usize) & mask;
        loop {
            if !self.is_occupied(slot) {
                return Err(slot);
            }
            if self.key(slot) == key {
                return Ok(slot);
            }
            slot = (slot + 1) & mask;
        }
    }

    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.probe(key).ok()
    }

    /// Find or add `key`. New entries have an all-zero value.
    pub fn insert(&mut self, key: &[u8]) -> Result<Inserted, MemoryExhausted> {
        debug_assert_eq!(key.len(), self.key_width);
        let mut slot = match self.probe(key) {
            Ok(slot) => return Ok(Inserted { slot, is_new: false }),
            Err(slot) => slot,
        };
        if (self.len + 1) * 4 > self.capacity * 3 {
            self.grow()?;
            slot = match self.probe(key) {
                Err(slot) => slot,
                Ok(slot) => slot,
            };
        }
        let start = slot * self.entry_width;
        self.entries[start..start + self.key_width].copy_from_slice(key);
        self.entries[start + self.key_width..start + self.entry_width].fill(0);
        self.mark_occupied(slot);
        self.len += 1;
        Ok(Inserted { slot, is_new: true })
    }

    fn grow(&mut self) -> Result<(), MemoryExhausted> {
        let new_capacity = self.capacity.checked_mul(2).ok_or(MemoryExhausted)?;
        let new_bytes = storage_bytes(new_capacity, self.entry_width);
        // old and new storage coexist while rehashing
        self.reservation.grow(new_bytes)?;

        let old_entries = std::mem::replace(&mut self.entries, vec![0; new_capacity * self.entry_width]);
        let old_occupied = std::mem::replace(&mut self.occupied, vec![0; new_capacity.div_ceil(64)]);
        let old_capacity = self.capacity;
        self.capacity = new_capacity;

        for slot in 0..old_capacity {
            if (old_occupied[slot / 64] >> (slot % 64)) & 1 == 0 {
                continue;
            }
            let entry = &old_entries[slot * self.entry_width..(slot + 1) * self.entry_width];
            let target = match self.probe(&entry[..self.key_width]) {
                Err(target) | Ok(target) => target,
            };
            self.entries[target * self.entry_width..(target + 1) * self.entry_width]
                .copy_from_slice(entry);
            self.mark_occupied(target);
        }
        self.reservation.shrink_to(new_bytes);
        debug!(
            capacity = new_capacity,
            entries = self.len,
            "hash table grew"
        );
        Ok(())
    }

    /// Occupied slots in storage order.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |&slot| self.is_occupied(slot))
    }

    /// Occupied slots ordered by key under `cmp`.
    pub fn sorted_slots<F>(&self, mut cmp: F) -> Vec<usize>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        let mut slots: Vec<usize> = self.slots().collect();
        slots.sort_unstable_by(|&a, &b| cmp(self.key(a), self.key(b)));
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find() {
        let pool = MemoryPool::unbounded();
        let mut t = FlatTable::with_estimate(4, 8, 4, &pool).unwrap();
        let a = t.insert(&1u32.to_ne_bytes()).unwrap();
        assert!(a.is_new);
        t.value_mut(a.slot).copy_from_slice(&42u64.to_ne_bytes());

        let again = t.insert(&1u32.to_ne_bytes()).unwrap();
        assert!(!again.is_new);
        assert_eq!(again.slot, a.slot);
        assert_eq!(t.value(a.slot), &42u64.to_ne_bytes());
        assert_eq!(t.find(&2u32.to_ne_bytes()), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let pool = MemoryPool::unbounded();
        let mut t = FlatTable::with_estimate(4, 4, 1, &pool).unwrap();
        let start_capacity = t.capacity();
        for i in 0..1000u32 {
            let ins = t.insert(&i.to_ne_bytes()).unwrap();
            t.value_mut(ins.slot).copy_from_slice(&(i * 3).to_ne_bytes());
        }
        assert!(t.capacity() > start_capacity);
        assert_eq!(t.len(), 1000);
        for i in 0..1000u32 {
            let slot = t.find(&i.to_ne_bytes()).unwrap();
            assert_eq!(t.value(slot), &(i * 3).to_ne_bytes());
        }
        assert_eq!(pool.used(), t.reserved_bytes());
    }

    #[test]
    fn test_growth_refused_by_pool() {
        let pool = MemoryPool::new(storage_bytes(MIN_CAPACITY, 8) + 16);
        let mut t = FlatTable::with_estimate(4, 4, 1, &pool).unwrap();
        let mut refused = false;
        for i in 0..100u32 {
            match t.insert(&i.to_ne_bytes()) {
                Ok(_) => {}
                Err(MemoryExhausted) => {
                    refused = true;
                    break;
                }
            }
        }
        assert!(refused);
        // existing keys are still found after a refused growth
        assert!(t.insert(&0u32.to_ne_bytes()).is_ok());
        assert_eq!(t.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn test_estimate_shrinks_to_fit_pool() {
        let pool = MemoryPool::new(storage_bytes(64, 12));
        let t = FlatTable::with_estimate(4, 8, 1_000_000, &pool).unwrap();
        assert!(t.capacity() <= 64);

        let tiny = MemoryPool::new(8);
        assert!(FlatTable::with_estimate(4, 8, 10, &tiny).is_err());
    }

    #[test]
    fn test_sorted_slots() {
        let pool = MemoryPool::unbounded();
        let mut t = FlatTable::with_estimate(2, 0, 16, &pool).unwrap();
        for v in [300u16, 5, 70, 1] {
            t.insert(&v.to_ne_bytes()).unwrap();
        }
        let order: Vec<u16> = t
            .sorted_slots(|a, b| {
                u16::from_ne_bytes([a[0], a[1]]).cmp(&u16::from_ne_bytes([b[0], b[1]]))
            })
            .into_iter()
            .map(|s| u16::from_ne_bytes([t.key(s)[0], t.key(s)[1]]))
            .collect();
        assert_eq!(order, vec![1, 5, 70, 300]);
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let pool = MemoryPool::new(1 << 20);
        {
            let _t = FlatTable::with_estimate(16, 8, 100, &pool).unwrap();
            assert!(pool.used() > 0);
        }
        assert_eq!(pool.used(), 0);
    }
}
