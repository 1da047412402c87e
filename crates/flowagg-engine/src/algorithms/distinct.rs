//! Per-bin distinct value counting.
//!
//! A tracker picks its representation from the column width and promotes
//! itself as it fills:
//!
//! - width 1: a 256-bit bitmap, never promoted;
//! - wider: a sorted, densely packed short list of up to
//!   [`SHORT_LIST_MAX`] values, searched with binary search;
//! - past that: a hash set whose slots each cover eight values sharing all
//!   but the low three bits of the last byte, with a one-byte bitmask of
//!   which of the eight have been seen.
//!
//! Values are ordered bytewise everywhere in this module. That ordering
//! only has to agree between the spill writer and the distinct merge.

use smallvec::SmallVec;

use flowagg_types::bitmap::ByteBitmap;

use crate::algorithms::hash_table::FlatTable;
use crate::memory::{MemoryExhausted, MemoryPool, Reservation};

/// Entries a short list holds before promotion to a hash set.
pub const SHORT_LIST_MAX: usize = 32;
const HASH_SET_INITIAL: usize = 256;

/// One distinct value, inline for widths up to an IPv6 address.
pub type DistinctValue = SmallVec<[u8; 16]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Bitmap,
    ShortList,
    HashSet,
}

enum Repr {
    Bitmap(ByteBitmap),
    ShortList(Vec<u8>),
    HashSet(FlatTable),
}

pub struct DistinctTracker {
    width: usize,
    count: u64,
    repr: Repr,
    reservation: Reservation,
}

impl DistinctTracker {
    pub fn new(width: usize, pool: &MemoryPool) -> Result<Self, MemoryExhausted> {
        debug_assert!(width > 0);
        let (repr, reservation) = if width == 1 {
            let r = Reservation::new(pool, std::mem::size_of::<ByteBitmap>())?;
            (Repr::Bitmap(ByteBitmap::new()), r)
        } else {
            (Repr::ShortList(Vec::new()), Reservation::empty(pool))
        };
        Ok(DistinctTracker {
            width,
            count: 0,
            repr,
            reservation,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of unique values inserted since creation or the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn kind(&self) -> TrackerKind {
        match self.repr {
            Repr::Bitmap(_) => TrackerKind::Bitmap,
            Repr::ShortList(_) => TrackerKind::ShortList,
            Repr::HashSet(_) => TrackerKind::HashSet,
        }
    }

    /// Insert `value`. Returns true if it had not been seen.
    ///
    /// On `MemoryExhausted` the tracker is unchanged.
    pub fn increment(&mut self, value: &[u8]) -> Result<bool, MemoryExhausted> {
        debug_assert_eq!(value.len(), self.width);
        let added = match &mut self.repr {
            Repr::Bitmap(bits) => bits.set(value[0]),
            Repr::ShortList(list) => {
                let pos = match search_packed(list, self.width, value) {
                    Ok(_) => return Ok(false),
                    Err(pos) => pos,
                };
                if list.len() / self.width < SHORT_LIST_MAX {
                    let needed = list.len() + self.width;
                    let reserved = self.reservation.bytes();
                    if needed > reserved {
                        let new_cap = (reserved * 2)
                            .max(4 * self.width)
                            .min(SHORT_LIST_MAX * self.width);
                        self.reservation.grow(new_cap - reserved)?;
                        list.reserve_exact(new_cap - list.len());
                    }
                    let at = pos * self.width;
                    list.splice(at..at, value.iter().copied());
                    true
                } else {
                    let set = promote(list, self.width, value, self.reservation.pool())?;
                    self.repr = Repr::HashSet(set);
                    self.reservation.shrink_to(0);
                    true
                }
            }
            Repr::HashSet(set) => hash_set_insert(set, value)?,
        };
        if added {
            self.count += 1;
        }
        Ok(added)
    }

    /// Empty the tracker. The bitmap and short list keep their storage;
    /// a hash set is freed and recreated empty.
    pub fn reset(&mut self) {
        self.count = 0;
        match &mut self.repr {
            Repr::Bitmap(bits) => bits.clear(),
            Repr::ShortList(list) => list.clear(),
            Repr::HashSet(_) => {
                let pool = self.reservation.pool().clone();
                // drop the old set before asking the pool for a new one
                self.repr = Repr::ShortList(Vec::new());
                if let Ok(set) = FlatTable::with_estimate(self.width, 1, HASH_SET_INITIAL, &pool) {
                    self.repr = Repr::HashSet(set);
                }
            }
        }
    }

    /// The values in ascending bytewise order.
    pub fn values(&self) -> DistinctValues<'_> {
        match &self.repr {
            Repr::Bitmap(bits) => DistinctValues::Bitmap(Box::new(bits.iter())),
            Repr::ShortList(list) => DistinctValues::ShortList(list.chunks_exact(self.width)),
            Repr::HashSet(set) => DistinctValues::HashSet {
                slots: set.sorted_slots(|a, b| a.cmp(b)).into_iter(),
                set,
                current: None,
                bit: 0,
            },
        }
    }
}

/// Binary search over a packed array of `width`-byte values.
fn search_packed(list: &[u8], width: usize, value: &[u8]) -> Result<usize, usize> {
    let (mut lo, mut hi) = (0, list.len() / width);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match list[mid * width..(mid + 1) * width].cmp(value) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Ok(mid),
        }
    }
    Err(lo)
}

fn promote(
    list: &[u8],
    width: usize,
    value: &[u8],
    pool: &MemoryPool,
) -> Result<FlatTable, MemoryExhausted> {
    let mut set = FlatTable::with_estimate(width, 1, HASH_SET_INITIAL, pool)?;
    for existing in list.chunks_exact(width) {
        hash_set_insert(&mut set, existing)?;
    }
    hash_set_insert(&mut set, value)?;
    Ok(set)
}

fn hash_set_insert(set: &mut FlatTable, value: &[u8]) -> Result<bool, MemoryExhausted> {
    let last = value.len() - 1;
    let mut key: DistinctValue = SmallVec::from_slice(value);
    key[last] &= 0xF8;
    let bit = 1u8 << (value[last] & 0x07);
    let slot = set.insert(&key)?.slot;
    let seen = &mut set.value_mut(slot)[0];
    if *seen & bit != 0 {
        return Ok(false);
    }
    *seen |= bit;
    Ok(true)
}

/// Iterator over a tracker's values in ascending order.
pub enum DistinctValues<'a> {
    Bitmap(Box<dyn Iterator<Item = u8> + 'a>),
    ShortList(std::slice::ChunksExact<'a, u8>),
    HashSet {
        set: &'a FlatTable,
        slots: std::vec::IntoIter<usize>,
        current: Option<usize>,
        bit: u8,
    },
}

impl Iterator for DistinctValues<'_> {
    type Item = DistinctValue;

    fn next(&mut self) -> Option<DistinctValue> {
        match self {
            DistinctValues::Bitmap(iter) => iter.next().map(|b| SmallVec::from_slice(&[b])),
            DistinctValues::ShortList(chunks) => chunks.next().map(SmallVec::from_slice),
            DistinctValues::HashSet {
                set,
                slots,
                current,
                bit,
            } => loop {
                let slot = match *current {
                    Some(slot) => slot,
                    None => {
                        *current = Some(slots.next()?);
                        *bit = 0;
                        continue;
                    }
                };
                let mask = set.value(slot)[0];
                while *bit < 8 && mask & (1 << *bit) == 0 {
                    *bit += 1;
                }
                if *bit == 8 {
                    *current = None;
                    continue;
                }
                let mut value: DistinctValue = SmallVec::from_slice(set.key(slot));
                let last = value.len() - 1;
                value[last] |= *bit;
                *bit += 1;
                return Some(value);
            },
        }
    }
}

/// Storage for the trackers of every bin in a table.
///
/// Each bin owns a contiguous group of one tracker per distinct column,
/// addressed by a 32-bit handle kept inline in the bin's value.
pub struct TrackerArena {
    widths: Vec<usize>,
    trackers: Vec<DistinctTracker>,
    pool: MemoryPool,
    reservation: Reservation,
}

impl TrackerArena {
    pub fn new(widths: Vec<usize>, pool: &MemoryPool) -> Self {
        TrackerArena {
            widths,
            trackers: Vec::new(),
            pool: pool.clone(),
            reservation: Reservation::empty(pool),
        }
    }

    pub fn group_len(&self) -> usize {
        self.widths.len()
    }

    /// Number of groups allocated.
    pub fn len(&self) -> usize {
        if self.widths.is_empty() {
            0
        } else {
            self.trackers.len() / self.widths.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Allocate a fresh group of empty trackers.
    pub fn allocate(&mut self) -> Result<u32, MemoryExhausted> {
        let handle = u32::try_from(self.len()).map_err(|_| MemoryExhausted)?;
        let bytes = self.widths.len() * std::mem::size_of::<DistinctTracker>();
        self.reservation.grow(bytes)?;
        let start = self.trackers.len();
        for &width in &self.widths {
            match DistinctTracker::new(width, &self.pool) {
                Ok(t) => self.trackers.push(t),
                Err(e) => {
                    self.trackers.truncate(start);
                    let keep = self.reservation.bytes() - bytes;
                    self.reservation.shrink_to(keep);
                    return Err(e);
                }
            }
        }
        Ok(handle)
    }

    pub fn group(&self, handle: u32) -> &[DistinctTracker] {
        let n = self.widths.len();
        let start = handle as usize * n;
        &self.trackers[start..start + n]
    }

    pub fn group_mut(&mut self, handle: u32) -> &mut [DistinctTracker] {
        let n = self.widths.len();
        let start = handle as usize * n;
        &mut self.trackers[start..start + n]
    }

    /// Drop every group and return their memory to the pool.
    pub fn clear(&mut self) {
        self.trackers = Vec::new();
        self.reservation.shrink_to(0);
    }
}
