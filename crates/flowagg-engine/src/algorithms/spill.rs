//! Spill file pairs.
//!
//! A spill is a run of bins sorted by key, stored as two files:
//!
//! - the main file holds one record per bin:
//!   `key | value | count_1 .. count_n` with one `u64` count per distinct
//!   column;
//! - the companion file holds, for each bin in the same order, `count_1`
//!   values of the first distinct column, then `count_2` values of the
//!   second, and so on. Each column's values are ascending bytewise. With
//!   no distinct columns it is created empty.
//!
//! The main file of a pair has index `i` in its store and the companion
//! `i + 1`. Keys are unique within one pair.

use std::io::{Read, Write};

use flowagg_io::{TempReader, TempStore, TempWriter};
use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::serialization::{read_exact_or_eof, read_u64, skip_bytes, write_bytes, write_u64};

use crate::algorithms::distinct::DistinctTracker;

/// Widths of the parts of one spilled bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillLayout {
    pub key_width: usize,
    pub value_width: usize,
    pub distinct_widths: Vec<usize>,
}

impl SpillLayout {
    pub fn num_distinct(&self) -> usize {
        self.distinct_widths.len()
    }

    pub fn has_distinct(&self) -> bool {
        !self.distinct_widths.is_empty()
    }
}

/// File indices of one pair inside a [`TempStore`]: the main file, with
/// its companion at the next index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillPair {
    pub main: usize,
}

impl SpillPair {
    pub fn companion(&self) -> usize {
        self.main + 1
    }

    pub fn remove(&self, store: &TempStore) -> Result<()> {
        store.remove(self.main)?;
        store.remove(self.companion())
    }
}

pub struct SpillWriter {
    main: TempWriter,
    distinct: TempWriter,
    bins: u64,
}

impl SpillWriter {
    /// Create both files of a new pair. They take consecutive indices.
    pub fn create(store: &mut TempStore) -> Result<Self> {
        let main = store.create()?;
        let distinct = store.create()?;
        debug_assert_eq!(distinct.index(), main.index() + 1);
        Ok(SpillWriter {
            main,
            distinct,
            bins: 0,
        })
    }

    pub fn pair(&self) -> SpillPair {
        SpillPair {
            main: self.main.index(),
        }
    }

    pub fn bins(&self) -> u64 {
        self.bins
    }

    /// Write a bin whose distinct values live in `trackers`.
    pub fn write_bin(&mut self, key: &[u8], value: &[u8], trackers: &[DistinctTracker]) -> Result<()> {
        let index = self.main.index();
        write_main_record(&mut self.main, key, value, trackers.iter().map(DistinctTracker::count))
            .map_err(|e| e.on_spill_write(index))?;
        let index = self.distinct.index();
        for t in trackers {
            for v in t.values() {
                self.distinct
                    .write_all(&v)
                    .map_err(|source| FlowAggError::SpillWrite { index, source })?;
            }
        }
        self.bins += 1;
        Ok(())
    }

    /// Write the header of a bin whose distinct values are streamed
    /// afterwards through [`SpillWriter::write_distinct`].
    pub fn write_header(&mut self, key: &[u8], value: &[u8], counts: &[u64]) -> Result<()> {
        let index = self.main.index();
        write_main_record(&mut self.main, key, value, counts.iter().copied())
            .map_err(|e| e.on_spill_write(index))?;
        self.bins += 1;
        Ok(())
    }

    pub fn write_distinct(&mut self, value: &[u8]) -> Result<()> {
        let index = self.distinct.index();
        write_bytes(&mut self.distinct, value).map_err(|e| e.on_spill_write(index))
    }

    pub fn finish(self) -> Result<SpillPair> {
        let pair = self.pair();
        self.main.finish()?;
        self.distinct.finish()?;
        Ok(pair)
    }
}

fn write_main_record(
    main: &mut TempWriter,
    key: &[u8],
    value: &[u8],
    counts: impl Iterator<Item = u64>,
) -> Result<()> {
    write_bytes(main, key)?;
    write_bytes(main, value)?;
    for c in counts {
        write_u64(main, c)?;
    }
    Ok(())
}

fn read_main_tail(main: &mut TempReader, value: &mut [u8], counts: &mut [u64]) -> Result<()> {
    main.read_exact(value)?;
    for c in counts.iter_mut() {
        *c = read_u64(main)?;
    }
    Ok(())
}

/// Sequential reader over one pair. The current bin is buffered.
pub struct SpillReader {
    pair: SpillPair,
    main: TempReader,
    distinct: TempReader,
    layout: SpillLayout,
    key: Vec<u8>,
    value: Vec<u8>,
    counts: Vec<u64>,
}

impl SpillReader {
    pub fn open(store: &TempStore, pair: SpillPair, layout: &SpillLayout) -> Result<Self> {
        let main = store.open(pair.main)?;
        let distinct = store.open(pair.companion())?;
        Ok(SpillReader {
            pair,
            main,
            distinct,
            layout: layout.clone(),
            key: vec![0; layout.key_width],
            value: vec![0; layout.value_width],
            counts: vec![0; layout.num_distinct()],
        })
    }

    pub fn pair(&self) -> SpillPair {
        self.pair
    }

    /// Load the next bin header. Returns false at the end of the pair.
    ///
    /// The companion must have been consumed (read or skipped) for the
    /// previous bin first.
    pub fn advance(&mut self) -> Result<bool> {
        let index = self.pair.main;
        let more = read_exact_or_eof(&mut self.main, &mut self.key).map_err(|e| e.on_spill_read(index))?;
        if !more {
            return Ok(false);
        }
        read_main_tail(&mut self.main, &mut self.value, &mut self.counts)
            .map_err(|e| e.on_spill_read(index))?;
        Ok(true)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Distinct counts of the current bin, one per distinct column.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Read the next companion value into `out`.
    pub fn read_distinct(&mut self, out: &mut [u8]) -> Result<()> {
        let index = self.pair.companion();
        self.distinct
            .read_exact(out)
            .map_err(|source| FlowAggError::SpillRead { index, source })
    }

    /// Discard the current bin's values of `column`.
    pub fn skip_distinct(&mut self, column: usize) -> Result<()> {
        let len = self.counts[column] * self.layout.distinct_widths[column] as u64;
        let index = self.pair.companion();
        skip_bytes(&mut self.distinct, len).map_err(|e| e.on_spill_read(index))
    }

    /// Copy the current bin's values of `column` verbatim to `out`.
    pub fn copy_distinct(&mut self, column: usize, out: &mut SpillWriter) -> Result<()> {
        let width = self.layout.distinct_widths[column];
        let mut buf = vec![0u8; width];
        for _ in 0..self.counts[column] {
            self.read_distinct(&mut buf)?;
            out.write_distinct(&buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPool;

    fn layout() -> SpillLayout {
        SpillLayout {
            key_width: 2,
            value_width: 4,
            distinct_widths: vec![1, 2],
        }
    }

    #[test]
    fn test_write_and_read_pair() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TempStore::new(Some(parent.path()), false).unwrap();
        let layout = layout();
        let pool = MemoryPool::unbounded();

        let mut a = DistinctTracker::new(1, &pool).unwrap();
        let mut b = DistinctTracker::new(2, &pool).unwrap();
        a.increment(&[9]).unwrap();
        a.increment(&[3]).unwrap();
        b.increment(&[0, 7]).unwrap();

        let mut w = SpillWriter::create(&mut store).unwrap();
        w.write_bin(&[0, 1], &5u32.to_ne_bytes(), &[a, b]).unwrap();
        w.write_header(&[0, 2], &6u32.to_ne_bytes(), &[0, 1]).unwrap();
        w.write_distinct(&[1, 1]).unwrap();
        assert_eq!(w.bins(), 2);
        let pair = w.finish().unwrap();
        assert_eq!(pair.companion(), pair.main + 1);

        let mut r = SpillReader::open(&store, pair, &layout).unwrap();
        assert!(r.advance().unwrap());
        assert_eq!(r.key(), &[0, 1]);
        assert_eq!(r.value(), &5u32.to_ne_bytes());
        assert_eq!(r.counts(), &[2, 1]);
        let mut one = [0u8; 1];
        r.read_distinct(&mut one).unwrap();
        assert_eq!(one, [3]);
        r.read_distinct(&mut one).unwrap();
        assert_eq!(one, [9]);
        r.skip_distinct(1).unwrap();

        assert!(r.advance().unwrap());
        assert_eq!(r.key(), &[0, 2]);
        r.skip_distinct(0).unwrap();
        let mut two = [0u8; 2];
        r.read_distinct(&mut two).unwrap();
        assert_eq!(two, [1, 1]);
        assert!(!r.advance().unwrap());

        pair.remove(&store).unwrap();
        assert_eq!(store.live_files().unwrap(), 0);
    }

    #[test]
    fn test_empty_companion_without_distinct() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TempStore::new(Some(parent.path()), true).unwrap();
        let layout = SpillLayout {
            key_width: 4,
            value_width: 8,
            distinct_widths: Vec::new(),
        };
        let mut w = SpillWriter::create(&mut store).unwrap();
        w.write_bin(&[0, 0, 0, 1], &7u64.to_ne_bytes(), &[]).unwrap();
        let pair = w.finish().unwrap();
        assert_eq!(store.live_files().unwrap(), 2);
        assert!(store.path(pair.companion()).exists());

        let mut r = SpillReader::open(&store, pair, &layout).unwrap();
        assert!(r.advance().unwrap());
        assert_eq!(r.value(), &7u64.to_ne_bytes());
        assert!(!r.advance().unwrap());
    }

    #[test]
    fn test_truncated_main_is_read_error() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TempStore::new(Some(parent.path()), false).unwrap();
        let layout = layout();
        let mut main = store.create().unwrap();
        main.write_all(&[1, 2, 3]).unwrap();
        let idx = main.index();
        main.finish().unwrap();
        store.create().unwrap().finish().unwrap();
        let pair = SpillPair { main: idx };
        let mut r = SpillReader::open(&store, pair, &layout).unwrap();
        let err = r.advance().unwrap_err();
        assert!(matches!(err, FlowAggError::SpillRead { .. }));
    }
}
