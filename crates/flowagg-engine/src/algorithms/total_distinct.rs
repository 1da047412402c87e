//! Count of unique values of one column over all input records.
//!
//! Values go into a single [`DistinctTracker`]. When it cannot grow, the
//! owner writes its contents to a spill file as an ascending run and the
//! tracker starts over. The final count merges every run with whatever is
//! still in memory, counting each value once.

use std::collections::VecDeque;

use tracing::debug;

use flowagg_io::{TempReader, TempStore};
use flowagg_types::error::Result;
use flowagg_types::serialization::{read_exact_or_eof, write_bytes};

use crate::algorithms::distinct::DistinctTracker;
use crate::algorithms::heap::HeapBy;
use crate::memory::{MemoryExhausted, MemoryPool};

pub struct TotalDistinct {
    width: usize,
    tracker: DistinctTracker,
    runs: Vec<usize>,
}

impl TotalDistinct {
    pub fn new(width: usize, pool: &MemoryPool) -> std::result::Result<Self, MemoryExhausted> {
        Ok(TotalDistinct {
            width,
            tracker: DistinctTracker::new(width, pool)?,
            runs: Vec::new(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of runs written to disk so far.
    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    /// Unique values currently held in memory.
    pub fn in_memory(&self) -> u64 {
        self.tracker.count()
    }

    pub fn try_add(&mut self, value: &[u8]) -> std::result::Result<bool, MemoryExhausted> {
        self.tracker.increment(value)
    }

    /// Write the in-memory values as a new run and empty the tracker.
    pub fn spill(&mut self, store: &mut TempStore) -> Result<()> {
        if self.tracker.is_empty() {
            return Ok(());
        }
        let mut out = store.create()?;
        let index = out.index();
        for v in self.tracker.values() {
            write_bytes(&mut out, &v).map_err(|e| e.on_spill_write(index))?;
        }
        out.finish()?;
        debug!(index, values = self.tracker.count(), "spilled total-distinct run");
        self.runs.push(index);
        self.tracker.reset();
        Ok(())
    }

    /// The number of unique values seen. Consumes every run.
    pub fn finish(mut self, store: Option<&mut TempStore>, max_open_files: usize) -> Result<u64> {
        let store = match store {
            Some(s) if !self.runs.is_empty() => s,
            _ => return Ok(self.tracker.count()),
        };
        self.spill(store)?;
        let fan_in = max_open_files.max(2);
        let mut queue: VecDeque<usize> = self.runs.drain(..).collect();
        while queue.len() > fan_in {
            let batch: Vec<usize> = queue.drain(..fan_in).collect();
            let mut out = store.create()?;
            let index = out.index();
            merge_runs(store, &batch, self.width, |v| {
                write_bytes(&mut out, v).map_err(|e| e.on_spill_write(index))
            })?;
            out.finish()?;
            queue.push_back(index);
        }
        let batch: Vec<usize> = queue.into_iter().collect();
        let mut count = 0u64;
        merge_runs(store, &batch, self.width, |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }
}

/// Merge ascending runs, calling `emit` once per unique value. Each run is
/// removed once read.
fn merge_runs<F>(store: &TempStore, runs: &[usize], width: usize, mut emit: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut readers: Vec<TempReader> = Vec::with_capacity(runs.len());
    let mut heads: Vec<Vec<u8>> = Vec::with_capacity(runs.len());
    let mut heap = HeapBy::with_capacity(runs.len());
    for &run in runs {
        let mut reader = store.open(run)?;
        let mut head = vec![0u8; width];
        if read_exact_or_eof(&mut reader, &mut head).map_err(|e| e.on_spill_read(run))? {
            readers.push(reader);
            heads.push(head);
            let i = heads.len() - 1;
            heap.push(i, &mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
        } else {
            store.remove(run)?;
        }
    }

    let mut last: Option<Vec<u8>> = None;
    while let Some(&i) = heap.peek() {
        if last.as_deref() != Some(&heads[i][..]) {
            emit(&heads[i])?;
            let l = last.get_or_insert_with(Vec::new);
            l.clear();
            l.extend_from_slice(&heads[i]);
        }
        let index = readers[i].index();
        if read_exact_or_eof(&mut readers[i], &mut heads[i]).map_err(|e| e.on_spill_read(index))? {
            heap.replace_top(i, &mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
        } else {
            heap.pop(&mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
            store.remove(index)?;
        }
    }
    Ok(())
}
