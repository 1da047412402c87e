//! K-way merge of sorted spill pairs.
//!
//! At most half of the open-file budget worth of pairs is open at once.
//! When more pairs are waiting than fit, a batch is merged into a new
//! intermediate pair appended to the end of the queue, and the round
//! repeats until one batch covers everything. That final batch is merged
//! lazily as bins are pulled.
//!
//! Bins sharing a key across pairs are combined: values with the value
//! fields' merge, distinct values by a nested merge of the ascending
//! companion runs, counting each unique value once.

use std::cmp::Ordering;
use std::collections::VecDeque;

use tracing::{debug, warn};

use flowagg_io::{is_resource_exhausted, TempStore};
use flowagg_types::error::Result;

use crate::algorithms::heap::HeapBy;
use crate::algorithms::spill::{SpillLayout, SpillPair, SpillReader, SpillWriter};
use crate::bin::{encode_distinct_counts, BinRef};
use crate::fields::FieldList;

pub struct SpillMerge {
    store: TempStore,
    layout: SpillLayout,
    key_fields: FieldList,
    value_fields: FieldList,
    pending: VecDeque<SpillPair>,
    max_pairs: usize,

    readers: Vec<SpillReader>,
    heap: HeapBy<usize>,
    members: Vec<usize>,

    key: Vec<u8>,
    value: Vec<u8>,
    distinct: Vec<u8>,
    counts: Vec<u64>,
}

impl SpillMerge {
    /// Merge `pairs`, written in order, with at most `max_open_files`
    /// files open.
    pub fn new(
        store: TempStore,
        layout: SpillLayout,
        key_fields: FieldList,
        value_fields: FieldList,
        pairs: Vec<SpillPair>,
        max_open_files: usize,
    ) -> Result<Self> {
        let distinct_width = layout.distinct_widths.iter().sum();
        let mut merge = SpillMerge {
            store,
            key: vec![0; layout.key_width],
            value: vec![0; layout.value_width],
            distinct: vec![0; distinct_width],
            counts: vec![0; layout.num_distinct()],
            layout,
            key_fields,
            value_fields,
            pending: pairs.into(),
            max_pairs: (max_open_files / 2).max(2),
            readers: Vec::new(),
            heap: HeapBy::new(),
            members: Vec::new(),
        };
        merge.prepare()?;
        Ok(merge)
    }

    pub fn store(&self) -> &TempStore {
        &self.store
    }

    /// Run intermediate rounds until the remaining pairs fit in one batch.
    fn prepare(&mut self) -> Result<()> {
        let mut round = 0usize;
        loop {
            self.open_batch()?;
            if self.pending.is_empty() {
                debug!(pairs = self.readers.len(), rounds = round, "final merge batch open");
                return Ok(());
            }
            round += 1;
            let mut out = SpillWriter::create(&mut self.store)?;
            debug!(
                round,
                inputs = self.readers.len(),
                waiting = self.pending.len(),
                output = out.pair().main,
                "merging spill batch to intermediate"
            );
            while self.step(Some(&mut out))? {
                out.write_header(&self.key, &self.value, &self.counts)?;
            }
            let pair = out.finish()?;
            self.readers.clear();
            self.pending.push_back(pair);
        }
    }

    /// Open up to `max_pairs` waiting pairs, skipping empty ones.
    ///
    /// Running out of descriptors shrinks the batch as long as at least
    /// two pairs are open to make progress with.
    fn open_batch(&mut self) -> Result<()> {
        self.readers.clear();
        self.heap = HeapBy::with_capacity(self.max_pairs);
        while self.readers.len() < self.max_pairs {
            let Some(pair) = self.pending.pop_front() else {
                break;
            };
            let mut reader = match SpillReader::open(&self.store, pair, &self.layout) {
                Ok(r) => r,
                Err(e) if is_resource_exhausted(&e) && self.readers.len() >= 2 => {
                    warn!(
                        open = self.readers.len(),
                        "out of file handles; merging a smaller batch"
                    );
                    self.pending.push_front(pair);
                    self.max_pairs = self.readers.len();
                    break;
                }
                Err(e) => return Err(e),
            };
            if reader.advance()? {
                self.readers.push(reader);
                self.push_reader(self.readers.len() - 1);
            } else {
                drop(reader);
                pair.remove(&self.store)?;
            }
        }
        Ok(())
    }

    fn push_reader(&mut self, idx: usize) {
        let readers = &self.readers;
        let keys = &self.key_fields;
        self.heap
            .push(idx, &mut |a: &usize, b: &usize| compare_keys(keys, readers, *a, *b));
    }

    /// Combine every open pair positioned at the smallest key into the
    /// output buffers. Distinct values go to `sink` when given.
    fn step(&mut self, mut sink: Option<&mut SpillWriter>) -> Result<bool> {
        let Some(first) = self.pop_reader() else {
            return Ok(false);
        };
        self.members.clear();
        self.members.push(first);
        while let Some(&top) = self.heap.peek() {
            let same = self
                .key_fields
                .compare_buffers(self.readers[top].key(), self.readers[first].key())
                == Ordering::Equal;
            if !same {
                break;
            }
            self.pop_reader();
            self.members.push(top);
        }

        self.key.copy_from_slice(self.readers[first].key());
        self.value.copy_from_slice(self.readers[first].value());
        for &m in &self.members[1..] {
            self.value_fields.merge_buffers(&mut self.value, self.readers[m].value());
        }

        for col in 0..self.layout.num_distinct() {
            self.counts[col] = if self.members.len() == 1 {
                let reader = &mut self.readers[first];
                match sink.as_deref_mut() {
                    Some(out) => reader.copy_distinct(col, out)?,
                    None => reader.skip_distinct(col)?,
                }
                reader.counts()[col]
            } else {
                merge_distinct_column(
                    &mut self.readers,
                    &self.members,
                    col,
                    self.layout.distinct_widths[col],
                    sink.as_deref_mut(),
                )?
            };
        }
        encode_distinct_counts(&self.layout.distinct_widths, &self.counts, &mut self.distinct);

        for i in 0..self.members.len() {
            let m = self.members[i];
            if self.readers[m].advance()? {
                self.push_reader(m);
            } else {
                self.readers[m].pair().remove(&self.store)?;
            }
        }
        Ok(true)
    }

    fn pop_reader(&mut self) -> Option<usize> {
        let readers = &self.readers;
        let keys = &self.key_fields;
        self.heap
            .pop(&mut |a: &usize, b: &usize| compare_keys(keys, readers, *a, *b))
    }

    /// The next merged bin in ascending key order.
    pub fn next_bin(&mut self) -> Result<Option<BinRef<'_>>> {
        if !self.step(None)? {
            return Ok(None);
        }
        Ok(Some(BinRef {
            key: &self.key,
            value: &self.value,
            distinct: &self.distinct,
            distinct_counts: &self.counts,
        }))
    }
}

fn compare_keys(keys: &FieldList, readers: &[SpillReader], a: usize, b: usize) -> Ordering {
    keys.compare_buffers(readers[a].key(), readers[b].key())
}

/// Merge the ascending runs of one distinct column held by `members`,
/// returning the number of unique values.
fn merge_distinct_column(
    readers: &mut [SpillReader],
    members: &[usize],
    column: usize,
    width: usize,
    mut sink: Option<&mut SpillWriter>,
) -> Result<u64> {
    let mut heads: Vec<Vec<u8>> = vec![vec![0; width]; members.len()];
    let mut remaining: Vec<u64> = members.iter().map(|&m| readers[m].counts()[column]).collect();
    let mut heap = HeapBy::with_capacity(members.len());
    for (i, &m) in members.iter().enumerate() {
        if remaining[i] > 0 {
            readers[m].read_distinct(&mut heads[i])?;
            remaining[i] -= 1;
            heap.push(i, &mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
        }
    }

    let mut last: Vec<u8> = Vec::with_capacity(width);
    let mut count = 0u64;
    while let Some(&i) = heap.peek() {
        if count == 0 || heads[i] != last {
            count += 1;
            last.clear();
            last.extend_from_slice(&heads[i]);
            if let Some(out) = sink.as_deref_mut() {
                out.write_distinct(&heads[i])?;
            }
        }
        if remaining[i] > 0 {
            readers[members[i]].read_distinct(&mut heads[i])?;
            remaining[i] -= 1;
            heap.replace_top(i, &mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
        } else {
            heap.pop(&mut |a: &usize, b: &usize| heads[*a].cmp(&heads[*b]));
        }
    }
    Ok(count)
}

impl std::fmt::Debug for SpillMerge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillMerge")
            .field("open", &self.readers.len())
            .field("waiting", &self.pending.len())
            .finish()
    }
}
