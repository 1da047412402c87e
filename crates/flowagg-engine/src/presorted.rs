//! Aggregation of inputs already sorted by key.
//!
//! The inputs are merged on key, and all records with the current smallest
//! key, from every input, are folded into a single bin before any input
//! moves on. Bins therefore complete in key order and normally go straight
//! to the caller without touching disk.
//!
//! Two things force bins through spill files instead:
//!
//! - more inputs than `max_open_files`: inputs are merged in groups, each
//!   group's bins are written to spill pairs, and the pairs are merged at
//!   the end;
//! - a bin whose distinct values do not fit in memory: what it holds so far
//!   is written as a partial bin, its trackers start over, and the merge
//!   recombines the pieces. Every later bin is spilled as well so output
//!   stays in key order.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use flowagg_io::TempStore;
use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::FlowRecord;

use crate::algorithms::distinct::DistinctTracker;
use crate::algorithms::heap::HeapBy;
use crate::algorithms::kway_merge::SpillMerge;
use crate::algorithms::spill::{SpillLayout, SpillPair, SpillWriter};
use crate::algorithms::total_distinct::TotalDistinct;
use crate::bin::{encode_distinct_counts, BinRef};
use crate::config::{ensure_store, UniqueConfig};
use crate::fields::{BinFields, FieldList};
use crate::memory::MemoryPool;

/// A sorted stream of records.
pub trait RecordSource {
    /// The next record, or `None` at the end of the stream.
    fn next_record(&mut self) -> Result<Option<FlowRecord>>;
}

impl RecordSource for std::vec::IntoIter<FlowRecord> {
    fn next_record(&mut self) -> Result<Option<FlowRecord>> {
        Ok(self.next())
    }
}

/// Adapts an iterator of fallible records.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<FlowRecord>>,
{
    pub fn new(iter: I) -> Self {
        IterSource { iter }
    }
}

impl<I> RecordSource for IterSource<I>
where
    I: Iterator<Item = Result<FlowRecord>>,
{
    fn next_record(&mut self) -> Result<Option<FlowRecord>> {
        self.iter.next().transpose()
    }
}

/// The bin under construction.
struct BinState {
    key: Vec<u8>,
    value: Vec<u8>,
    trackers: Vec<DistinctTracker>,
    counts: Vec<u64>,
    distinct_out: Vec<u8>,
}

impl BinState {
    fn new(fields: &BinFields, pool: &MemoryPool) -> Result<Self> {
        let trackers = fields
            .distinct()
            .iter()
            .map(|f| DistinctTracker::new(f.width(), pool))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| out_of_memory("Cannot allocate distinct trackers"))?;
        Ok(BinState {
            key: vec![0; fields.key_width()],
            value: vec![0; fields.value_width()],
            trackers,
            counts: vec![0; fields.num_distinct()],
            distinct_out: vec![0; fields.distinct_width()],
        })
    }

    fn start(&mut self, key: &[u8], values: &FieldList) {
        self.key.copy_from_slice(key);
        self.restart(values);
    }

    /// Empty the value and the trackers, keeping the key.
    fn restart(&mut self, values: &FieldList) {
        values.initialize_buffer(&mut self.value);
        for t in self.trackers.iter_mut().filter(|t| !t.is_empty()) {
            t.reset();
        }
    }
}

pub struct PresortedUnique {
    fields: BinFields,
    config: UniqueConfig,
    pool: MemoryPool,
    layout: SpillLayout,
    inputs: Vec<Box<dyn RecordSource>>,

    store: Option<TempStore>,
    writer: Option<SpillWriter>,
    spills: Vec<SpillPair>,
    /// Set once a partial bin has been written; later bins are spilled.
    spilling: bool,

    total: Option<TotalDistinct>,
    total_count: Option<u64>,
    distinct_buf: Vec<u8>,
    records: u64,
    processed: bool,
}

impl PresortedUnique {
    pub fn new(fields: BinFields, config: UniqueConfig) -> Result<Self> {
        config.validate()?;
        if config.total_distinct && fields.num_distinct() == 0 {
            return Err(FlowAggError::Config(
                "Counting total distinct values requires a distinct field".into(),
            ));
        }
        let pool = MemoryPool::new(config.memory_limit);
        let layout = SpillLayout {
            key_width: fields.key_width(),
            value_width: fields.value_width(),
            distinct_widths: fields.distinct().iter().map(|f| f.width()).collect(),
        };
        let total = if config.total_distinct {
            Some(
                TotalDistinct::new(layout.distinct_widths[0], &pool)
                    .map_err(|_| out_of_memory("Cannot allocate the total-distinct tracker"))?,
            )
        } else {
            None
        };
        Ok(PresortedUnique {
            distinct_buf: vec![0; fields.distinct_width()],
            fields,
            config,
            pool,
            layout,
            inputs: Vec::new(),
            store: None,
            writer: None,
            spills: Vec::new(),
            spilling: false,
            total,
            total_count: None,
            records: 0,
            processed: false,
        })
    }

    pub fn fields(&self) -> &BinFields {
        &self.fields
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Queue a sorted input.
    pub fn add_input<S>(&mut self, source: S)
    where
        S: RecordSource + 'static,
    {
        self.inputs.push(Box::new(source));
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Records read by [`PresortedUnique::process`].
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Spill pairs written so far.
    pub fn spill_count(&self) -> usize {
        self.spills.len()
    }

    /// Unique values of the first distinct field, available after
    /// [`PresortedUnique::process`] when counting was enabled.
    pub fn total_distinct_count(&self) -> Option<u64> {
        self.total_count
    }

    /// Read every input and hand each bin to `callback` in key order.
    pub fn process<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        if self.processed {
            return Err(FlowAggError::Config("Inputs have already been processed".into()));
        }
        self.processed = true;

        let batch_size = self.config.max_open_files;
        let mut inputs = std::mem::take(&mut self.inputs);
        let batched = inputs.len() > batch_size;
        if batched {
            info!(
                inputs = inputs.len(),
                batch_size, "too many inputs to merge at once; merging in groups"
            );
        }
        let mut bin = BinState::new(&self.fields, &self.pool)?;
        let mut stopped = false;
        while !inputs.is_empty() && !stopped {
            let rest = inputs.split_off(batch_size.min(inputs.len()));
            let batch = std::mem::replace(&mut inputs, rest);
            stopped = self.merge_inputs(batch, &mut bin, batched, &mut callback)?;
            self.close_writer()?;
        }
        drop(bin);

        if let Some(td) = self.total.take() {
            self.total_count = Some(td.finish(self.store.as_mut(), self.config.max_open_files)?);
        }
        if stopped || self.spills.is_empty() {
            return Ok(());
        }

        let store = self
            .store
            .take()
            .ok_or_else(|| FlowAggError::Config("spill directory unavailable".into()))?;
        info!(pairs = self.spills.len(), "merging presorted spill files");
        let mut merge = SpillMerge::new(
            store,
            self.layout.clone(),
            self.fields.key().clone(),
            self.fields.value().clone(),
            std::mem::take(&mut self.spills),
            self.config.max_open_files,
        )?;
        while let Some(b) = merge.next_bin()? {
            if callback(&b).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Merge one group of inputs. Returns true if the caller stopped output.
    fn merge_inputs<F>(
        &mut self,
        mut sources: Vec<Box<dyn RecordSource>>,
        bin: &mut BinState,
        spill_all: bool,
        callback: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        let keys_fl = self.fields.key().clone();
        let n = sources.len();
        let mut heads = vec![FlowRecord::default(); n];
        let mut keys = vec![vec![0u8; self.layout.key_width]; n];
        let mut heap = HeapBy::with_capacity(n);

        for s in 0..n {
            if let Some(r) = sources[s].next_record()? {
                keys_fl.record_to_binary(&r, &mut keys[s]);
                heads[s] = r;
                heap.push(s, &mut |a: &usize, b: &usize| {
                    keys_fl.compare_buffers(&keys[*a], &keys[*b])
                });
            }
        }

        while let Some(&first) = heap.peek() {
            bin.start(&keys[first], self.fields.value());
            while let Some(&s) = heap.peek() {
                if keys_fl.compare_buffers(&keys[s], &bin.key) != Ordering::Equal {
                    break;
                }
                heap.pop(&mut |a: &usize, b: &usize| {
                    keys_fl.compare_buffers(&keys[*a], &keys[*b])
                });
                // drain this input while it stays on the bin's key
                loop {
                    self.apply(bin, &heads[s])?;
                    let Some(r) = sources[s].next_record()? else {
                        break;
                    };
                    keys_fl.record_to_binary(&r, &mut keys[s]);
                    heads[s] = r;
                    match keys_fl.compare_buffers(&keys[s], &bin.key) {
                        Ordering::Equal => continue,
                        Ordering::Greater => {
                            heap.push(s, &mut |a: &usize, b: &usize| {
                                keys_fl.compare_buffers(&keys[*a], &keys[*b])
                            });
                            break;
                        }
                        Ordering::Less => {
                            return Err(FlowAggError::InputUnsorted(format!(
                                "key decreased in input {} after {} records",
                                s, self.records
                            )));
                        }
                    }
                }
            }
            if self.emit(bin, spill_all, callback)?.is_break() {
                debug!("output stopped by caller");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn apply(&mut self, bin: &mut BinState, record: &FlowRecord) -> Result<()> {
        self.records += 1;
        self.fields
            .distinct()
            .record_to_binary(record, &mut self.distinct_buf);

        let mut col = 0;
        let mut flushed = false;
        while col < bin.trackers.len() {
            let value = self.fields.distinct().column(col, &self.distinct_buf);
            match bin.trackers[col].increment(value) {
                Ok(_) => col += 1,
                Err(_) if !flushed => {
                    self.flush_partial(bin)?;
                    flushed = true;
                }
                Err(_) => {
                    return Err(out_of_memory(
                        "Distinct value does not fit in memory after spilling",
                    ))
                }
            }
        }
        self.fields.value().add_record_to_buffer(record, &mut bin.value);

        if let Some(td) = &mut self.total {
            let value = &self.distinct_buf[..self.layout.distinct_widths[0]];
            if td.try_add(value).is_err() {
                let store = ensure_store(&mut self.store, &self.config)?;
                td.spill(store)?;
                td.try_add(value).map_err(|_| {
                    out_of_memory("Total-distinct value does not fit in memory after spilling")
                })?;
            }
        }
        Ok(())
    }

    /// Write what `bin` holds as a partial bin in its own spill pair, then
    /// empty it. Releases the total-distinct tracker's memory as well.
    fn flush_partial(&mut self, bin: &mut BinState) -> Result<()> {
        warn!(
            counts = ?bin.trackers.iter().map(DistinctTracker::count).collect::<Vec<_>>(),
            "distinct values of one bin exceed memory; writing a partial bin"
        );
        self.ensure_writer()?
            .write_bin(&bin.key, &bin.value, &bin.trackers)?;
        // a pair never holds the same key twice
        self.close_writer()?;
        self.spilling = true;
        bin.restart(self.fields.value());
        if let Some(td) = &mut self.total {
            let store = ensure_store(&mut self.store, &self.config)?;
            td.spill(store)?;
        }
        Ok(())
    }

    fn emit<F>(
        &mut self,
        bin: &mut BinState,
        spill_all: bool,
        callback: &mut F,
    ) -> Result<ControlFlow<()>>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        if spill_all || self.spilling {
            self.ensure_writer()?
                .write_bin(&bin.key, &bin.value, &bin.trackers)?;
            return Ok(ControlFlow::Continue(()));
        }
        for (c, t) in bin.counts.iter_mut().zip(&bin.trackers) {
            *c = t.count();
        }
        encode_distinct_counts(&self.layout.distinct_widths, &bin.counts, &mut bin.distinct_out);
        Ok(callback(&BinRef {
            key: &bin.key,
            value: &bin.value,
            distinct: &bin.distinct_out,
            distinct_counts: &bin.counts,
        }))
    }

    fn ensure_writer(&mut self) -> Result<&mut SpillWriter> {
        if self.writer.is_none() {
            let store = ensure_store(&mut self.store, &self.config)?;
            self.writer = Some(SpillWriter::create(store)?);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| FlowAggError::Config("spill writer unavailable".into()))
    }

    fn close_writer(&mut self) -> Result<()> {
        if let Some(w) = self.writer.take() {
            let bins = w.bins();
            let pair = w.finish()?;
            debug!(bins, file = pair.main, "closed presorted spill pair");
            self.spills.push(pair);
        }
        Ok(())
    }
}

fn out_of_memory(what: &str) -> FlowAggError {
    FlowAggError::OutOfMemory(what.to_string())
}
