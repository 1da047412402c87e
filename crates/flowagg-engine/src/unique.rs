//! Random-order aggregation.
//!
//! Records arrive in any order and are binned in a hash table keyed on the
//! key fields. Each bin's value holds the aggregate fields, followed by a
//! handle to its distinct trackers when there are distinct fields.
//!
//! When the memory pool refuses an allocation the table is sorted by key
//! and written out as a spill pair, everything in memory is dropped, and
//! the record is retried against a fresh table. Failing again straight
//! after a spill is fatal. If anything was spilled, output comes from a
//! k-way merge of the spill pairs, otherwise straight from the table.

use std::ops::ControlFlow;
use std::path::Path;

use tracing::{debug, info};

use flowagg_io::TempStore;
use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::FlowRecord;

use crate::algorithms::distinct::{DistinctTracker, TrackerArena};
use crate::algorithms::hash_table::FlatTable;
use crate::algorithms::kway_merge::SpillMerge;
use crate::algorithms::spill::{SpillLayout, SpillPair, SpillWriter};
use crate::algorithms::total_distinct::TotalDistinct;
use crate::bin::{encode_distinct_counts, BinRef};
use crate::config::{ensure_store, UniqueConfig};
use crate::fields::{BinFields, FieldList};
use crate::memory::{MemoryExhausted, MemoryPool};

/// Smallest size estimate for a table created after a spill.
const MIN_TABLE_ESTIMATE: usize = 256;

const HANDLE_WIDTH: usize = std::mem::size_of::<u32>();

enum Output {
    Pending,
    Memory { slots: Vec<usize>, pos: usize },
    Merge(SpillMerge),
}

pub struct Unique {
    fields: BinFields,
    config: UniqueConfig,
    pool: MemoryPool,
    layout: SpillLayout,

    table: Option<FlatTable>,
    arena: TrackerArena,
    total: Option<TotalDistinct>,
    total_count: Option<u64>,

    store: Option<TempStore>,
    spills: Vec<SpillPair>,

    key_buf: Vec<u8>,
    distinct_buf: Vec<u8>,
    counts: Vec<u64>,
    distinct_out: Vec<u8>,
    records: u64,
    output: Output,
}

impl Unique {
    pub fn new(fields: BinFields, config: UniqueConfig) -> Result<Self> {
        config.validate()?;
        if config.total_distinct && fields.num_distinct() == 0 {
            return Err(FlowAggError::Config(
                "Counting total distinct values requires a distinct field".into(),
            ));
        }
        let pool = MemoryPool::new(config.memory_limit);
        let distinct_widths: Vec<usize> = fields.distinct().iter().map(|f| f.width()).collect();
        let layout = SpillLayout {
            key_width: fields.key_width(),
            value_width: fields.value_width(),
            distinct_widths: distinct_widths.clone(),
        };
        let table = FlatTable::with_estimate(
            layout.key_width,
            table_value_width(&fields),
            config.hash_initial_capacity,
            &pool,
        )
        .map_err(|_| out_of_memory("Cannot allocate the bin table"))?;
        let total = if config.total_distinct {
            Some(
                TotalDistinct::new(distinct_widths[0], &pool)
                    .map_err(|_| out_of_memory("Cannot allocate the total-distinct tracker"))?,
            )
        } else {
            None
        };
        debug!(
            key_width = layout.key_width,
            value_width = layout.value_width,
            distinct = layout.num_distinct(),
            capacity = table.capacity(),
            "created aggregator"
        );
        Ok(Unique {
            arena: TrackerArena::new(distinct_widths, &pool),
            key_buf: vec![0; fields.key_width()],
            distinct_buf: vec![0; fields.distinct_width()],
            counts: vec![0; fields.num_distinct()],
            distinct_out: vec![0; fields.distinct_width()],
            fields,
            config,
            pool,
            layout,
            table: Some(table),
            total,
            total_count: None,
            store: None,
            spills: Vec::new(),
            records: 0,
            output: Output::Pending,
        })
    }

    pub fn fields(&self) -> &BinFields {
        &self.fields
    }

    /// The pool every allocation of this aggregator is charged to.
    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Records added so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Spill pairs written so far.
    pub fn spill_count(&self) -> usize {
        self.spills.len()
    }

    /// The spill directory, once one exists.
    pub fn temp_dir(&self) -> Option<&Path> {
        match &self.output {
            Output::Merge(m) => Some(m.store().dir()),
            _ => self.store.as_ref().map(TempStore::dir),
        }
    }

    /// Fold one record into its bin.
    pub fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        if !matches!(self.output, Output::Pending) {
            return Err(FlowAggError::Config(
                "Cannot add records once output has started".into(),
            ));
        }
        self.fields.key().record_to_binary(record, &mut self.key_buf);
        self.fields.distinct().record_to_binary(record, &mut self.distinct_buf);

        if self.try_apply(record).is_err() {
            self.spill(true)?;
            self.try_apply(record)
                .map_err(|_| out_of_memory("Record does not fit in memory after spilling"))?;
        }

        if self.total.is_some() {
            let width = self.layout.distinct_widths[0];
            if self.try_add_total(width).is_err() {
                self.spill(true)?;
                self.try_add_total(width).map_err(|_| {
                    out_of_memory("Total-distinct value does not fit in memory after spilling")
                })?;
            }
        }
        self.records += 1;
        Ok(())
    }

    fn try_add_total(&mut self, width: usize) -> std::result::Result<(), MemoryExhausted> {
        match &mut self.total {
            Some(td) => td.try_add(&self.distinct_buf[..width]).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Apply the record held in the key and distinct buffers. On failure the
    /// bin's value is untouched; distinct values may have been partly
    /// counted, which a later merge absorbs.
    fn try_apply(&mut self, record: &FlowRecord) -> std::result::Result<(), MemoryExhausted> {
        let table = self.table.as_mut().ok_or(MemoryExhausted)?;
        let vw = self.layout.value_width;
        let has_distinct = self.layout.has_distinct();
        let slot = match table.find(&self.key_buf) {
            Some(slot) => {
                if has_distinct {
                    let handle = read_handle(table.value(slot), vw);
                    increment_all(
                        self.arena.group_mut(handle),
                        self.fields.distinct(),
                        &self.distinct_buf,
                    )?;
                }
                slot
            }
            None => {
                // trackers first: a group nobody points to is harmless
                let handle = if has_distinct {
                    let h = self.arena.allocate()?;
                    increment_all(
                        self.arena.group_mut(h),
                        self.fields.distinct(),
                        &self.distinct_buf,
                    )?;
                    Some(h)
                } else {
                    None
                };
                let slot = table.insert(&self.key_buf)?.slot;
                let value = table.value_mut(slot);
                self.fields.value().initialize_buffer(&mut value[..vw]);
                if let Some(h) = handle {
                    value[vw..].copy_from_slice(&h.to_ne_bytes());
                }
                slot
            }
        };
        self.fields
            .value()
            .add_record_to_buffer(record, &mut table.value_mut(slot)[..vw]);
        Ok(())
    }

    /// Write the table to a new spill pair and free everything in memory.
    fn spill(&mut self, recreate: bool) -> Result<()> {
        let store = ensure_store(&mut self.store, &self.config)?;
        let mut live = 0;
        if let Some(table) = self.table.take() {
            live = table.len();
            if !table.is_empty() {
                let pair = write_table(
                    store,
                    &self.layout,
                    &table,
                    &self.arena,
                    self.fields.key(),
                )?;
                debug!(
                    entries = live,
                    file = pair.main,
                    spill = self.spills.len(),
                    "spilled bin table"
                );
                self.spills.push(pair);
            }
        }
        self.arena.clear();
        if let Some(td) = &mut self.total {
            td.spill(store)?;
        }
        if recreate {
            let estimate = (live / 2).max(MIN_TABLE_ESTIMATE);
            let table = FlatTable::with_estimate(
                self.layout.key_width,
                table_value_width(&self.fields),
                estimate,
                &self.pool,
            )
            .map_err(|_| out_of_memory("Cannot allocate a bin table after spilling"))?;
            self.table = Some(table);
        }
        Ok(())
    }

    /// Finish ingest and set up output. Called implicitly by the output
    /// methods.
    pub fn prepare_for_output(&mut self) -> Result<()> {
        if !matches!(self.output, Output::Pending) {
            return Ok(());
        }
        if self.spills.is_empty() {
            if let Some(td) = self.total.take() {
                self.total_count = Some(td.finish(self.store.as_mut(), self.config.max_open_files)?);
            }
            let slots = match &self.table {
                Some(t) if self.config.sort_output => {
                    let keys = self.fields.key();
                    t.sorted_slots(|a, b| keys.compare_buffers(a, b))
                }
                Some(t) => t.slots().collect(),
                None => Vec::new(),
            };
            self.output = Output::Memory { slots, pos: 0 };
            return Ok(());
        }

        self.spill(false)?;
        if let Some(td) = self.total.take() {
            self.total_count = Some(td.finish(self.store.as_mut(), self.config.max_open_files)?);
        }
        let store = self
            .store
            .take()
            .ok_or_else(|| FlowAggError::Config("spill directory unavailable".into()))?;
        info!(
            pairs = self.spills.len(),
            records = self.records,
            "merging spill files"
        );
        let merge = SpillMerge::new(
            store,
            self.layout.clone(),
            self.fields.key().clone(),
            self.fields.value().clone(),
            std::mem::take(&mut self.spills),
            self.config.max_open_files,
        )?;
        self.output = Output::Merge(merge);
        Ok(())
    }

    /// Unique values of the first distinct field over all records, when
    /// counting was enabled.
    pub fn total_distinct_count(&mut self) -> Result<Option<u64>> {
        self.prepare_for_output()?;
        Ok(self.total_count)
    }

    /// The next bin. Bins are in key order when read back from spill files
    /// or when `sort_output` is set.
    pub fn next_bin(&mut self) -> Result<Option<BinRef<'_>>> {
        self.prepare_for_output()?;
        match &mut self.output {
            Output::Pending => Ok(None),
            Output::Merge(merge) => merge.next_bin(),
            Output::Memory { slots, pos } => {
                let Some(&slot) = slots.get(*pos) else {
                    return Ok(None);
                };
                *pos += 1;
                let Some(table) = &self.table else {
                    return Ok(None);
                };
                let vw = self.layout.value_width;
                let stored = table.value(slot);
                if self.layout.has_distinct() {
                    let group = self.arena.group(read_handle(stored, vw));
                    for (c, t) in self.counts.iter_mut().zip(group) {
                        *c = t.count();
                    }
                    encode_distinct_counts(
                        &self.layout.distinct_widths,
                        &self.counts,
                        &mut self.distinct_out,
                    );
                }
                Ok(Some(BinRef {
                    key: table.key(slot),
                    value: &stored[..vw],
                    distinct: &self.distinct_out,
                    distinct_counts: &self.counts,
                }))
            }
        }
    }

    /// Hand every bin to `callback` until it breaks or the bins run out.
    pub fn process<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        while let Some(bin) = self.next_bin()? {
            if callback(&bin).is_break() {
                debug!("output stopped by caller");
                break;
            }
        }
        Ok(())
    }
}

fn table_value_width(fields: &BinFields) -> usize {
    if fields.num_distinct() > 0 {
        fields.value_width() + HANDLE_WIDTH
    } else {
        fields.value_width()
    }
}

fn read_handle(stored: &[u8], value_width: usize) -> u32 {
    let mut bytes = [0u8; HANDLE_WIDTH];
    bytes.copy_from_slice(&stored[value_width..value_width + HANDLE_WIDTH]);
    u32::from_ne_bytes(bytes)
}

fn increment_all(
    group: &mut [DistinctTracker],
    distinct: &FieldList,
    row: &[u8],
) -> std::result::Result<(), MemoryExhausted> {
    for (i, tracker) in group.iter_mut().enumerate() {
        tracker.increment(distinct.column(i, row))?;
    }
    Ok(())
}

fn write_table(
    store: &mut TempStore,
    layout: &SpillLayout,
    table: &FlatTable,
    arena: &TrackerArena,
    keys: &FieldList,
) -> Result<SpillPair> {
    let vw = layout.value_width;
    let mut out = SpillWriter::create(store)?;
    for slot in table.sorted_slots(|a, b| keys.compare_buffers(a, b)) {
        let stored = table.value(slot);
        let trackers = if layout.has_distinct() {
            arena.group(read_handle(stored, vw))
        } else {
            &[]
        };
        out.write_bin(table.key(slot), &stored[..vw], trackers)?;
    }
    out.finish()
}

fn out_of_memory(what: &str) -> FlowAggError {
    FlowAggError::OutOfMemory(what.to_string())
}
