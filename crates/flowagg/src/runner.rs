//! rwuniq- and rwstats-style runs over the engine.
//!
//! Both runners accept records either one at a time (random order) or as
//! key-sorted inputs (presorted order), then produce their output in a
//! single call.

use std::ops::ControlFlow;

use tracing::debug;

use flowagg_engine::presorted::{PresortedUnique, RecordSource};
use flowagg_engine::topn::{primary_contribution, LimitMode, PrimaryColumn, RankConfig, RankedBins, TopNRanker};
use flowagg_engine::{BinFields, BinRef, MemoryPool, ProtocolStatistics, Unique, UniqueConfig};
use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::FlowRecord;

use crate::limits::OutputLimits;

/// How records reach a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputOrder {
    /// Records in any order, added one at a time or drained from inputs.
    #[default]
    Random,
    /// Inputs each sorted by key.
    Presorted,
}

enum Driver {
    Random(Unique),
    Presorted(PresortedUnique),
}

impl Driver {
    fn new(order: InputOrder, fields: BinFields, config: UniqueConfig) -> Result<Self> {
        Ok(match order {
            InputOrder::Random => Driver::Random(Unique::new(fields, config)?),
            InputOrder::Presorted => Driver::Presorted(PresortedUnique::new(fields, config)?),
        })
    }

    fn fields(&self) -> &BinFields {
        match self {
            Driver::Random(u) => u.fields(),
            Driver::Presorted(p) => p.fields(),
        }
    }

    fn pool(&self) -> &MemoryPool {
        match self {
            Driver::Random(u) => u.pool(),
            Driver::Presorted(p) => p.pool(),
        }
    }

    fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        match self {
            Driver::Random(u) => u.add_record(record),
            Driver::Presorted(_) => Err(FlowAggError::Config(
                "Presorted runs take whole inputs, not single records".into(),
            )),
        }
    }

    /// Random mode reads the input to the end right away; presorted mode
    /// queues it for the merge.
    fn add_input<S>(&mut self, mut source: S, mut observe: impl FnMut(&FlowRecord)) -> Result<()>
    where
        S: RecordSource + 'static,
    {
        match self {
            Driver::Random(u) => {
                while let Some(record) = source.next_record()? {
                    observe(&record);
                    u.add_record(&record)?;
                }
                Ok(())
            }
            Driver::Presorted(p) => {
                p.add_input(source);
                Ok(())
            }
        }
    }

    fn process<F>(&mut self, callback: F) -> Result<Option<u64>>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        match self {
            Driver::Random(u) => {
                u.process(callback)?;
                u.total_distinct_count()
            }
            Driver::Presorted(p) => {
                p.process(callback)?;
                Ok(p.total_distinct_count())
            }
        }
    }
}

/// An owned copy of one output bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueBin {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub distinct: Vec<u8>,
    pub distinct_counts: Vec<u64>,
}

impl From<&BinRef<'_>> for UniqueBin {
    fn from(bin: &BinRef<'_>) -> Self {
        UniqueBin {
            key: bin.key.to_vec(),
            value: bin.value.to_vec(),
            distinct: bin.distinct.to_vec(),
            distinct_counts: bin.distinct_counts.to_vec(),
        }
    }
}

/// Summary of a completed [`UniqRunner::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqSummary {
    /// Bins handed to the callback.
    pub bins: u64,
    /// Bins dropped by the output limits.
    pub suppressed: u64,
    pub total_distinct: Option<u64>,
}

/// Every bin within the output limits, optionally in key order.
pub struct UniqRunner {
    driver: Driver,
    limits: OutputLimits,
}

impl UniqRunner {
    pub fn new(order: InputOrder, fields: BinFields, config: UniqueConfig) -> Result<Self> {
        Ok(UniqRunner {
            driver: Driver::new(order, fields, config)?,
            limits: OutputLimits::new(),
        })
    }

    pub fn fields(&self) -> &BinFields {
        self.driver.fields()
    }

    /// Report only bins within `limits`.
    pub fn set_limits(&mut self, limits: OutputLimits) -> Result<()> {
        limits.validate(self.driver.fields())?;
        self.limits = limits;
        Ok(())
    }

    pub fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        self.driver.add_record(record)
    }

    pub fn add_input<S>(&mut self, source: S) -> Result<()>
    where
        S: RecordSource + 'static,
    {
        self.driver.add_input(source, |_| {})
    }

    /// Hand every bin within the limits to `callback`.
    pub fn run<F>(&mut self, mut callback: F) -> Result<UniqSummary>
    where
        F: FnMut(&BinRef<'_>) -> ControlFlow<()>,
    {
        let Self { driver, limits } = self;
        let values = driver.fields().value().clone();
        let mut bins = 0;
        let mut suppressed = 0;
        let total_distinct = driver.process(|b| {
            if !limits.admits(&values, b) {
                suppressed += 1;
                return ControlFlow::Continue(());
            }
            bins += 1;
            callback(b)
        })?;
        if suppressed > 0 {
            debug!(bins, suppressed, "output limits applied");
        }
        Ok(UniqSummary {
            bins,
            suppressed,
            total_distinct,
        })
    }

    /// Run and keep every bin.
    pub fn collect(&mut self) -> Result<(Vec<UniqueBin>, UniqSummary)> {
        let mut out = Vec::new();
        let summary = self.run(|b| {
            out.push(UniqueBin::from(b));
            ControlFlow::Continue(())
        })?;
        Ok((out, summary))
    }
}

/// Bins ranked on one column.
pub struct StatsRunner {
    driver: Driver,
    rank: RankConfig,
    /// Sum of each record's contribution to a value primary.
    total: u64,
}

impl StatsRunner {
    pub fn new(
        order: InputOrder,
        fields: BinFields,
        mut config: UniqueConfig,
        rank: RankConfig,
    ) -> Result<Self> {
        rank.validate(&fields)?;
        if let LimitMode::Percentage(_) = rank.mode {
            if order == InputOrder::Presorted {
                return Err(FlowAggError::Config(
                    "A percentage limit needs the total before ranking and is not available for presorted input"
                        .into(),
                ));
            }
            if let PrimaryColumn::Distinct(_) = rank.primary {
                config.total_distinct = true;
            }
        }
        Ok(StatsRunner {
            driver: Driver::new(order, fields, config)?,
            rank,
            total: 0,
        })
    }

    pub fn fields(&self) -> &BinFields {
        self.driver.fields()
    }

    pub fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        self.driver.add_record(record)?;
        self.total += primary_contribution(self.driver.fields(), self.rank.primary, record);
        Ok(())
    }

    pub fn add_input<S>(&mut self, source: S) -> Result<()>
    where
        S: RecordSource + 'static,
    {
        let Self {
            driver,
            rank,
            total,
            ..
        } = self;
        let fields = driver.fields().clone();
        driver.add_input(source, |r| *total += primary_contribution(&fields, rank.primary, r))
    }

    /// Rank every bin.
    pub fn run(mut self) -> Result<RankedBins> {
        // ranking shares the aggregator's limit
        let pool = self.driver.pool().clone();
        let mut ranker = TopNRanker::new(self.rank, self.driver.fields(), &pool)?;
        if let LimitMode::Percentage(_) = self.rank.mode {
            let total = match (self.rank.primary, &mut self.driver) {
                (PrimaryColumn::Distinct(_), Driver::Random(u)) => {
                    u.total_distinct_count()?.unwrap_or(0)
                }
                _ => self.total,
            };
            debug!(total, "ranking by percentage of total");
            ranker.set_total(total);
        }

        let mut failed = None;
        self.driver.process(|b| match ranker.offer(b) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                failed = Some(e);
                ControlFlow::Break(())
            }
        })?;
        if let Some(e) = failed {
            return Err(e);
        }
        Ok(ranker.finish())
    }
}

/// Overall and per-protocol statistics of every record in `source`.
pub fn protocol_statistics<S>(mut source: S, detail_protocols: &[u8]) -> Result<ProtocolStatistics>
where
    S: RecordSource,
{
    let mut stats = ProtocolStatistics::new(detail_protocols);
    while let Some(record) = source.next_record()? {
        stats.add_record(&record);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowagg_engine::fields::{FieldId, FieldList};
    use flowagg_engine::topn::Direction;

    fn config(dir: &std::path::Path) -> UniqueConfig {
        UniqueConfig {
            temp_dir: Some(dir.to_path_buf()),
            sort_output: true,
            total_distinct: false,
            hash_initial_capacity: 64,
            memory_limit: 16 << 20,
            max_open_files: 16,
            spill_compression: false,
        }
    }

    fn proto_bytes() -> BinFields {
        BinFields::new(
            FieldList::from_ids(&[FieldId::Proto]).unwrap(),
            FieldList::from_ids(&[FieldId::SumBytes]).unwrap(),
            FieldList::new(),
        )
        .unwrap()
    }

    fn rec(proto: u8, bytes: u32) -> FlowRecord {
        FlowRecord {
            proto,
            bytes,
            packets: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_presorted_rejects_single_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = UniqRunner::new(InputOrder::Presorted, proto_bytes(), config(dir.path())).unwrap();
        let err = r.add_record(&rec(6, 1)).unwrap_err();
        assert_eq!(err.code(), flowagg_types::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_uniq_collect_counts_bins() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = UniqRunner::new(InputOrder::Random, proto_bytes(), config(dir.path())).unwrap();
        r.add_input(vec![rec(17, 5), rec(6, 10), rec(6, 1)].into_iter())
            .unwrap();
        let (bins, summary) = r.collect().unwrap();
        assert_eq!(summary.bins, 2);
        assert_eq!(bins[0].key, vec![6]);
        assert_eq!(bins[0].value, 11u64.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_percentage_total_from_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let rank = RankConfig {
            mode: LimitMode::Percentage(25.0),
            direction: Direction::Top,
            primary: PrimaryColumn::Value(0),
        };
        let mut r = StatsRunner::new(InputOrder::Random, proto_bytes(), config(dir.path()), rank).unwrap();
        r.add_input(vec![rec(6, 600), rec(17, 300), rec(1, 100)].into_iter())
            .unwrap();
        let ranked = r.run().unwrap();
        assert_eq!(ranked.total, Some(1000));
        let primaries: Vec<u64> = ranked.bins.iter().map(|b| b.primary).collect();
        assert_eq!(primaries, vec![600, 300]);
        assert_eq!(ranked.entries_seen, 3);
    }

    #[test]
    fn test_ranking_shares_aggregator_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        // the table alone takes about 40 KiB; ranking all 300 bins needs ~36 KiB more
        cfg.hash_initial_capacity = 3000;
        cfg.memory_limit = 64 << 10;
        let fields = BinFields::new(
            FieldList::from_ids(&[FieldId::DPort]).unwrap(),
            FieldList::from_ids(&[FieldId::SumBytes]).unwrap(),
            FieldList::new(),
        )
        .unwrap();
        let rank = RankConfig {
            mode: LimitMode::All,
            direction: Direction::Top,
            primary: PrimaryColumn::Value(0),
        };
        let mut r = StatsRunner::new(InputOrder::Random, fields, cfg, rank).unwrap();
        for dport in 0..300u16 {
            r.add_record(&FlowRecord {
                dport,
                bytes: u32::from(dport),
                ..Default::default()
            })
            .unwrap();
        }
        let ranked = r.run().unwrap();
        assert_eq!(ranked.entries_seen, 300);
        let kept = ranked.bins.len();
        assert!(kept > 0 && kept < 300, "kept {kept}");
        // the fixed heap still holds the largest bins
        assert_eq!(ranked.bins[0].primary, 299);
        assert!(ranked.bins.windows(2).all(|w| w[0].primary > w[1].primary));
    }

    #[test]
    fn test_percentage_rejected_for_presorted() {
        let dir = tempfile::tempdir().unwrap();
        let rank = RankConfig {
            mode: LimitMode::Percentage(10.0),
            direction: Direction::Top,
            primary: PrimaryColumn::Value(0),
        };
        let err = StatsRunner::new(InputOrder::Presorted, proto_bytes(), config(dir.path()), rank)
            .err()
            .unwrap();
        assert!(matches!(err, FlowAggError::Config(_)));
    }

    #[test]
    fn test_protocol_statistics_from_source() {
        let stats =
            protocol_statistics(vec![rec(6, 400), rec(17, 60)].into_iter(), &[6]).unwrap();
        assert_eq!(stats.overall().records, 2);
        assert_eq!(stats.protocol(6).unwrap().bytes.max(), Some(400));
    }
}
