//! Top-N and bottom-N ranking of bins.
//!
//! Bins are offered one at a time. A heap keyed on the primary column keeps
//! the best bins seen so far with the worst of them at the root, so a new
//! bin only has to beat the root to get in.
//!
//! - [`LimitMode::Count`] keeps a heap of exactly N.
//! - [`LimitMode::Threshold`] and [`LimitMode::Percentage`] keep every bin
//!   that meets the cutoff, and [`LimitMode::All`] keeps every bin. These
//!   grow the heap against the memory pool; when the pool refuses, ranking
//!   continues as a fixed-size heap of whatever has been kept.
//!
//! Among bins with equal primary values the one offered first ranks
//! higher.

use std::cmp::Ordering;

use tracing::warn;

use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::FlowRecord;

use crate::algorithms::heap::HeapBy;
use crate::bin::BinRef;
use crate::fields::{BinFields, FieldId, FieldList};
use crate::memory::{MemoryPool, Reservation};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitMode {
    /// Keep every bin, ranked.
    All,
    /// Keep the N best bins.
    Count(u64),
    /// Keep bins whose primary value meets the cutoff.
    Threshold(u64),
    /// Keep bins whose primary value meets this percentage of the total.
    Percentage(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Top,
    Bottom,
}

/// The column bins are ranked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryColumn {
    /// Index into the value field list.
    Value(usize),
    /// Index into the distinct field list; ranks on the unique count.
    Distinct(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankConfig {
    pub mode: LimitMode,
    pub direction: Direction,
    pub primary: PrimaryColumn,
}

impl RankConfig {
    /// Check the configuration against the bin layout.
    pub fn validate(&self, fields: &BinFields) -> Result<()> {
        match self.mode {
            LimitMode::Percentage(p) if !(0.0..=100.0).contains(&p) => {
                return Err(FlowAggError::Config(format!(
                    "Percentage {} is outside 0..100",
                    p
                )));
            }
            _ => {}
        }
        match self.primary {
            PrimaryColumn::Value(i) => {
                let f = fields.value().get(i).ok_or_else(|| {
                    FlowAggError::Config(format!("No value field at position {}", i))
                })?;
                if f.is_caller() {
                    if matches!(self.mode, LimitMode::Threshold(_) | LimitMode::Percentage(_)) {
                        return Err(FlowAggError::Config(format!(
                            "Cannot apply a threshold to caller field {}",
                            f.name()
                        )));
                    }
                } else if f.width() > 8 {
                    return Err(FlowAggError::Config(format!(
                        "Field {} cannot be ranked numerically",
                        f.name()
                    )));
                }
                if matches!(self.mode, LimitMode::Percentage(_))
                    && !matches!(
                        f.id(),
                        Some(FieldId::Records | FieldId::SumBytes | FieldId::SumPackets)
                    )
                {
                    return Err(FlowAggError::Config(format!(
                        "A percentage limit is not supported for field {}",
                        f.name()
                    )));
                }
            }
            PrimaryColumn::Distinct(i) => {
                if i >= fields.num_distinct() {
                    return Err(FlowAggError::Config(format!(
                        "No distinct field at position {}",
                        i
                    )));
                }
                if matches!(self.mode, LimitMode::Percentage(_)) && i != 0 {
                    return Err(FlowAggError::Config(
                        "A percentage limit on a distinct count requires the first distinct field"
                            .into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// What `record` adds to the total a percentage is taken of, for value
/// primaries. Distinct primaries use the total distinct count instead.
pub fn primary_contribution(fields: &BinFields, primary: PrimaryColumn, record: &FlowRecord) -> u64 {
    let PrimaryColumn::Value(i) = primary else {
        return 0;
    };
    match fields.value().get(i).and_then(|f| f.id()) {
        Some(FieldId::Records) => 1,
        Some(FieldId::SumBytes) => u64::from(record.bytes),
        Some(FieldId::SumPackets) => u64::from(record.packets),
        _ => 0,
    }
}

/// An owned copy of a ranked bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedBin {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub distinct: Vec<u8>,
    pub distinct_counts: Vec<u64>,
    /// Primary value, or 0 for caller-field primaries.
    pub primary: u64,
    seq: u64,
}

impl RankedBin {
    fn from_bin(bin: &BinRef<'_>, primary: u64, seq: u64) -> Self {
        RankedBin {
            key: bin.key.to_vec(),
            value: bin.value.to_vec(),
            distinct: bin.distinct.to_vec(),
            distinct_counts: bin.distinct_counts.to_vec(),
            primary,
            seq,
        }
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.len()
            + self.value.len()
            + self.distinct.len()
            + self.distinct_counts.len() * 8
    }

    fn rank(&self) -> Rank<'_> {
        Rank {
            primary: self.primary,
            value: &self.value,
            seq: self.seq,
        }
    }
}

#[derive(Clone, Copy)]
struct Rank<'a> {
    primary: u64,
    value: &'a [u8],
    seq: u64,
}

/// Ordering of bins from worst to best.
struct Ranking {
    direction: Direction,
    caller_column: Option<(FieldList, usize)>,
}

impl Ranking {
    fn cmp(&self, a: Rank<'_>, b: Rank<'_>) -> Ordering {
        let by_primary = match &self.caller_column {
            Some((values, i)) => values.compare_column(*i, a.value, b.value),
            None => a.primary.cmp(&b.primary),
        };
        let by_primary = match self.direction {
            Direction::Top => by_primary,
            Direction::Bottom => by_primary.reverse(),
        };
        // later bins lose ties
        by_primary.then_with(|| b.seq.cmp(&a.seq))
    }
}

/// Result of ranking: bins best first.
#[derive(Debug, Clone)]
pub struct RankedBins {
    pub bins: Vec<RankedBin>,
    /// Total the percentages are taken of, when known.
    pub total: Option<u64>,
    /// Number of bins offered.
    pub entries_seen: u64,
}

impl RankedBins {
    /// Each bin's share of the total and the running share, in percent.
    pub fn percentages(&self) -> Vec<(f64, f64)> {
        let Some(total) = self.total.filter(|&t| t > 0) else {
            return Vec::new();
        };
        let mut cumulative = 0.0;
        self.bins
            .iter()
            .map(|b| {
                let pct = 100.0 * b.primary as f64 / total as f64;
                cumulative += pct;
                (pct, cumulative)
            })
            .collect()
    }
}

pub struct TopNRanker {
    config: RankConfig,
    ranking: Ranking,
    value_fields: FieldList,
    heap: HeapBy<RankedBin>,
    /// Heap size once fixed; `None` while it may grow.
    limit: Option<usize>,
    cutoff: Option<u64>,
    total: Option<u64>,
    seen: u64,
    reservation: Reservation,
}

impl TopNRanker {
    pub fn new(config: RankConfig, fields: &BinFields, pool: &MemoryPool) -> Result<Self> {
        config.validate(fields)?;
        let caller_column = match config.primary {
            PrimaryColumn::Value(i) if fields.value().get(i).is_some_and(|f| f.is_caller()) => {
                Some((fields.value().clone(), i))
            }
            _ => None,
        };
        let limit = match config.mode {
            LimitMode::Count(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            _ => None,
        };
        let cutoff = match config.mode {
            LimitMode::Threshold(t) => Some(t),
            _ => None,
        };
        Ok(TopNRanker {
            ranking: Ranking {
                direction: config.direction,
                caller_column,
            },
            config,
            value_fields: fields.value().clone(),
            heap: HeapBy::new(),
            limit,
            cutoff,
            total: None,
            seen: 0,
            reservation: Reservation::empty(pool),
        })
    }

    pub fn config(&self) -> &RankConfig {
        &self.config
    }

    /// Supply the total percentages are taken of. Required before offering
    /// bins in percentage mode.
    pub fn set_total(&mut self, total: u64) {
        self.total = Some(total);
        if let LimitMode::Percentage(p) = self.config.mode {
            self.cutoff = Some((p * total as f64 / 100.0) as u64);
        }
    }

    fn primary_of(&self, bin: &BinRef<'_>) -> u64 {
        match self.config.primary {
            PrimaryColumn::Value(i) => self.value_fields.column_u64(i, bin.value).unwrap_or(0),
            PrimaryColumn::Distinct(i) => bin.distinct_counts[i],
        }
    }

    fn meets_cutoff(&self, v: u64) -> bool {
        match (self.cutoff, self.config.direction) {
            (None, _) => true,
            (Some(t), Direction::Top) => v >= t,
            (Some(t), Direction::Bottom) => v <= t,
        }
    }

    /// Consider one bin.
    pub fn offer(&mut self, bin: &BinRef<'_>) -> Result<()> {
        if matches!(self.config.mode, LimitMode::Percentage(_)) && self.cutoff.is_none() {
            return Err(FlowAggError::Config(
                "The total must be known before ranking by percentage".into(),
            ));
        }
        let seq = self.seen;
        self.seen += 1;

        let primary = if self.ranking.caller_column.is_some() {
            0
        } else {
            self.primary_of(bin)
        };
        if !self.meets_cutoff(primary) {
            return Ok(());
        }

        let candidate = Rank {
            primary,
            value: bin.value,
            seq,
        };
        let ranking = &self.ranking;
        let mut cmp = |a: &RankedBin, b: &RankedBin| ranking.cmp(a.rank(), b.rank());

        if let Some(limit) = self.limit {
            if self.heap.len() < limit {
                self.heap.push(RankedBin::from_bin(bin, primary, seq), &mut cmp);
            } else if let Some(worst) = self.heap.peek() {
                if ranking.cmp(candidate, worst.rank()) == Ordering::Greater {
                    self.heap
                        .replace_top(RankedBin::from_bin(bin, primary, seq), &mut cmp);
                }
            }
            return Ok(());
        }

        let entry = RankedBin::from_bin(bin, primary, seq);
        if self.reservation.grow(entry.footprint()).is_ok() {
            self.heap.push(entry, &mut cmp);
            return Ok(());
        }
        warn!(
            kept = self.heap.len(),
            "cannot grow the ranking heap; keeping a fixed number of bins"
        );
        self.limit = Some(self.heap.len());
        // the heap no longer grows; hold only what the kept bins occupy
        self.heap.shrink_to_fit();
        let kept = self.heap.iter().map(RankedBin::footprint).sum();
        self.reservation.shrink_to(kept);
        if let Some(worst) = self.heap.peek() {
            if ranking.cmp(entry.rank(), worst.rank()) == Ordering::Greater {
                self.heap.replace_top(entry, &mut cmp);
            }
        }
        Ok(())
    }

    /// Number of bins offered so far.
    pub fn entries_seen(&self) -> u64 {
        self.seen
    }

    /// The kept bins, best first.
    pub fn finish(self) -> RankedBins {
        let ranking = self.ranking;
        let mut bins = self.heap.into_vec();
        bins.sort_by(|a, b| ranking.cmp(b.rank(), a.rank()));
        RankedBins {
            bins,
            total: self.total,
            entries_seen: self.seen,
        }
    }
}
