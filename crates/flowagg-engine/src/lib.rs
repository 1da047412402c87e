//! Group-by aggregation over flow records.
//!
//! Records are binned by a key built from caller-chosen fields; each bin
//! accumulates value fields (sums, minimums, maximums) and counts distinct
//! values of further fields. Two drivers are provided:
//!
//! - [`Unique`] takes records in any order, holding bins in a hash table
//!   and spilling sorted runs to disk when memory runs out;
//! - [`PresortedUnique`] merges inputs already sorted by key and usually
//!   never touches disk.
//!
//! [`TopNRanker`] ranks the bins either driver produces, and
//! [`ProtocolStatistics`] summarizes records by protocol.

pub mod algorithms;
pub mod bin;
pub mod config;
pub mod fields;
pub mod interval_stats;
pub mod memory;
pub mod presorted;
pub mod topn;
pub mod unique;

pub use bin::BinRef;
pub use config::UniqueConfig;
pub use fields::{BinFields, CallerField, FieldContext, FieldId, FieldList, TimeBin};
pub use interval_stats::{IntervalStats, ProtocolStatistics, ProtocolSummary};
pub use memory::{MemoryExhausted, MemoryPool};
pub use presorted::{IterSource, PresortedUnique, RecordSource};
pub use topn::{Direction, LimitMode, PrimaryColumn, RankConfig, RankedBin, RankedBins, TopNRanker};
pub use unique::Unique;
