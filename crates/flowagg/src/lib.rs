//! Flow record aggregation in the style of rwuniq and rwstats.
//!
//! [`UniqRunner`] reports every bin, [`StatsRunner`] ranks bins on one
//! column, and [`protocol_statistics`] summarizes traffic by protocol.
//! The engine types are re-exported for building field lists and
//! configurations.

pub mod limits;
pub mod runner;
pub mod stream;

pub use limits::{Limit, OutputLimits};
pub use runner::{protocol_statistics, InputOrder, StatsRunner, UniqRunner, UniqSummary, UniqueBin};
pub use stream::{ingest_blocking, ingest_stream, RecordSink};

pub use flowagg_engine::{
    BinFields, BinRef, CallerField, Direction, FieldId, FieldList, IterSource, LimitMode,
    PrimaryColumn, ProtocolStatistics, RankConfig, RankedBin, RankedBins, RecordSource, TimeBin,
    UniqueConfig,
};
pub use flowagg_types::error::{ErrorCode, FlowAggError, Result};
pub use flowagg_types::record::FlowRecord;

/// Process-wide defaults for every [`UniqueConfig`].
pub use flowagg_config as config;
