//! Shared types for the flow aggregation engine.

pub mod bitmap;
pub mod error;
pub mod record;
pub mod serialization;
