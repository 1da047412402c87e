//! Spill file storage for the flow aggregation engine.

pub mod temp_store;

pub use temp_store::{is_resource_exhausted, TempReader, TempStore, TempWriter};
