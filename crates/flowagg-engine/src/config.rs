//! Per-aggregator configuration.

use std::path::PathBuf;

use flowagg_config::{MAX_MERGE_FILES, MIN_MERGE_FILES};
use flowagg_io::TempStore;
use flowagg_types::error::{FlowAggError, Result};

/// Settings for one aggregator.
///
/// [`UniqueConfig::default()`] takes every tunable from the process-wide
/// values in `flowagg_config`, which are themselves seeded from the
/// environment.
#[derive(Debug, Clone)]
pub struct UniqueConfig {
    /// Parent of the spill directory; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,

    /// Emit bins in ascending key order. Output read back from spill files
    /// is always sorted.
    pub sort_output: bool,

    /// Also count unique values of the first distinct field over all
    /// records.
    pub total_distinct: bool,

    /// Expected number of bins, used to size the first bin table.
    pub hash_initial_capacity: usize,

    /// Bytes the in-memory structures may hold before spilling.
    pub memory_limit: usize,

    /// Most files open at once while merging.
    pub max_open_files: usize,

    /// LZ4-compress spill files.
    pub spill_compression: bool,
}

impl Default for UniqueConfig {
    fn default() -> Self {
        UniqueConfig {
            temp_dir: flowagg_config::get_temp_dir(),
            sort_output: false,
            total_distinct: false,
            hash_initial_capacity: flowagg_config::get_hash_initial_capacity(),
            memory_limit: flowagg_config::get_memory_limit(),
            max_open_files: flowagg_config::get_max_open_files(),
            spill_compression: flowagg_config::get_spill_compression(),
        }
    }
}

impl UniqueConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MERGE_FILES..=MAX_MERGE_FILES).contains(&self.max_open_files) {
            return Err(FlowAggError::Config(format!(
                "max_open_files must be between {} and {}, got {}",
                MIN_MERGE_FILES, MAX_MERGE_FILES, self.max_open_files
            )));
        }
        if self.memory_limit == 0 {
            return Err(FlowAggError::Config("memory_limit must be nonzero".into()));
        }
        Ok(())
    }

    /// Create the spill directory these settings describe.
    pub(crate) fn open_store(&self) -> Result<TempStore> {
        TempStore::new(self.temp_dir.as_deref(), self.spill_compression)
    }
}

/// The store in `slot`, created on first use.
pub(crate) fn ensure_store<'a>(
    slot: &'a mut Option<TempStore>,
    config: &UniqueConfig,
) -> Result<&'a mut TempStore> {
    if slot.is_none() {
        *slot = Some(config.open_store()?);
    }
    slot.as_mut()
        .ok_or_else(|| FlowAggError::Config("spill directory unavailable".into()))
}
