//! Per-column bounds on which bins a [`UniqRunner`](crate::UniqRunner)
//! reports.
//!
//! A bin is reported only when every bounded value column and every
//! bounded distinct count lies within its inclusive range. Bins outside
//! are still aggregated; they are dropped on output.

use flowagg_engine::{BinFields, BinRef, FieldList};
use flowagg_types::error::{FlowAggError, Result};

/// Inclusive range a column must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub min: u64,
    pub max: u64,
}

impl Limit {
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min > max {
            return Err(FlowAggError::Config(format!(
                "Limit minimum {} exceeds maximum {}",
                min, max
            )));
        }
        Ok(Limit { min, max })
    }

    pub fn at_least(min: u64) -> Self {
        Limit { min, max: u64::MAX }
    }

    pub fn at_most(max: u64) -> Self {
        Limit { min: 0, max }
    }

    pub fn contains(&self, v: u64) -> bool {
        (self.min..=self.max).contains(&v)
    }
}

/// Bounds keyed by column index within the value and distinct lists.
#[derive(Debug, Clone, Default)]
pub struct OutputLimits {
    value: Vec<(usize, Limit)>,
    distinct: Vec<(usize, Limit)>,
}

impl OutputLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound value column `column`. A later bound on the same column
    /// replaces an earlier one.
    pub fn value(mut self, column: usize, limit: Limit) -> Self {
        set(&mut self.value, column, limit);
        self
    }

    /// Bound the distinct count of distinct column `column`.
    pub fn distinct(mut self, column: usize, limit: Limit) -> Self {
        set(&mut self.distinct, column, limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.distinct.is_empty()
    }

    pub(crate) fn validate(&self, fields: &BinFields) -> Result<()> {
        for &(i, _) in &self.value {
            let Some(f) = fields.value().get(i) else {
                return Err(FlowAggError::Config(format!(
                    "No value column {} to limit; there are {}",
                    i,
                    fields.value().len()
                )));
            };
            if f.is_caller() {
                return Err(FlowAggError::Config(format!(
                    "Limits are not supported for caller field {}",
                    f.name()
                )));
            }
        }
        if let Some(&(i, _)) = self.distinct.iter().find(|(i, _)| *i >= fields.num_distinct()) {
            return Err(FlowAggError::Config(format!(
                "No distinct column {} to limit; there are {}",
                i,
                fields.num_distinct()
            )));
        }
        Ok(())
    }

    /// True when `bin` passes every bound.
    pub(crate) fn admits(&self, values: &FieldList, bin: &BinRef<'_>) -> bool {
        let values_ok = self.value.iter().all(|&(i, limit)| {
            values
                .column_u64(i, bin.value)
                .is_some_and(|v| limit.contains(v))
        });
        values_ok
            && self
                .distinct
                .iter()
                .all(|&(i, limit)| limit.contains(bin.distinct_counts[i]))
    }
}

fn set(bounds: &mut Vec<(usize, Limit)>, column: usize, limit: Limit) {
    match bounds.iter_mut().find(|(i, _)| *i == column) {
        Some(entry) => entry.1 = limit,
        None => bounds.push((column, limit)),
    }
}
