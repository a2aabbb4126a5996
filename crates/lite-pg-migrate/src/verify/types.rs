//! Type definitions for post-migration validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Row-count comparison between source and target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataLossReport {
    pub total_source: i64,
    pub total_target: i64,
    /// Source rows missing from the target, summed over tables that lost rows.
    pub total_loss: i64,
    pub loss_percentage: f64,
    /// Per-table shortfall (`source - target`), only for tables that lost rows.
    pub differences: BTreeMap<String, i64>,
    pub max_allowed_percent: f64,
    /// True when `loss_percentage` is above `max_allowed_percent`.
    pub exceeded: bool,
}

/// Sampled hash comparison for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    pub checked: u64,
    pub matches: u64,
    pub mismatches: u64,
    /// Keys of mismatched or missing target records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatched_keys: Vec<String>,
}

/// Sampled hash comparison across all sampled tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleValidation {
    pub records_checked: u64,
    pub matches: u64,
    pub mismatches: u64,
    pub tables: BTreeMap<String, TableSample>,
    /// Tables that could not be sampled.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SampleValidation {
    pub(crate) fn add(&mut self, table: &str, sample: TableSample) {
        self.records_checked += sample.checked;
        self.matches += sample.matches;
        self.mismatches += sample.mismatches;
        self.tables.insert(table.to_string(), sample);
    }
}
