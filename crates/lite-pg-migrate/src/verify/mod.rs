//! Post-migration validation.
//!
//! - **Loss**: per-table row counts are compared and the shortfall is
//!   expressed as a percentage of all source rows.
//! - **Sample**: the first `sample_size` source records of each sampled table
//!   (in key order) are looked up in the target by primary key and compared
//!   by [`RecordFingerprint`]. A missing target record counts as a mismatch.

mod fingerprint;
mod types;

pub use fingerprint::RecordFingerprint;
pub use types::{DataLossReport, SampleValidation, TableSample};

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::core::traits::{ReadOptions, SourceReader};
use crate::core::value::{describe_key, SqlValue};
use crate::error::Result;
use crate::transfer::TablePlan;

/// Compare per-table row counts.
///
/// Tables missing from the target count as empty. Tables with more target
/// rows than source rows contribute nothing. Zero source rows means 0% loss.
pub fn data_loss(
    source_counts: &BTreeMap<String, i64>,
    target_counts: &BTreeMap<String, i64>,
    max_allowed_percent: f64,
) -> DataLossReport {
    let mut report = DataLossReport {
        max_allowed_percent,
        ..Default::default()
    };

    for (table, &source_count) in source_counts {
        let target_count = target_counts.get(table).copied().unwrap_or(0);
        report.total_source += source_count;
        let difference = source_count - target_count;
        if difference > 0 {
            report.differences.insert(table.clone(), difference);
            report.total_loss += difference;
        }
    }
    report.total_target = target_counts.values().sum();

    if report.total_source > 0 {
        report.loss_percentage = report.total_loss as f64 / report.total_source as f64 * 100.0;
    }
    report.exceeded = report.loss_percentage > max_allowed_percent;
    report
}

/// Hash-compare a sample of records from each planned table.
///
/// Failures to read a table are collected in `errors`; they never abort the
/// validation of other tables.
pub async fn sample_validate(
    source: &dyn SourceReader,
    target: &dyn SourceReader,
    plans: &[TablePlan],
    sample_size: usize,
) -> SampleValidation {
    let mut result = SampleValidation::default();
    if sample_size == 0 {
        return result;
    }

    for plan in plans {
        match sample_table(source, target, plan, sample_size).await {
            Ok(sample) => {
                if sample.mismatches > 0 {
                    warn!(
                        "{}: {} of {} sampled records differ",
                        plan.table, sample.mismatches, sample.checked
                    );
                } else {
                    debug!("{}: {} sampled records match", plan.table, sample.checked);
                }
                result.add(&plan.table, sample);
            }
            Err(e) => {
                warn!("Sample validation failed for {}: {}", plan.table, e);
                result
                    .errors
                    .push(format!("Sample validation failed for {}: {}", plan.table, e));
            }
        }
    }

    info!(
        "Sample validation: {} checked, {} matches, {} mismatches",
        result.records_checked, result.matches, result.mismatches
    );
    result
}

async fn sample_table(
    source: &dyn SourceReader,
    target: &dyn SourceReader,
    plan: &TablePlan,
    sample_size: usize,
) -> Result<TableSample> {
    let opts = ReadOptions {
        table: plan.table.clone(),
        columns: plan.columns.clone(),
        pk_columns: plan.pk_columns.clone(),
        after: None,
        limit: sample_size,
    };
    let rows = source.read_batch(&opts).await?;

    let pk_idx: Vec<usize> = plan
        .pk_columns
        .iter()
        .filter_map(|pk| plan.columns.iter().position(|c| c == pk))
        .collect();

    let mut sample = TableSample::default();
    for row in rows {
        sample.checked += 1;
        let key: Vec<SqlValue> = pk_idx
            .iter()
            .map(|&i| {
                row[i]
                    .clone()
                    .conform(plan.column_types[i])
                    .unwrap_or_else(|_| row[i].clone())
            })
            .collect();

        let matched = match target
            .fetch_by_key(&plan.table, &plan.columns, &plan.pk_columns, &key)
            .await?
        {
            Some(target_row) => {
                RecordFingerprint::compute(&plan.columns, &plan.column_types, &row)
                    == RecordFingerprint::compute(&plan.columns, &plan.column_types, &target_row)
            }
            None => false,
        };

        if matched {
            sample.matches += 1;
        } else {
            sample.mismatches += 1;
            sample
                .mismatched_keys
                .push(describe_key(&plan.pk_columns, &key));
        }
    }
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries.iter().map(|(t, c)| (t.to_string(), *c)).collect()
    }

    #[test]
    fn test_loss_percentage() {
        let source = counts(&[("A", 10), ("B", 0)]);
        let target = counts(&[("A", 8), ("B", 0)]);

        let report = data_loss(&source, &target, 5.0);
        assert_eq!(report.loss_percentage, 20.0);
        assert_eq!(report.total_loss, 2);
        assert_eq!(report.differences, counts(&[("A", 2)]));
        assert!(report.exceeded);

        assert!(data_loss(&source, &target, 19.9).exceeded);
        assert!(!data_loss(&source, &target, 20.0).exceeded);
    }

    #[test]
    fn test_loss_with_no_source_rows() {
        let report = data_loss(&counts(&[("B", 0)]), &counts(&[]), 5.0);
        assert_eq!(report.loss_percentage, 0.0);
        assert!(!report.exceeded);
    }

    #[test]
    fn test_missing_target_table_counts_as_empty() {
        let report = data_loss(&counts(&[("A", 4)]), &counts(&[("A", 6), ("C", 1)]), 5.0);
        assert_eq!(report.total_loss, 0);
        assert_eq!(report.total_target, 7);

        let report = data_loss(&counts(&[("A", 4), ("B", 4)]), &counts(&[("A", 4)]), 5.0);
        assert_eq!(report.loss_percentage, 50.0);
        assert_eq!(report.differences, counts(&[("B", 4)]));
    }
}
