//! Operator-gated rollback.

use std::collections::HashSet;

use tracing::{error, info, warn};

use super::MigrationPhase;
use crate::core::schema::SchemaDescriptor;
use crate::core::traits::{SourceReader, TargetWriter};
use crate::drivers::Connection;
use crate::error::MigrateError;
use crate::report::RollbackReport;

/// Decides whether a failed run should be rolled back.
///
/// The CLI asks the operator; tests and unattended runs use
/// [`AlwaysRollback`] or [`NeverRollback`].
pub trait RollbackDecider: Send + Sync {
    fn confirm_rollback(&self, phase: MigrationPhase, error: &MigrateError) -> bool;
}

impl<F> RollbackDecider for F
where
    F: Fn(MigrationPhase, &MigrateError) -> bool + Send + Sync,
{
    fn confirm_rollback(&self, phase: MigrationPhase, error: &MigrateError) -> bool {
        self(phase, error)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRollback;

impl RollbackDecider for AlwaysRollback {
    fn confirm_rollback(&self, _phase: MigrationPhase, _error: &MigrateError) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRollback;

impl RollbackDecider for NeverRollback {
    fn confirm_rollback(&self, _phase: MigrationPhase, _error: &MigrateError) -> bool {
        false
    }
}

/// Delete every row from every table of the target.
///
/// Descriptor tables are cleared children first so foreign keys never block
/// a delete; any other tables follow. Failures are collected per table.
pub async fn rollback_target(
    target: &Connection,
    descriptor: Option<&SchemaDescriptor>,
) -> RollbackReport {
    info!("Starting migration rollback on {}", target.endpoint());
    let mut report = RollbackReport {
        attempted: true,
        ..Default::default()
    };

    let live: Vec<String> = match target.list_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            error!("Rollback could not list target tables: {}", e);
            report.errors.push(format!("list tables: {}", e));
            return report;
        }
    };

    let mut order: Vec<String> = Vec::with_capacity(live.len());
    if let Some(descriptor) = descriptor {
        match descriptor.dependency_order() {
            Ok(tables) => order.extend(
                tables
                    .into_iter()
                    .rev()
                    .filter(|t| live.contains(&t.name))
                    .map(|t| t.name.clone()),
            ),
            Err(e) => warn!("Ignoring descriptor order during rollback: {}", e),
        }
    }
    let seen: HashSet<String> = order.iter().cloned().collect();
    order.extend(live.into_iter().filter(|t| !seen.contains(t)));

    for table in order {
        match target.clear_table(&table).await {
            Ok(()) => report.tables_cleared.push(table),
            Err(e) => {
                warn!("Failed to clear {}: {}", table, e);
                report.errors.push(format!("clear {}: {}", table, e));
            }
        }
    }

    report.success = report.errors.is_empty();
    if report.success {
        info!(
            "Migration rollback completed: {} tables cleared",
            report.tables_cleared.len()
        );
    } else {
        error!("Migration rollback finished with {} errors", report.errors.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_decider() {
        let decider = |phase: MigrationPhase, _: &MigrateError| phase == MigrationPhase::Migrating;
        let err = MigrateError::transfer("skills", "boom");
        assert!(decider.confirm_rollback(MigrationPhase::Migrating, &err));
        assert!(!decider.confirm_rollback(MigrationPhase::PreparingTarget, &err));
        assert!(AlwaysRollback.confirm_rollback(MigrationPhase::Idle, &err));
        assert!(!NeverRollback.confirm_rollback(MigrationPhase::Idle, &err));
    }

    #[tokio::test]
    async fn test_rollback_clears_children_first() {
        let target = Connection::connect("sqlite:///:memory:", 1).await.unwrap();
        let descriptor = SchemaDescriptor::from_yaml(
            r#"
tables:
  - name: skills
    columns:
      - { name: id, type: integer, nullable: false }
    primary_key: [id]
  - name: resources
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: skill_id, type: integer }
    primary_key: [id]
    foreign_keys:
      - { columns: [skill_id], references_table: skills, references_columns: [id] }
"#,
        )
        .unwrap();
        for ddl in crate::core::traits::DialectAdapter::render(&target.dialect(), &descriptor)
            .unwrap()
        {
            target.execute(&ddl).await.unwrap();
        }
        target.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY)").await.unwrap();
        target.execute("INSERT INTO skills VALUES (1)").await.unwrap();
        target.execute("INSERT INTO resources VALUES (1, 1)").await.unwrap();
        target.execute("INSERT INTO notes VALUES (7)").await.unwrap();

        let report = rollback_target(&target, Some(&descriptor)).await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(
            report.tables_cleared,
            vec!["resources".to_string(), "skills".to_string(), "notes".to_string()]
        );
        for table in ["skills", "resources", "notes"] {
            assert_eq!(target.row_count(table).await.unwrap(), 0);
        }
    }
}
