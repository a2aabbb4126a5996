//! End-to-end migrations between SQLite files.

use std::path::{Path, PathBuf};

use lite_pg_migrate::{
    AlwaysRollback, CheckpointStore, Config, Connection, DialectAdapter, FileCheckpointStore,
    MigrateError, MigrationCheckpoint, MigrationManager, MigrationPhase, NeverRollback,
    ReportStatus, SchemaDescriptor, SourceReader, TableResult, TargetWriter,
};
use tempfile::{tempdir, TempDir};

const DESCRIPTOR: &str = r#"
tables:
  - name: skills
    columns:
      - { name: id, type: integer, nullable: false, auto_increment: true }
      - { name: name, type: text, nullable: false, unique: true }
      - { name: category, type: text }
      - { name: urgency_score, type: real, default: 0.0 }
      - { name: auto_discovered, type: boolean, default: true }
      - { name: identified_date, type: timestamp, default: CURRENT_TIMESTAMP }
    primary_key: [id]
  - name: resources
    columns:
      - { name: id, type: integer, nullable: false, auto_increment: true }
      - { name: skill_id, type: integer }
      - { name: title, type: text, nullable: false }
      - { name: rating, type: real }
      - { name: metadata, type: json }
    primary_key: [id]
    foreign_keys:
      - { columns: [skill_id], references_table: skills, references_columns: [id], on_delete: cascade }
    indexes:
      - { name: idx_resources_skill, columns: [skill_id] }
"#;

struct Fixture {
    dir: TempDir,
    source_dsn: String,
    target_dsn: String,
}

impl Fixture {
    async fn new(bad_rating: bool) -> Self {
        let dir = tempdir().unwrap();
        let source_dsn = dsn(&dir.path().join("source.db"));
        let target_dsn = dsn(&dir.path().join("target.db"));
        seed_source(&source_dsn, bad_rating).await;
        Self {
            dir,
            source_dsn,
            target_dsn,
        }
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.dir.path().join("checkpoints")
    }

    fn config(&self) -> Config {
        let mut config = Config::from_dsns(self.source_dsn.clone(), self.target_dsn.clone());
        config.migration.checkpoint_dir = self.checkpoint_dir();
        config.migration.batch_size = 2;
        config
    }

    fn store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(self.checkpoint_dir())
    }

    async fn manager(&self, config: Config) -> MigrationManager {
        MigrationManager::connect(config, descriptor()).await.unwrap()
    }

    async fn count(&self, dsn: &str, table: &str) -> i64 {
        let conn = Connection::connect(dsn, 1).await.unwrap();
        let count = conn.row_count(table).await.unwrap();
        conn.close().await;
        count
    }

    async fn execute(&self, dsn: &str, statement: &str) {
        let conn = Connection::connect(dsn, 1).await.unwrap();
        conn.execute(statement).await.unwrap();
        conn.close().await;
    }
}

fn dsn(path: &Path) -> String {
    format!("sqlite:///{}", path.display())
}

fn descriptor() -> SchemaDescriptor {
    SchemaDescriptor::from_yaml(DESCRIPTOR).unwrap()
}

async fn seed_source(dsn: &str, bad_rating: bool) {
    let conn = Connection::connect(dsn, 1).await.unwrap();
    for ddl in conn.dialect().render(&descriptor()).unwrap() {
        conn.execute(&ddl).await.unwrap();
    }
    conn.execute(
        "INSERT INTO skills (id, name, category, urgency_score, auto_discovered, identified_date) VALUES \
         (1, 'Prompt Engineering', 'ai', 9.5, 1, '2024-03-01 09:30:00'), \
         (2, 'Rust', 'systems', 7.0, 0, '2024-03-02 10:00:00'), \
         (3, 'Data Ethics', 'governance', 6.25, 1, '2024-03-03 11:15:00')",
    )
    .await
    .unwrap();
    let rating = if bad_rating { "'n/a'" } else { "3.5" };
    conn.execute(&format!(
        "INSERT INTO resources (id, skill_id, title, rating, metadata) VALUES \
         (1, 1, 'Intro to prompting', 4.5, '{{\"level\": \"beginner\", \"tags\": [\"llm\"]}}'), \
         (2, 1, 'Advanced prompting', 4.0, NULL), \
         (3, 2, 'The Rust Book', 5.0, '{{\"free\": true}}'), \
         (4, 2, 'Async Rust', {}, NULL), \
         (5, 3, 'Fairness in ML', NULL, '{{}}')",
        rating
    ))
    .await
    .unwrap();
    conn.close().await;
}

#[tokio::test]
async fn test_full_migration_completes() {
    let fx = Fixture::new(false).await;
    let report = fx.manager(fx.config()).await.run().await.unwrap();

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.final_phase, MigrationPhase::Completed);
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.summary.total_records_migrated, 8);
    assert_eq!(report.summary.total_records_failed, 0);
    assert_eq!(report.summary.tables_migrated, 2);

    let post = report.phases.post_validation.as_ref().unwrap();
    let loss = post.data_integrity.as_ref().unwrap();
    assert_eq!(loss.loss_percentage, 0.0);
    let sample = post.sample_validation.as_ref().unwrap();
    assert_eq!(sample.records_checked, 8);
    assert_eq!(sample.mismatches, 0);

    assert_eq!(fx.count(&fx.target_dsn, "skills").await, 3);
    assert_eq!(fx.count(&fx.target_dsn, "resources").await, 5);

    // A completed run leaves no checkpoint behind
    assert!(fx.store().list_ids().unwrap().is_empty());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["final_phase"], "completed");
    assert_eq!(json["summary"]["total_records_migrated"], 8);
}

#[tokio::test]
async fn test_rerun_upserts_without_duplicates() {
    let fx = Fixture::new(false).await;
    let first = fx.manager(fx.config()).await.run().await.unwrap();
    assert!(first.is_completed());

    let second = fx.manager(fx.config()).await.run().await.unwrap();
    assert!(second.is_completed(), "{:?}", second.error);
    assert_eq!(second.summary.total_records_migrated, 8);
    assert_eq!(fx.count(&fx.target_dsn, "skills").await, 3);
    assert_eq!(fx.count(&fx.target_dsn, "resources").await, 5);

    let sample = second
        .phases
        .post_validation
        .unwrap()
        .sample_validation
        .unwrap();
    assert_eq!(sample.mismatches, 0);
}

#[tokio::test]
async fn test_resume_skips_completed_tables() {
    let fx = Fixture::new(false).await;
    assert!(fx.manager(fx.config()).await.run().await.unwrap().is_completed());

    // Simulate a crash after `skills` was checkpointed
    fx.execute(&fx.target_dsn, "DELETE FROM resources").await;
    let config = fx.config();
    let migration_id = "migration_20260101_120000";
    let mut checkpoint =
        MigrationCheckpoint::new(migration_id, config.hash(), descriptor().fingerprint());
    let mut skills = TableResult::empty();
    skills.records_migrated = 3;
    checkpoint.record_table("skills", skills);
    fx.store().save(&mut checkpoint).unwrap();

    let report = fx
        .manager(config)
        .await
        .resume(None)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.migration_id, migration_id);
    let data = report.phases.data_migration.as_ref().unwrap();
    assert_eq!(data.tables_resumed, vec!["skills".to_string()]);
    assert_eq!(data.records_migrated, 8);
    assert_eq!(fx.count(&fx.target_dsn, "resources").await, 5);
    assert!(fx.store().load(migration_id).unwrap().is_none());
}

#[tokio::test]
async fn test_resume_rewrites_partially_copied_table() {
    let fx = Fixture::new(false).await;
    assert!(fx.manager(fx.config()).await.run().await.unwrap().is_completed());

    // Crash in the middle of `resources`: two rows written, one of them stale
    fx.execute(&fx.target_dsn, "DELETE FROM resources WHERE id > 2").await;
    fx.execute(&fx.target_dsn, "UPDATE resources SET title = 'stale' WHERE id = 2")
        .await;
    let config = fx.config();
    let migration_id = "migration_20260101_130000";
    let mut checkpoint =
        MigrationCheckpoint::new(migration_id, config.hash(), descriptor().fingerprint());
    let mut skills = TableResult::empty();
    skills.records_migrated = 3;
    checkpoint.record_table("skills", skills);
    fx.store().save(&mut checkpoint).unwrap();

    let report = fx
        .manager(config)
        .await
        .resume(Some(migration_id))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.status, ReportStatus::Success);
    let data = report.phases.data_migration.as_ref().unwrap();
    let resources = &data.tables_migrated["resources"];
    assert_eq!(resources.records_migrated, 5);
    assert_eq!(resources.records_failed, 0);
    assert!(resources.errors.is_empty());
    assert_eq!(fx.count(&fx.target_dsn, "resources").await, 5);

    let sample = report
        .phases
        .post_validation
        .as_ref()
        .unwrap()
        .sample_validation
        .as_ref()
        .unwrap();
    assert_eq!(sample.mismatches, 0);
}

#[tokio::test]
async fn test_resume_refuses_other_endpoints() {
    let fx = Fixture::new(false).await;
    let mut checkpoint = MigrationCheckpoint::new(
        "migration_20260101_120000",
        "hash-of-other-endpoints",
        descriptor().fingerprint(),
    );
    fx.store().save(&mut checkpoint).unwrap();

    let result = fx.manager(fx.config()).await.resume(None);
    assert!(matches!(result, Err(MigrateError::ConfigChanged)));
}

#[tokio::test]
async fn test_record_failures_are_collected() {
    let fx = Fixture::new(true).await;
    let report = fx.manager(fx.config()).await.run().await.unwrap();

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.status, ReportStatus::Warning);
    assert_eq!(report.summary.total_records_migrated, 7);
    assert_eq!(report.summary.total_records_failed, 1);

    let data = report.phases.data_migration.as_ref().unwrap();
    let resources = &data.tables_migrated["resources"];
    assert_eq!(resources.errors.len(), 1);
    assert_eq!(resources.errors[0].key, "id=4");
    assert!(resources.errors[0].message.contains("rating"));
}

#[tokio::test]
async fn test_failed_run_rolls_back_when_confirmed() {
    let fx = Fixture::new(true).await;
    let mut config = fx.config();
    config.migration.max_record_failure_percent = Some(0.0);

    let manager = fx.manager(config).await.with_rollback_decider(AlwaysRollback);
    let migration_id = manager.migration_id().to_string();
    let report = manager.run().await.unwrap();

    assert_eq!(report.final_phase, MigrationPhase::RolledBack);
    assert_eq!(report.status, ReportStatus::Error);
    assert_ne!(report.exit_code, 0);
    let rollback = report.rollback.as_ref().unwrap();
    assert!(rollback.success, "{:?}", rollback.errors);

    assert_eq!(fx.count(&fx.target_dsn, "skills").await, 0);
    assert_eq!(fx.count(&fx.target_dsn, "resources").await, 0);
    assert!(fx.store().load(&migration_id).unwrap().is_none());

    // The source is never written
    assert_eq!(fx.count(&fx.source_dsn, "skills").await, 3);
    assert_eq!(fx.count(&fx.source_dsn, "resources").await, 5);
}

#[tokio::test]
async fn test_declined_rollback_keeps_checkpoint() {
    let fx = Fixture::new(true).await;
    let mut config = fx.config();
    config.migration.max_record_failure_percent = Some(0.0);

    let manager = fx.manager(config).await.with_rollback_decider(NeverRollback);
    let migration_id = manager.migration_id().to_string();
    let report = manager.run().await.unwrap();

    assert_eq!(report.final_phase, MigrationPhase::Failed);
    assert_eq!(report.exit_code, MigrateError::transfer("t", "m").exit_code());
    assert!(report.rollback.is_none());

    let checkpoint = fx.store().load(&migration_id).unwrap().unwrap();
    assert!(checkpoint.is_table_completed("skills"));
    assert!(!checkpoint.is_table_completed("resources"));
    assert_eq!(fx.count(&fx.target_dsn, "skills").await, 3);
}

#[tokio::test]
async fn test_aborted_table_keeps_record_errors_in_report() {
    let fx = Fixture::new(true).await;
    let mut config = fx.config();
    config.migration.max_record_failure_percent = Some(0.0);

    let report = fx
        .manager(config)
        .await
        .with_rollback_decider(NeverRollback)
        .run()
        .await
        .unwrap();

    assert_eq!(report.final_phase, MigrationPhase::Failed);
    assert!(report.error.as_ref().unwrap().contains("above the 0% limit"));
    assert_eq!(report.summary.total_records_migrated, 7);
    assert_eq!(report.summary.total_records_failed, 1);

    let data = report.phases.data_migration.as_ref().unwrap();
    assert!(!data.tables_migrated.contains_key("resources"));
    let resources = &data.failed_tables["resources"];
    assert_eq!(resources.records_migrated, 4);
    assert_eq!(resources.records_failed, 1);
    assert!(resources.completed_at.is_none());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    let errors = &json["phases"]["data_migration"]["failed_tables"]["resources"]["errors"];
    assert_eq!(errors[0]["key"], "id=4");
    assert!(errors[0]["message"].as_str().unwrap().contains("rating"));
}

#[tokio::test]
async fn test_modified_target_row_is_one_mismatch() {
    let fx = Fixture::new(false).await;
    assert!(fx.manager(fx.config()).await.run().await.unwrap().is_completed());

    fx.execute(
        &fx.target_dsn,
        "UPDATE resources SET title = 'Tampered' WHERE id = 2",
    )
    .await;

    let manager = fx.manager(fx.config()).await;
    let report = manager.post_validate().await.unwrap();
    manager.close().await;

    let sample = report.sample_validation.as_ref().unwrap();
    assert_eq!(sample.mismatches, 1);
    assert_eq!(sample.tables["resources"].mismatched_keys, vec!["id=2".to_string()]);
    assert_eq!(report.status, ReportStatus::Warning);
    assert_eq!(report.data_integrity.as_ref().unwrap().total_loss, 0);
}

#[tokio::test]
async fn test_missing_target_rows_count_as_loss() {
    let fx = Fixture::new(false).await;
    assert!(fx.manager(fx.config()).await.run().await.unwrap().is_completed());
    fx.execute(&fx.target_dsn, "DELETE FROM resources WHERE id = 5").await;

    let manager = fx.manager(fx.config()).await;
    let report = manager.post_validate().await.unwrap();
    manager.close().await;

    let loss = report.data_integrity.as_ref().unwrap();
    assert_eq!(loss.total_loss, 1);
    assert_eq!(loss.loss_percentage, 12.5);
    assert!(loss.exceeded);
    assert_eq!(report.status, ReportStatus::Warning);
    assert_eq!(report.sample_validation.as_ref().unwrap().mismatches, 1);
}

#[tokio::test]
async fn test_standalone_pre_validation_requires_target_tables() {
    let fx = Fixture::new(false).await;
    let manager = fx.manager(fx.config()).await;
    let report = manager.pre_validate(true).await.unwrap();
    manager.close().await;

    assert_eq!(report.status, ReportStatus::Error);
    let verification = report.schema_compatibility.as_ref().unwrap();
    assert!(!verification.compatible);
    assert_eq!(
        verification.missing_tables,
        vec!["skills".to_string(), "resources".to_string()]
    );
    assert_eq!(report.source_stats.as_ref().unwrap().total_records, 8);
}

#[tokio::test]
async fn test_concurrent_run_is_locked_out() {
    let fx = Fixture::new(false).await;
    let migration_id = "migration_20260101_120000";
    let _held = fx.store().lock(migration_id).unwrap();

    let result = fx
        .manager(fx.config())
        .await
        .with_migration_id(migration_id)
        .run()
        .await;
    assert!(matches!(result, Err(MigrateError::Locked(_))));

    let target = Connection::connect(&fx.target_dsn, 1).await.unwrap();
    assert!(target.list_tables().await.unwrap().is_empty());
    target.close().await;
}

#[tokio::test]
async fn test_skip_post_validation() {
    let fx = Fixture::new(false).await;
    let mut config = fx.config();
    config.migration.post_validation = false;

    let report = fx.manager(config).await.run().await.unwrap();
    assert!(report.is_completed());
    assert!(report.phases.post_validation.is_none());
    assert_eq!(report.summary.total_records_migrated, 8);
}

#[test]
fn test_learning_platform_descriptor_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schemas/learning_platform.yaml");
    let descriptor = SchemaDescriptor::load(path).unwrap();
    descriptor.validate().unwrap();

    let order: Vec<&str> = descriptor
        .dependency_order()
        .unwrap()
        .into_iter()
        .map(|t| t.name.as_str())
        .collect();
    let pos = |name: &str| order.iter().position(|t| *t == name).unwrap();
    assert!(pos("emerging_skills") < pos("skill_resource_mapping"));
    assert!(pos("educational_resources") < pos("skill_resource_mapping"));
    assert!(pos("learning_paths") < pos("user_progress"));
}
