//! SQLite target writer implementation.
//!
//! A failing INSERT inside a transaction only aborts that statement, so the
//! batch keeps going and the remaining rows commit together.

use async_trait::async_trait;
use tracing::debug;

use super::driver::{bind_all, db_message, SqliteDriver};
use crate::core::schema::TableSpec;
use crate::core::traits::{DialectAdapter, RecordError, TargetWriter, UpsertOutcome};
use crate::core::value::{describe_key, Row, SqlValue};
use crate::error::{MigrateError, Result};

#[async_trait]
impl TargetWriter for SqliteDriver {
    async fn execute(&self, statement: &str) -> Result<u64> {
        let result = sqlx::query(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        rows: Vec<Row>,
    ) -> Result<UpsertOutcome> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        if pk_columns.is_empty() {
            return Err(MigrateError::NoPrimaryKey(table.to_string()));
        }

        let sql = self.dialect.build_upsert_query(table, columns, pk_columns);
        let pk_idx: Vec<usize> = pk_columns
            .iter()
            .filter_map(|pk| columns.iter().position(|c| c == pk))
            .collect();

        let mut tx = self.pool.begin().await?;
        let mut outcome = UpsertOutcome::default();
        for row in &rows {
            match bind_all(sqlx::query(&sql), row).execute(&mut *tx).await {
                Ok(_) => outcome.written += 1,
                Err(e) => {
                    let key: Vec<SqlValue> = pk_idx.iter().map(|&i| row[i].clone()).collect();
                    outcome.failures.push(RecordError {
                        key: describe_key(pk_columns, &key),
                        message: db_message(&e),
                    });
                }
            }
        }
        tx.commit().await?;

        debug!(
            "{}: upserted {} rows, {} rejected",
            table,
            outcome.written,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn clear_table(&self, table: &str) -> Result<()> {
        sqlx::query(&self.dialect.build_clear_table(table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// AUTOINCREMENT keys advance `sqlite_sequence` on explicit inserts, so
    /// there is nothing to reset.
    async fn reset_sequences(&self, _table: &TableSpec) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::SourceReader;

    async fn driver_with_table() -> SqliteDriver {
        let driver = SqliteDriver::connect("sqlite:///:memory:", 1).await.unwrap();
        driver
            .execute("CREATE TABLE skills (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();
        driver
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let driver = driver_with_table().await;
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::Text("rust".into())],
            vec![SqlValue::Int(2), SqlValue::Text("sql".into())],
        ];
        let columns = cols(&["id", "name"]);
        let pk = cols(&["id"]);

        driver
            .upsert_batch("skills", &columns, &pk, rows.clone())
            .await
            .unwrap();
        let outcome = driver
            .upsert_batch("skills", &columns, &pk, rows)
            .await
            .unwrap();

        assert_eq!(outcome.written, 2);
        assert!(outcome.failures.is_empty());
        assert_eq!(driver.row_count("skills").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_row_does_not_abort_batch() {
        let driver = driver_with_table().await;
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::Text("rust".into())],
            vec![SqlValue::Int(2), SqlValue::Null],
            vec![SqlValue::Int(3), SqlValue::Text("sql".into())],
        ];
        let outcome = driver
            .upsert_batch("skills", &cols(&["id", "name"]), &cols(&["id"]), rows)
            .await
            .unwrap();

        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key, "id=2");
        assert!(outcome.failures[0].message.contains("NOT NULL"));
        assert_eq!(driver.row_count("skills").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let driver = driver_with_table().await;
        let columns = cols(&["id", "name"]);
        let pk = cols(&["id"]);
        driver
            .upsert_batch(
                "skills",
                &columns,
                &pk,
                vec![vec![SqlValue::Int(1), SqlValue::Text("old".into())]],
            )
            .await
            .unwrap();
        driver
            .upsert_batch(
                "skills",
                &columns,
                &pk,
                vec![vec![SqlValue::Int(1), SqlValue::Text("new".into())]],
            )
            .await
            .unwrap();

        let row = driver
            .fetch_by_key("skills", &columns, &pk, &[SqlValue::Int(1)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[1], SqlValue::Text("new".into()));
    }

    #[tokio::test]
    async fn test_clear_table() {
        let driver = driver_with_table().await;
        driver
            .execute("INSERT INTO skills (id, name) VALUES (1, 'a'), (2, 'b')")
            .await
            .unwrap();
        driver.clear_table("skills").await.unwrap();
        assert_eq!(driver.row_count("skills").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_introspect_round_trips_rendered_schema() {
        let driver = SqliteDriver::connect("sqlite:///:memory:", 1).await.unwrap();
        let descriptor = crate::core::schema::SchemaDescriptor::from_yaml(
            r#"
tables:
  - name: skills
    columns:
      - { name: id, type: integer, nullable: false, auto_increment: true }
      - { name: name, type: text, nullable: false, unique: true }
      - { name: is_active, type: boolean, default: true }
      - { name: created_at, type: timestamp, default: CURRENT_TIMESTAMP }
    primary_key: [id]
    indexes:
      - { name: idx_skills_active, columns: [is_active] }
  - name: resources
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: skill_id, type: integer }
      - { name: metadata, type: json }
    primary_key: [id]
    foreign_keys:
      - { columns: [skill_id], references_table: skills, references_columns: [id], on_delete: cascade }
"#,
        )
        .unwrap();

        for statement in driver.dialect().render(&descriptor).unwrap() {
            driver.execute(&statement).await.unwrap();
        }

        let live = driver.introspect().await.unwrap();
        let skills = live.table("skills").unwrap();
        assert_eq!(skills.primary_key, vec!["id".to_string()]);
        assert!(skills.column("id").unwrap().auto_increment);
        assert!(skills.column("name").unwrap().unique);
        assert_eq!(
            skills.column("is_active").unwrap().logical_type,
            crate::core::schema::LogicalType::Boolean
        );
        assert_eq!(skills.indexes.len(), 1);

        let resources = live.table("resources").unwrap();
        assert_eq!(resources.foreign_keys.len(), 1);
        assert_eq!(resources.foreign_keys[0].references_table, "skills");
        assert_eq!(
            resources.column("metadata").unwrap().logical_type,
            crate::core::schema::LogicalType::Json
        );
    }
}
