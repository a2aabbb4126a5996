//! PostgreSQL target writer implementation.
//!
//! Rows are upserted one statement at a time inside a batch transaction. Each
//! row runs under a savepoint so a rejected row rolls back alone and the rest
//! of the batch commits.

use async_trait::async_trait;
use tracing::debug;

use super::driver::PostgresDriver;
use super::params::as_params;
use crate::core::schema::{LogicalType, TableSpec};
use crate::core::traits::{DialectAdapter, RecordError, TargetWriter, UpsertOutcome};
use crate::core::value::{describe_key, Row, SqlValue};
use crate::error::{MigrateError, Result};

const SEQUENCE_QUERY: &str = "SELECT pg_get_serial_sequence($1, $2)";

#[async_trait]
impl TargetWriter for PostgresDriver {
    async fn execute(&self, statement: &str) -> Result<u64> {
        let client = self.client("executing PostgreSQL statement").await?;
        Ok(client.execute(statement, &[]).await?)
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

        let mut client = self.client("upserting PostgreSQL batch").await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(&sql)
            .await
            .map_err(|e| MigrateError::transfer(table, db_message(&e)))?;

        let mut outcome = UpsertOutcome::default();
        for row in &rows {
            tx.batch_execute("SAVEPOINT upsert_row").await?;
            match tx.execute(&stmt, &as_params(row)).await {
                Ok(_) => {
                    tx.batch_execute("RELEASE SAVEPOINT upsert_row").await?;
                    outcome.written += 1;
                }
                Err(e) => {
                    tx.batch_execute("ROLLBACK TO SAVEPOINT upsert_row").await?;
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
        let client = self.client("clearing PostgreSQL table").await?;
        client
            .batch_execute(&self.dialect.build_clear_table(table))
            .await?;
        Ok(())
    }

    async fn reset_sequences(&self, table: &TableSpec) -> Result<()> {
        let client = self.client("resetting PostgreSQL sequences").await?;
        let qualified = self.dialect.qualify_table(&table.name);

        for pk_col in &table.primary_key {
            let is_integer = table
                .column(pk_col)
                .map(|c| c.logical_type == LogicalType::Integer)
                .unwrap_or(false);
            if !is_integer {
                continue;
            }

            let row = client
                .query_one(SEQUENCE_QUERY, &[&qualified, pk_col])
                .await?;
            let Some(seq_name) = row.get::<_, Option<String>>(0) else {
                continue;
            };

            let reset_query = format!(
                "SELECT setval($1::text::regclass, COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                self.dialect.quote_ident(pk_col),
                qualified
            );
            client.execute(&reset_query, &[&seq_name]).await?;
            debug!("Reset sequence {} for {}", seq_name, table.name);
        }

        Ok(())
    }
}

/// Server message without the `db error:` prefix.
fn db_message(e: &tokio_postgres::Error) -> String {
    e.as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string())
}
