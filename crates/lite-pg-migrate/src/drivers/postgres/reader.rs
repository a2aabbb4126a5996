//! PostgreSQL source reader implementation.
//!
//! Introspection reads `information_schema` for tables and columns and
//! `pg_catalog` for keys and indexes. All catalog queries are read-only.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use super::driver::PostgresDriver;
use super::params::{as_params, decode_row};
use crate::core::schema::{
    ColumnSpec, DefaultValue, ForeignKeySpec, IndexSpec, LogicalType, ReferentialAction,
    SchemaDescriptor, TableSpec,
};
use crate::core::traits::{DialectAdapter, ReadOptions, SourceReader};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

const TABLES_QUERY: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema::text = $1 AND table_type::text = 'BASE TABLE'
    ORDER BY table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        column_name::text,
        CASE WHEN data_type::text = 'USER-DEFINED' THEN udt_name::text ELSE data_type::text END,
        is_nullable::text = 'YES',
        column_default::text
    FROM information_schema.columns
    WHERE table_schema::text = $1 AND table_name::text = $2
    ORDER BY ordinal_position
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT a.attname::text
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE ix.indisprimary AND n.nspname = $1 AND t.relname = $2
    ORDER BY k.ord
"#;

const UNIQUE_COLUMNS_QUERY: &str = r#"
    SELECT a.attname::text
    FROM pg_constraint c
    JOIN pg_class t ON t.oid = c.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = c.conkey[1]
    WHERE c.contype = 'u' AND array_length(c.conkey, 1) = 1
      AND n.nspname = $1 AND t.relname = $2
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname::text,
        a.attname::text,
        rt.relname::text,
        ra.attname::text,
        c.confdeltype::text
    FROM pg_constraint c
    JOIN pg_class t ON t.oid = c.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_class rt ON rt.oid = c.confrelid
    CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refattnum, ord)
    JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
    JOIN pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refattnum
    WHERE c.contype = 'f' AND n.nspname = $1 AND t.relname = $2
    ORDER BY c.conname, k.ord
"#;

/// Secondary indexes that are not backing a constraint.
const INDEXES_QUERY: &str = r#"
    SELECT i.relname::text, ix.indisunique, a.attname::text
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = $1 AND t.relname = $2 AND NOT ix.indisprimary
      AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid)
    ORDER BY i.relname, k.ord
"#;

impl PostgresDriver {
    /// Load one table's columns, keys and indexes.
    async fn load_table(&self, name: &str) -> Result<TableSpec> {
        let client = self.client("introspecting PostgreSQL table").await?;
        let schema = self.dialect.schema();

        let unique: Vec<String> = client
            .query(UNIQUE_COLUMNS_QUERY, &[&schema, &name])
            .await?
            .iter()
            .map(|r| r.get(0))
            .collect();

        let mut columns = Vec::new();
        for row in client.query(COLUMNS_QUERY, &[&schema, &name]).await? {
            let column_name: String = row.get(0);
            let data_type: String = row.get(1);
            let nullable: bool = row.get(2);
            let default: Option<String> = row.get(3);

            let logical_type = self.dialect.logical_type(&data_type).ok_or_else(|| {
                MigrateError::Schema(format!(
                    "{}.{}: unsupported PostgreSQL type '{}'",
                    name, column_name, data_type
                ))
            })?;

            let auto_increment = default
                .as_deref()
                .map(|d| d.starts_with("nextval("))
                .unwrap_or(false);
            let default = match (&default, auto_increment) {
                (Some(expr), false) => DefaultValue::from_catalog(expr, logical_type),
                _ => None,
            };

            columns.push(ColumnSpec {
                unique: unique.contains(&column_name),
                name: column_name,
                logical_type,
                nullable,
                default,
                auto_increment: auto_increment && logical_type == LogicalType::Integer,
            });
        }

        let primary_key: Vec<String> = client
            .query(PRIMARY_KEY_QUERY, &[&schema, &name])
            .await?
            .iter()
            .map(|r| r.get(0))
            .collect();

        // Sequences only count as generated keys on a single-column primary key
        for column in &mut columns {
            if column.auto_increment
                && !(primary_key.len() == 1 && primary_key[0] == column.name)
            {
                column.auto_increment = false;
            }
        }

        let mut foreign_keys: BTreeMap<String, ForeignKeySpec> = BTreeMap::new();
        for row in client.query(FOREIGN_KEYS_QUERY, &[&schema, &name]).await? {
            let constraint: String = row.get(0);
            let fk = foreign_keys
                .entry(constraint)
                .or_insert_with(|| ForeignKeySpec {
                    columns: Vec::new(),
                    references_table: row.get(2),
                    references_columns: Vec::new(),
                    on_delete: ReferentialAction::from_catalog(&row.get::<_, String>(4)),
                });
            fk.columns.push(row.get(1));
            fk.references_columns.push(row.get(3));
        }

        let mut indexes: Vec<IndexSpec> = Vec::new();
        for row in client.query(INDEXES_QUERY, &[&schema, &name]).await? {
            let index_name: String = row.get(0);
            let column: String = row.get(2);
            match indexes.last_mut() {
                Some(idx) if idx.name == index_name => idx.columns.push(column),
                _ => indexes.push(IndexSpec {
                    name: index_name,
                    columns: vec![column],
                    unique: row.get(1),
                }),
            }
        }

        Ok(TableSpec {
            name: name.to_string(),
            columns,
            primary_key,
            foreign_keys: foreign_keys.into_values().collect(),
            indexes,
        })
    }
}

#[async_trait]
impl SourceReader for PostgresDriver {
    async fn introspect(&self) -> Result<SchemaDescriptor> {
        let mut tables = Vec::new();
        for name in self.list_tables().await? {
            tables.push(self.load_table(&name).await?);
        }
        debug!(
            "Introspected {} PostgreSQL tables in schema {}",
            tables.len(),
            self.dialect.schema()
        );
        Ok(SchemaDescriptor::new(tables))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client("listing PostgreSQL tables").await?;
        let rows = client.query(TABLES_QUERY, &[&self.dialect.schema()]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting PostgreSQL rows").await?;
        let row = client
            .query_one(&self.dialect.build_count_query(table), &[])
            .await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn read_batch(&self, opts: &ReadOptions) -> Result<Vec<Row>> {
        let client = self.client("reading PostgreSQL batch").await?;
        let sql = self.dialect.build_select_query(opts);
        let params = opts.after.as_deref().unwrap_or_default();
        let rows = client
            .query(&sql, &as_params(params))
            .await
            .map_err(|e| MigrateError::transfer(&opts.table, e.to_string()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_by_key(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>> {
        let client = self.client("fetching PostgreSQL row").await?;
        let sql = self
            .dialect
            .build_fetch_by_key_query(table, columns, pk_columns);
        let row = client.query_opt(&sql, &as_params(key)).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL connection").await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connectivity(&self.endpoint, e))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}
