//! SQLite source reader implementation.
//!
//! Introspection uses `sqlite_master` and the table-valued pragma functions,
//! which only read the catalog.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row as _;
use tracing::{debug, warn};

use super::driver::{bind_all, decode_row, SqliteDriver};
use crate::core::schema::{
    ColumnSpec, DefaultValue, ForeignKeySpec, IndexSpec, LogicalType, ReferentialAction,
    SchemaDescriptor, TableSpec,
};
use crate::core::traits::{DialectAdapter, ReadOptions, SourceReader};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

const TABLES_QUERY: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const TABLE_SQL_QUERY: &str = "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1";

const COLUMNS_QUERY: &str = "SELECT name, type, \"notnull\", dflt_value, pk \
     FROM pragma_table_info(?1) ORDER BY cid";

const INDEX_LIST_QUERY: &str = "SELECT name, \"unique\", origin FROM pragma_index_list(?1) ORDER BY name";

const INDEX_INFO_QUERY: &str = "SELECT name FROM pragma_index_info(?1) ORDER BY seqno";

const FOREIGN_KEYS_QUERY: &str = "SELECT id, \"table\", \"from\", \"to\", on_delete \
     FROM pragma_foreign_key_list(?1) ORDER BY id, seq";

impl SqliteDriver {
    async fn load_table(&self, name: &str) -> Result<TableSpec> {
        let create_sql: Option<String> = sqlx::query_scalar(TABLE_SQL_QUERY)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
        let has_autoincrement = create_sql
            .map(|sql| sql.to_uppercase().contains("AUTOINCREMENT"))
            .unwrap_or(false);

        let mut columns = Vec::new();
        let mut keyed: Vec<(i64, String)> = Vec::new();
        for row in sqlx::query(COLUMNS_QUERY)
            .bind(name)
            .fetch_all(&self.pool)
            .await?
        {
            let column_name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            let logical_type = self.dialect.logical_type(&declared).unwrap_or_else(|| {
                warn!(
                    "{}.{}: declared type '{}' has no logical mapping, treating as text",
                    name, column_name, declared
                );
                LogicalType::Text
            });

            if pk > 0 {
                keyed.push((pk, column_name.clone()));
            }
            columns.push(ColumnSpec {
                name: column_name,
                logical_type,
                // Primary key columns are implicitly NOT NULL for INTEGER keys
                nullable: not_null == 0 && pk == 0,
                default: default
                    .as_deref()
                    .and_then(|d| DefaultValue::from_catalog(d, logical_type)),
                unique: false,
                auto_increment: false,
            });
        }

        keyed.sort();
        let primary_key: Vec<String> = keyed.into_iter().map(|(_, c)| c).collect();

        if has_autoincrement && primary_key.len() == 1 {
            if let Some(col) = columns.iter_mut().find(|c| c.name == primary_key[0]) {
                col.auto_increment = col.logical_type == LogicalType::Integer;
            }
        }

        let mut indexes = Vec::new();
        for row in sqlx::query(INDEX_LIST_QUERY)
            .bind(name)
            .fetch_all(&self.pool)
            .await?
        {
            let index_name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;
            let origin: String = row.try_get("origin")?;

            let index_columns: Vec<String> = sqlx::query_scalar(INDEX_INFO_QUERY)
                .bind(&index_name)
                .fetch_all(&self.pool)
                .await?;

            match origin.as_str() {
                // UNIQUE column constraint
                "u" if index_columns.len() == 1 => {
                    if let Some(col) = columns.iter_mut().find(|c| c.name == index_columns[0]) {
                        col.unique = true;
                    }
                }
                "c" if !index_name.starts_with("sqlite_autoindex") => {
                    indexes.push(IndexSpec {
                        name: index_name,
                        columns: index_columns,
                        unique: unique != 0,
                    });
                }
                _ => {}
            }
        }

        let mut foreign_keys: BTreeMap<i64, ForeignKeySpec> = BTreeMap::new();
        for row in sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(name)
            .fetch_all(&self.pool)
            .await?
        {
            let id: i64 = row.try_get("id")?;
            let to: Option<String> = row.try_get("to")?;
            let fk = foreign_keys.entry(id).or_insert(ForeignKeySpec {
                columns: Vec::new(),
                references_table: row.try_get("table")?,
                references_columns: Vec::new(),
                on_delete: ReferentialAction::from_catalog(&row.try_get::<String, _>("on_delete")?),
            });
            fk.columns.push(row.try_get("from")?);
            // NULL means the parent's primary key; resolved after all tables load
            if let Some(to) = to {
                fk.references_columns.push(to);
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

/// Point foreign keys declared without parent columns at the parent's key.
fn resolve_implicit_references(tables: &mut [TableSpec]) {
    let keys: BTreeMap<String, Vec<String>> = tables
        .iter()
        .map(|t| (t.name.clone(), t.primary_key.clone()))
        .collect();
    for table in tables.iter_mut() {
        for fk in &mut table.foreign_keys {
            if fk.references_columns.is_empty() {
                if let Some(pk) = keys.get(&fk.references_table) {
                    fk.references_columns = pk.clone();
                }
            }
        }
    }
}

#[async_trait]
impl SourceReader for SqliteDriver {
    async fn introspect(&self) -> Result<SchemaDescriptor> {
        let mut tables = Vec::new();
        for name in self.list_tables().await? {
            tables.push(self.load_table(&name).await?);
        }
        resolve_implicit_references(&mut tables);
        debug!("Introspected {} SQLite tables", tables.len());
        Ok(SchemaDescriptor::new(tables))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(TABLES_QUERY)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(sqlx::query_scalar(&self.dialect.build_count_query(table))
            .fetch_one(&self.pool)
            .await?)
    }

    async fn read_batch(&self, opts: &ReadOptions) -> Result<Vec<Row>> {
        let sql = self.dialect.build_select_query(opts);
        let params = opts.after.as_deref().unwrap_or_default();
        let rows = bind_all(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
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
        let sql = self
            .dialect
            .build_fetch_by_key_query(table, columns, pk_columns);
        let row = bind_all(sqlx::query(&sql), key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::connectivity(&self.endpoint, e))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
