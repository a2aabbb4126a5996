//! Core abstractions for dialect-agnostic migration.
//!
//! - [`schema`]: Declarative schema descriptor (tables, columns, keys, indexes)
//! - [`value`]: Owned SQL values and type conformance
//! - [`traits`]: Dialect, reader and writer traits implemented by the drivers
//!
//! The core module knows nothing about SQLite or PostgreSQL. Driver modules
//! implement these traits and the orchestrator only talks to the traits.

pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use schema::{
    ColumnSpec, DefaultValue, ForeignKeySpec, IndexSpec, LogicalType, ReferentialAction,
    SchemaDescriptor, TableSpec,
};
pub use traits::{
    check_type_map, BatchCursor, DialectAdapter, ReadOptions, RecordError, SourceReader, TargetWriter,
    UpsertOutcome,
};
pub use value::{Row, SqlValue};
