//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqliteDriver`]: sqlx-backed reader and writer

mod dialect;
mod driver;
mod reader;
mod writer;

pub use dialect::SqliteDialect;
pub use driver::SqliteDriver;
