//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresDriver`]: deadpool-backed reader and writer

mod dialect;
mod driver;
mod params;
mod reader;
mod writer;

pub use dialect::PostgresDialect;
pub use driver::PostgresDriver;
