//! Persistence layer: SQLite store and schema migrations.

mod migrations;
mod store;

pub use store::Database;
