//! SQLite schema, migrations, and entity-graph operations.

mod db;
pub mod entities;
mod migrations;

pub use db::Database;
pub use migrations::MIGRATIONS;
