// ABOUTME: SQLite backend module
// ABOUTME: Exports the SQLite storage adapter and its value conversions

pub mod convert;
pub mod storage;

pub use convert::{json_to_sql, sql_to_json};
pub use storage::SqliteStorage;
