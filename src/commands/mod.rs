// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports the migrate and tables commands

pub mod migrate;
pub mod tables;

pub use migrate::{apply_table_selection, migrate, MigrateOptions};
pub use tables::tables;
