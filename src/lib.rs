// ABOUTME: Library module for seren-table-migrator
// ABOUTME: Exports the migration engine, storage backends, and CLI commands

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod migrator;
pub mod postgres;
pub mod progress;
pub mod sqlite;
pub mod storage;
pub mod utils;

pub use config::MigrationConfig;
pub use coordinator::{Coordinator, MigrationReport, TableOutcome};
pub use error::{MigrationError, Result};
pub use storage::{Row, StoragePort, TableMetadata, TableStats};
