// ABOUTME: Error types for the table migration engine
// ABOUTME: Separates job-fatal setup failures from per-table read/write failures

use thiserror::Error;

/// Errors raised by storage backends and the migration engine.
///
/// Only [`MigrationError::Setup`] and [`MigrationError::Config`] stop a job
/// before any table starts. Every other variant is terminal for a single table
/// and is recorded in that table's status entry.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Backend unavailable or misconfigured
    #[error("Setup error: {0}")]
    Setup(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table does not exist on the backend
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Table exists but declares no primary key
    #[error("Table {0} has no primary key")]
    MissingPrimaryKey(String),

    /// Page fetch from the source failed
    #[error("Read failed for table {table}: {message}")]
    Read { table: String, message: String },

    /// Upsert into the destination failed
    #[error("Write failed for table {table}: {message}")]
    Write { table: String, message: String },
}

impl MigrationError {
    pub fn setup(message: impl Into<String>) -> Self {
        MigrationError::Setup(message.into())
    }

    pub fn read(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrationError::Read {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn write(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrationError::Write {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this error aborts the whole job rather than one table
    pub fn is_fatal(&self) -> bool {
        matches!(self, MigrationError::Setup(_) | MigrationError::Config(_))
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
