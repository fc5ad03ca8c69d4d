// ABOUTME: Copies one table from source to destination in ordered batches
// ABOUTME: Pages by offset in primary key order and reports progress per batch

use crate::error::{MigrationError, Result};
use crate::progress::{StatusHandle, TableStatus};
use crate::storage::StoragePort;
use std::num::NonZeroU64;

/// What one table copy did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSummary {
    /// Row count captured at job start
    pub expected_rows: u64,
    /// Rows actually read from the source and written to the destination
    pub copied_rows: u64,
    /// Page reads issued
    pub batches: u64,
}

/// Copies a single table
///
/// The number of pages is fixed by `count` before the first read, even if the
/// source changes while copying. Pages are taken in ascending primary key
/// order, so consecutive offset windows are disjoint and cover the table as
/// long as the source honors a stable order. Failures are returned as is,
/// with no retry and no rollback of batches already written.
pub struct TableMigrator<'a> {
    source: &'a dyn StoragePort,
    destination: &'a dyn StoragePort,
    batch_size: NonZeroU64,
    status: StatusHandle,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        source: &'a dyn StoragePort,
        destination: &'a dyn StoragePort,
        batch_size: NonZeroU64,
        status: StatusHandle,
    ) -> Self {
        Self {
            source,
            destination,
            batch_size,
            status,
        }
    }

    /// Copy `count` rows of `table`
    pub async fn migrate(&self, table: &str, count: u64) -> Result<TableSummary> {
        let metadata = self.source.metadata(table).await?;
        if metadata.primary_key.is_empty() {
            return Err(MigrationError::MissingPrimaryKey(table.to_string()));
        }

        let batch_size = self.batch_size.get();
        let mut summary = TableSummary {
            expected_rows: count,
            copied_rows: 0,
            batches: 0,
        };

        tracing::debug!(
            "Copying '{}' ({} rows, batch size {}, ordered by {:?})",
            table,
            count,
            batch_size,
            metadata.primary_key
        );

        let mut offset = 0u64;
        while offset < count {
            self.status.report_status(
                table,
                &TableStatus::InProgress {
                    offset,
                    total: count,
                },
            );

            let page = self
                .source
                .select_page(table, &metadata.primary_key, batch_size, offset)
                .await?;
            summary.batches += 1;

            if page.is_empty() {
                tracing::debug!(
                    "Page at offset {} of '{}' is empty; source shrank since stats were taken",
                    offset,
                    table
                );
            } else {
                let rows = page.len() as u64;
                self.destination.upsert(table, page).await?;
                summary.copied_rows += rows;
            }

            offset = offset.saturating_add(batch_size);
        }

        if summary.copied_rows != count {
            tracing::debug!(
                "'{}' copied {} rows, expected {}",
                table,
                summary.copied_rows,
                count
            );
        }

        self.status
            .report_status(table, &TableStatus::Done { total: count });
        Ok(summary)
    }
}
