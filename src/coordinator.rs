// ABOUTME: Runs table migrations concurrently and aggregates their status
// ABOUTME: Owns table selection, isolates per-table failures, and reports a job outcome

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::migrator::{TableMigrator, TableSummary};
use crate::progress::{
    ProgressReporter, StatusBoard, StatusSnapshot, TableStatus, JOB_COMPLETE_MESSAGE,
    JOB_STATUS_KEY,
};
use crate::storage::{StoragePort, TableId, TableStats};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Final result for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Completed(TableSummary),
    Failed { cause: String },
}

impl TableOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TableOutcome::Completed(_))
    }
}

/// Result of a migration run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub outcomes: BTreeMap<TableId, TableOutcome>,
    pub elapsed: Duration,
}

impl MigrationReport {
    pub fn succeeded(&self) -> Vec<&TableId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(table, _)| table)
            .collect()
    }

    pub fn failed(&self) -> Vec<(&TableId, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(table, outcome)| match outcome {
                TableOutcome::Failed { cause } => Some((table, cause.as_str())),
                TableOutcome::Completed(_) => None,
            })
            .collect()
    }

    /// Rows copied across all successful tables
    pub fn rows_copied(&self) -> u64 {
        self.outcomes
            .values()
            .map(|outcome| match outcome {
                TableOutcome::Completed(summary) => summary.copied_rows,
                TableOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

/// One line of the pre-run table overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    pub table: TableId,
    pub included: bool,
    /// Current source row count, if the source reports one
    pub rows: Option<u64>,
}

/// Drives a migration job between two storage backends
pub struct Coordinator {
    source: Arc<dyn StoragePort>,
    destination: Arc<dyn StoragePort>,
    config: MigrationConfig,
    filters: BTreeMap<TableId, bool>,
    /// Row counts shown by `overview`, consumed by the next `run`
    pending_stats: Option<BTreeMap<TableId, TableStats>>,
    board: StatusBoard,
}

impl Coordinator {
    /// Create a coordinator with every source table selected
    ///
    /// Fails with [`MigrationError::Setup`] if the source cannot list its
    /// tables or the configuration is invalid.
    pub async fn new(
        source: Arc<dyn StoragePort>,
        destination: Arc<dyn StoragePort>,
        config: MigrationConfig,
        reporter: Box<dyn ProgressReporter>,
    ) -> Result<Self> {
        config.validate()?;

        let tables = source.list_tables().await.map_err(|e| {
            MigrationError::setup(format!(
                "Failed to list tables on source '{}': {}",
                source.name(),
                e
            ))
        })?;

        tracing::info!(
            "Found {} table(s) on source '{}'",
            tables.len(),
            source.name()
        );

        let filters = tables.into_iter().map(|table| (table, true)).collect();
        let board = StatusBoard::spawn(reporter, config.flush_interval());

        Ok(Self {
            source,
            destination,
            config,
            filters,
            pending_stats: None,
            board,
        })
    }

    /// Include or exclude a table from the next run
    pub fn set_filter(&mut self, table: &str, included: bool) {
        if !self.filters.contains_key(table) {
            tracing::warn!(
                "Table '{}' is not known to source '{}'",
                crate::utils::sanitize_identifier(table),
                self.source.name()
            );
        }
        self.filters.insert(table.to_string(), included);
    }

    pub fn filters(&self) -> &BTreeMap<TableId, bool> {
        &self.filters
    }

    /// Tables the next run will copy, in name order
    pub fn selected_tables(&self) -> Vec<TableId> {
        self.filters
            .iter()
            .filter(|(_, included)| **included)
            .map(|(table, _)| table.clone())
            .collect()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn destination_name(&self) -> &str {
        self.destination.name()
    }

    /// Every known table with its selection flag and current row count
    ///
    /// The counts are kept and used by the next [`Coordinator::run`], so the
    /// totals shown before a run are the totals it copies.
    pub async fn overview(&mut self) -> Result<Vec<TableSelection>> {
        let stats = self.source.stats().await?;
        let overview = self
            .filters
            .iter()
            .map(|(table, included)| TableSelection {
                table: table.clone(),
                included: *included,
                rows: stats.get(table).map(|s| s.count),
            })
            .collect();
        self.pending_stats = Some(stats);
        Ok(overview)
    }

    /// Overwrite the status entry for `table` and schedule delivery
    pub fn report_progress(&self, table: &str, message: impl Into<String>) {
        self.board.report(table, message);
    }

    /// Latest published status snapshot
    pub fn status(&self) -> StatusSnapshot {
        self.board.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.board.subscribe()
    }

    /// Copy every selected table concurrently
    ///
    /// Row counts are taken once, before any table starts, unless
    /// [`Coordinator::overview`] already took them. Each table runs in
    /// its own task; a failing table records an error entry and never affects
    /// its siblings. The job-level entry is written after every task finished,
    /// whatever their outcome. Only setup failures return `Err`.
    pub async fn run(&mut self) -> Result<MigrationReport> {
        let started = Instant::now();
        let selected = self.selected_tables();

        let stats = match self.pending_stats.take() {
            Some(stats) => stats,
            None => self.source.stats().await.map_err(|e| {
                MigrationError::setup(format!(
                    "Failed to collect table statistics from source '{}': {}",
                    self.source.name(),
                    e
                ))
            })?,
        };

        tracing::info!(
            "Migrating {} table(s) from '{}' to '{}' (batch size {})",
            selected.len(),
            self.source.name(),
            self.destination.name(),
            self.config.batchsize
        );

        let batch_size = self.config.batchsize;
        let tasks = selected.iter().map(|table| {
            let source = Arc::clone(&self.source);
            let destination = Arc::clone(&self.destination);
            let status = self.board.handle();
            let count = stats.get(table).map(|s| s.count);
            let table = table.clone();

            tokio::spawn(async move {
                let result = match count {
                    Some(count) => {
                        TableMigrator::new(
                            source.as_ref(),
                            destination.as_ref(),
                            batch_size,
                            status.clone(),
                        )
                        .migrate(&table, count)
                        .await
                    }
                    None => Err(MigrationError::UnknownTable(table.clone())),
                };

                if let Err(e) = &result {
                    tracing::warn!("Table '{}' failed: {}", table, e);
                    status.report_status(
                        &table,
                        &TableStatus::Failed {
                            cause: e.to_string(),
                        },
                    );
                }
                result
            })
        });

        let results = futures::future::join_all(tasks).await;

        let mut outcomes = BTreeMap::new();
        for (table, joined) in selected.into_iter().zip(results) {
            let outcome = match joined {
                Ok(Ok(summary)) => TableOutcome::Completed(summary),
                Ok(Err(e)) => TableOutcome::Failed {
                    cause: e.to_string(),
                },
                Err(join_error) => {
                    let cause = format!("table task panicked: {}", join_error);
                    tracing::error!("Table '{}' failed: {}", table, cause);
                    self.board.report(
                        &table,
                        TableStatus::Failed {
                            cause: cause.clone(),
                        }
                        .render(&table),
                    );
                    TableOutcome::Failed { cause }
                }
            };
            outcomes.insert(table, outcome);
        }

        self.board.report(JOB_STATUS_KEY, JOB_COMPLETE_MESSAGE);
        self.board.flush().await;

        let report = MigrationReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Migration finished: {} succeeded, {} failed, {} rows copied",
            report.succeeded().len(),
            report.failed().len(),
            report.rows_copied()
        );
        Ok(report)
    }

    /// Stop the status aggregator and return the final snapshot
    pub async fn shutdown(self) -> StatusSnapshot {
        self.board.shutdown().await
    }
}
