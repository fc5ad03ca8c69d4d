// ABOUTME: Per-table status tracking with coalesced delivery to reporters
// ABOUTME: A single aggregator task owns the status map and publishes snapshots on a timer

use crate::storage::TableId;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Status key reserved for the job-level terminal message
pub const JOB_STATUS_KEY: &str = "";

/// Job-level message recorded once every table task has finished
pub const JOB_COMPLETE_MESSAGE: &str = "migration complete";

/// Progress of a single table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    InProgress { offset: u64, total: u64 },
    Done { total: u64 },
    Failed { cause: String },
}

impl TableStatus {
    /// Display line for `table`
    ///
    /// # Examples
    ///
    /// ```
    /// # use seren_table_migrator::progress::TableStatus;
    /// let status = TableStatus::InProgress { offset: 1000, total: 2500 };
    /// assert_eq!(status.render("users"), "- users (1000 / 2500)");
    /// assert_eq!(TableStatus::Done { total: 2500 }.render("users"), "✅ users (2500)");
    /// ```
    pub fn render(&self, table: &str) -> String {
        match self {
            TableStatus::InProgress { offset, total } => {
                format!("- {} ({} / {})", table, offset, total)
            }
            TableStatus::Done { total } => format!("✅ {} ({})", table, total),
            TableStatus::Failed { cause } => format!("❌ {} (error: {})", table, cause),
        }
    }
}

/// Point-in-time copy of every status entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    entries: BTreeMap<TableId, String>,
}

impl StatusSnapshot {
    pub fn get(&self, table: &str) -> Option<&str> {
        self.entries.get(table).map(String::as_str)
    }

    /// The job-level terminal message, once recorded
    pub fn job_message(&self) -> Option<&str> {
        self.get(JOB_STATUS_KEY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableId, &String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, table: TableId, message: String) {
        self.entries.insert(table, message);
    }
}

/// Receives coalesced status snapshots
///
/// Called from the aggregator task, never from table tasks, so a slow
/// reporter delays rendering but not copying.
pub trait ProgressReporter: Send + 'static {
    fn publish(&mut self, snapshot: &StatusSnapshot);

    /// Called once with the final snapshot when the board shuts down
    fn finish(&mut self, snapshot: &StatusSnapshot) {
        self.publish(snapshot);
    }
}

/// Logs every entry whose text changed since the last snapshot
#[derive(Debug, Default)]
pub struct LogReporter {
    last: StatusSnapshot,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LogReporter {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        for (table, message) in snapshot.iter() {
            if self.last.get(table) != Some(message.as_str()) {
                tracing::info!("{}", message);
            }
        }
        self.last = snapshot.clone();
    }
}

/// Renders one terminal line per table with indicatif
pub struct TerminalReporter {
    multi: MultiProgress,
    bars: BTreeMap<TableId, ProgressBar>,
    style: ProgressStyle,
}

impl TerminalReporter {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        Self {
            multi: MultiProgress::new(),
            bars: BTreeMap::new(),
            style,
        }
    }
}

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TerminalReporter {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        let Self { multi, bars, style } = self;
        for (table, message) in snapshot.iter() {
            let bar = bars.entry(table.clone()).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style.clone());
                bar
            });
            bar.set_message(message.clone());
            bar.tick();
        }
    }

    fn finish(&mut self, snapshot: &StatusSnapshot) {
        self.publish(snapshot);
        for bar in self.bars.values() {
            bar.finish();
        }
    }
}

#[derive(Debug)]
enum StatusCommand {
    Update { table: TableId, message: String },
    Flush(oneshot::Sender<()>),
}

/// Cloneable sender used by table tasks to report progress
///
/// Reporting never blocks; updates queue until the aggregator applies them.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: mpsc::UnboundedSender<StatusCommand>,
}

impl StatusHandle {
    /// Overwrite the status entry for `table`
    pub fn report(&self, table: &str, message: impl Into<String>) {
        let command = StatusCommand::Update {
            table: table.to_string(),
            message: message.into(),
        };
        if self.tx.send(command).is_err() {
            tracing::debug!("Status board closed, dropping update for '{}'", table);
        }
    }

    pub fn report_status(&self, table: &str, status: &TableStatus) {
        self.report(table, status.render(table));
    }
}

/// Owner of the status map
///
/// Updates arrive over a channel; a timer publishes the map to the reporter
/// and to `watch` subscribers whenever it changed. The last update for every
/// table is published at the latest on the next tick, on [`StatusBoard::flush`],
/// or when the board shuts down.
pub struct StatusBoard {
    handle: StatusHandle,
    snapshots: watch::Receiver<StatusSnapshot>,
    task: JoinHandle<()>,
}

impl StatusBoard {
    /// Start the aggregator task on the current tokio runtime
    pub fn spawn(reporter: Box<dyn ProgressReporter>, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(StatusSnapshot::default());
        let flush_interval = flush_interval.max(Duration::from_millis(1));
        let task = tokio::spawn(aggregate(rx, publisher, reporter, flush_interval));

        Self {
            handle: StatusHandle { tx },
            snapshots,
            task,
        }
    }

    pub fn handle(&self) -> StatusHandle {
        self.handle.clone()
    }

    pub fn report(&self, table: &str, message: impl Into<String>) {
        self.handle.report(table, message);
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshots.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Publish every update queued so far and wait until it is visible
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.handle.tx.send(StatusCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Stop the aggregator after it delivers the final snapshot
    ///
    /// Waits for outstanding [`StatusHandle`] clones to be dropped.
    pub async fn shutdown(self) -> StatusSnapshot {
        let StatusBoard {
            handle,
            snapshots,
            task,
        } = self;
        drop(handle);
        if let Err(e) = task.await {
            tracing::error!("Status aggregator stopped unexpectedly: {}", e);
        }
        let last = snapshots.borrow().clone();
        last
    }
}

async fn aggregate(
    mut rx: mpsc::UnboundedReceiver<StatusCommand>,
    publisher: watch::Sender<StatusSnapshot>,
    mut reporter: Box<dyn ProgressReporter>,
    flush_interval: Duration,
) {
    let mut entries = StatusSnapshot::default();
    let mut dirty = false;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(StatusCommand::Update { table, message }) => {
                    entries.insert(table, message);
                    dirty = true;
                }
                Some(StatusCommand::Flush(ack)) => {
                    if dirty {
                        publish(&publisher, reporter.as_mut(), &entries);
                        dirty = false;
                    }
                    let _ = ack.send(());
                }
                None => break,
            },
            _ = ticker.tick() => {
                if dirty {
                    publish(&publisher, reporter.as_mut(), &entries);
                    dirty = false;
                }
            }
        }
    }

    publisher.send_replace(entries.clone());
    reporter.finish(&entries);
}

fn publish(
    publisher: &watch::Sender<StatusSnapshot>,
    reporter: &mut dyn ProgressReporter,
    entries: &StatusSnapshot,
) {
    publisher.send_replace(entries.clone());
    reporter.publish(entries);
}
