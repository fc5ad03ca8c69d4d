// ABOUTME: Shared test fixtures for migration engine tests
// ABOUTME: Wraps the in-memory backend to record calls and inject failures

#![allow(dead_code)]

use async_trait::async_trait;
use seren_table_migrator::error::{MigrationError, Result};
use seren_table_migrator::storage::{
    MemoryStorage, Row, StoragePort, TableId, TableMetadata, TableStats,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

/// A storage call observed by [`RecordingStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SelectPage {
        table: String,
        limit: u64,
        offset: u64,
        returned: usize,
    },
    Upsert {
        table: String,
        rows: usize,
    },
}

/// Memory backend that records every page read and write
///
/// Failures can be injected on the n-th read or write of a table (1-based).
pub struct RecordingStorage {
    inner: MemoryStorage,
    calls: Mutex<Vec<Call>>,
    pages: Mutex<Vec<(String, Vec<Row>)>>,
    fail_select_on: Mutex<HashMap<String, usize>>,
    fail_upsert_on: Mutex<HashMap<String, usize>>,
    selects_seen: Mutex<HashMap<String, usize>>,
    upserts_seen: Mutex<HashMap<String, usize>>,
    fail_listing: bool,
    fail_stats: bool,
    start_barrier: Option<Arc<Barrier>>,
}

impl RecordingStorage {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStorage::new(name),
            calls: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
            fail_select_on: Mutex::new(HashMap::new()),
            fail_upsert_on: Mutex::new(HashMap::new()),
            selects_seen: Mutex::new(HashMap::new()),
            upserts_seen: Mutex::new(HashMap::new()),
            fail_listing: false,
            fail_stats: false,
            start_barrier: None,
        }
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_stats(mut self) -> Self {
        self.fail_stats = true;
        self
    }

    /// Every table's first read waits until `barrier` releases
    pub fn with_start_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.start_barrier = Some(barrier);
        self
    }

    pub fn fail_select_on(&self, table: &str, nth: usize) {
        self.fail_select_on
            .lock()
            .unwrap()
            .insert(table.to_string(), nth);
    }

    pub fn fail_upsert_on(&self, table: &str, nth: usize) {
        self.fail_upsert_on
            .lock()
            .unwrap()
            .insert(table.to_string(), nth);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, table: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::SelectPage { table: t, .. } | Call::Upsert { table: t, .. } => t == table,
            })
            .collect()
    }

    pub fn selects_for(&self, table: &str) -> Vec<(u64, u64, usize)> {
        self.calls_for(table)
            .into_iter()
            .filter_map(|call| match call {
                Call::SelectPage {
                    limit,
                    offset,
                    returned,
                    ..
                } => Some((offset, limit, returned)),
                Call::Upsert { .. } => None,
            })
            .collect()
    }

    pub fn upserts_for(&self, table: &str) -> Vec<usize> {
        self.calls_for(table)
            .into_iter()
            .filter_map(|call| match call {
                Call::Upsert { rows, .. } => Some(rows),
                Call::SelectPage { .. } => None,
            })
            .collect()
    }

    /// Pages returned for `table`, in call order
    pub fn pages_for(&self, table: &str) -> Vec<Vec<Row>> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, page)| page.clone())
            .collect()
    }

    fn bump(counter: &Mutex<HashMap<String, usize>>, table: &str) -> usize {
        let mut seen = counter.lock().unwrap();
        let n = seen.entry(table.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn should_fail(rules: &Mutex<HashMap<String, usize>>, table: &str, nth: usize) -> bool {
        rules.lock().unwrap().get(table) == Some(&nth)
    }
}

#[async_trait]
impl StoragePort for RecordingStorage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_tables(&self) -> Result<BTreeSet<TableId>> {
        if self.fail_listing {
            return Err(MigrationError::read("*", "backend unavailable"));
        }
        self.inner.list_tables().await
    }

    async fn metadata(&self, table: &str) -> Result<TableMetadata> {
        self.inner.metadata(table).await
    }

    async fn stats(&self) -> Result<BTreeMap<TableId, TableStats>> {
        if self.fail_stats {
            return Err(MigrationError::read("*", "statistics unavailable"));
        }
        self.inner.stats().await
    }

    async fn select_page(
        &self,
        table: &str,
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let nth = Self::bump(&self.selects_seen, table);
        if nth == 1 {
            if let Some(barrier) = &self.start_barrier {
                barrier.wait().await;
            }
        }
        if Self::should_fail(&self.fail_select_on, table, nth) {
            return Err(MigrationError::read(table, "injected read failure"));
        }

        let page = self.inner.select_page(table, order_by, limit, offset).await?;
        self.calls.lock().unwrap().push(Call::SelectPage {
            table: table.to_string(),
            limit,
            offset,
            returned: page.len(),
        });
        self.pages
            .lock()
            .unwrap()
            .push((table.to_string(), page.clone()));
        Ok(page)
    }

    async fn upsert(&self, table: &str, batch: Vec<Row>) -> Result<()> {
        let nth = Self::bump(&self.upserts_seen, table);
        if Self::should_fail(&self.fail_upsert_on, table, nth) {
            return Err(MigrationError::write(table, "injected write failure"));
        }

        self.calls.lock().unwrap().push(Call::Upsert {
            table: table.to_string(),
            rows: batch.len(),
        });
        self.inner.upsert(table, batch).await
    }
}

pub fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Create `table` keyed by `id` on both backends and fill the source
pub async fn seed_table(
    source: &RecordingStorage,
    destination: &RecordingStorage,
    table: &str,
    rows: u64,
) {
    source.memory().create_table(table, &["id"]).await.unwrap();
    destination
        .memory()
        .create_table(table, &["id"])
        .await
        .unwrap();
    let batch = (0..rows)
        .map(|id| object(json!({"id": id, "payload": format!("{}-{}", table, id)})))
        .collect();
    source.memory().upsert(table, batch).await.unwrap();
}
