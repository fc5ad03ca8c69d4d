// ABOUTME: In-memory storage backend keyed by primary key
// ABOUTME: Provides a stable total order over JSON values for paginated reads

use super::{Row, StoragePort, TableId, TableMetadata, TableStats};
use crate::error::{MigrationError, Result};
use async_trait::async_trait;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Total order over JSON values
///
/// null < bool < number < string < array < object. Numbers compare
/// numerically, strings bytewise, arrays element by element.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare_values(left, right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a.cmp(&b);
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        _ => Ordering::Equal,
    }
}

/// Compare two rows field by field in `order_by` order
///
/// Missing fields sort as null.
pub fn compare_rows(a: &Row, b: &Row, order_by: &[String]) -> Ordering {
    for field in order_by {
        let left = a.get(field).unwrap_or(&Value::Null);
        let right = b.get(field).unwrap_or(&Value::Null);
        match compare_values(left, right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Primary key values of one row, ordered with [`compare_values`]
#[derive(Debug, Clone)]
struct RowKey(Vec<Value>);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (left, right) in self.0.iter().zip(other.0.iter()) {
            match compare_values(left, right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

#[derive(Debug)]
struct MemoryTable {
    metadata: TableMetadata,
    rows: BTreeMap<RowKey, Row>,
}

impl MemoryTable {
    fn key_of(&self, table: &str, row: &Row) -> Result<RowKey> {
        let mut values = Vec::with_capacity(self.metadata.primary_key.len());
        for field in &self.metadata.primary_key {
            match row.get(field) {
                Some(value) => values.push(value.clone()),
                None => {
                    return Err(MigrationError::write(
                        table,
                        format!("row is missing primary key field '{}'", field),
                    ))
                }
            }
        }
        Ok(RowKey(values))
    }
}

/// Storage backend held entirely in memory
///
/// Cloning shares the same tables. Rows are kept in primary key order, so
/// pages ordered by the primary key are stable by construction.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    name: String,
    tables: Arc<RwLock<BTreeMap<TableId, MemoryTable>>>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create an empty table, replacing any table with the same name
    pub async fn create_table(&self, table: &str, primary_key: &[&str]) -> Result<()> {
        let metadata = TableMetadata::new(
            table,
            primary_key.iter().map(|field| field.to_string()).collect(),
        )?;
        let mut tables = self.tables.write().await;
        tables.insert(
            table.to_string(),
            MemoryTable {
                metadata,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Every row of `table` in primary key order
    pub async fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.read().await;
        let entry = tables
            .get(table)
            .ok_or_else(|| MigrationError::UnknownTable(table.to_string()))?;
        Ok(entry.rows.values().cloned().collect())
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tables(&self) -> Result<BTreeSet<TableId>> {
        let tables = self.tables.read().await;
        Ok(tables.keys().cloned().collect())
    }

    async fn metadata(&self, table: &str) -> Result<TableMetadata> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| MigrationError::UnknownTable(table.to_string()))
    }

    async fn stats(&self) -> Result<BTreeMap<TableId, TableStats>> {
        let tables = self.tables.read().await;
        Ok(tables
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    TableStats {
                        count: entry.rows.len() as u64,
                    },
                )
            })
            .collect())
    }

    async fn select_page(
        &self,
        table: &str,
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let tables = self.tables.read().await;
        let entry = tables
            .get(table)
            .ok_or_else(|| MigrationError::UnknownTable(table.to_string()))?;

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        if order_by == entry.metadata.primary_key.as_slice() {
            return Ok(entry
                .rows
                .values()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect());
        }

        // Stable sort over rows already in key order keeps ties deterministic
        let mut rows: Vec<&Row> = entry.rows.values().collect();
        rows.sort_by(|a, b| compare_rows(a, b, order_by));
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert(&self, table: &str, batch: Vec<Row>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| MigrationError::write(table, "table does not exist"))?;

        let keyed = batch
            .into_iter()
            .map(|row| entry.key_of(table, &row).map(|key| (key, row)))
            .collect::<Result<Vec<_>>>()?;

        for (key, row) in keyed {
            entry.rows.insert(key, row);
        }
        Ok(())
    }
}
