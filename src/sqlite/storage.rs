// ABOUTME: SQLite implementation of the storage port
// ABOUTME: Runs blocking rusqlite calls on the blocking pool behind a shared connection

use super::convert::{json_to_sql, sql_to_json};
use crate::error::{MigrationError, Result};
use crate::storage::{Row, StoragePort, TableId, TableMetadata, TableStats};
use crate::utils::{quote_identifier, quote_identifier_list};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage port over one SQLite database file
///
/// All table tasks share one connection; calls are serialized by a mutex and
/// executed with `spawn_blocking`.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl SqliteStorage {
    /// Open an existing database file
    ///
    /// A missing file is a setup error rather than a new empty database, so a
    /// mistyped path never turns into a job with nothing to copy.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MigrationError::setup(format!(
                "SQLite database {} does not exist",
                path.display()
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            MigrationError::setup(format!(
                "Failed to open SQLite database {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_connection(
            conn,
            format!("SQLite {}", path.display()),
        ))
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MigrationError::setup(format!("Failed to open SQLite database: {}", e)))?;
        Ok(Self::from_connection(conn, "SQLite :memory:"))
    }

    pub fn from_connection(conn: Connection, name: impl Into<String>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            name: name.into(),
        }
    }

    /// Run SQL statements directly, e.g. to create tables
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.blocking(|e| MigrationError::setup(e), move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| MigrationError::setup(e.to_string()))
        })
        .await
    }

    /// Run `f` on the blocking pool with the connection locked
    ///
    /// `on_error` builds the error for a poisoned lock or a failed worker.
    async fn blocking<T, F, E>(&self, on_error: E, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        E: FnOnce(String) -> MigrationError + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        match tokio::task::spawn_blocking(move || match conn.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(_) => Err(on_error("SQLite connection lock poisoned".to_string())),
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(MigrationError::setup(format!("SQLite worker failed: {}", e))),
        }
    }
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn list_user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

#[async_trait]
impl StoragePort for SqliteStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tables(&self) -> Result<BTreeSet<TableId>> {
        self.blocking(
            |e| MigrationError::read("sqlite_master", e),
            |conn| {
                list_user_tables(conn)
                    .map(|names| names.into_iter().collect())
                    .map_err(|e| MigrationError::read("sqlite_master", e))
            },
        )
        .await
    }

    async fn metadata(&self, table: &str) -> Result<TableMetadata> {
        let table = table.to_string();
        let table_for_error = table.clone();
        self.blocking(
            move |e| MigrationError::read(table_for_error, e),
            move |conn| {
                let read_error = |e: rusqlite::Error| MigrationError::read(table.as_str(), e);
                if !table_exists(conn, &table).map_err(read_error)? {
                    return Err(MigrationError::UnknownTable(table.clone()));
                }

                let mut stmt = conn
                    .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
                    .map_err(read_error)?;
                let primary_key = stmt
                    .query_map(params![table], |row| row.get::<_, String>(0))
                    .map_err(read_error)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(read_error)?;
                TableMetadata::new(&table, primary_key)
            },
        )
        .await
    }

    async fn stats(&self) -> Result<BTreeMap<TableId, TableStats>> {
        self.blocking(
            |e| MigrationError::read("sqlite_master", e),
            |conn| {
                let tables = list_user_tables(conn)
                    .map_err(|e| MigrationError::read("sqlite_master", e))?;
                let mut stats = BTreeMap::new();
                for table in tables {
                    let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&table));
                    let count: i64 = conn
                        .query_row(&sql, [], |row| row.get(0))
                        .map_err(|e| MigrationError::read(table.as_str(), e))?;
                    stats.insert(
                        table,
                        TableStats {
                            count: count.max(0) as u64,
                        },
                    );
                }
                Ok(stats)
            },
        )
        .await
    }

    async fn select_page(
        &self,
        table: &str,
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
            quote_identifier(table),
            quote_identifier_list(order_by)
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let table = table.to_string();
        let table_for_error = table.clone();

        self.blocking(
            move |e| MigrationError::read(table_for_error, e),
            move |conn| {
                let read_error = |e: rusqlite::Error| MigrationError::read(table.as_str(), e);
                let mut stmt = conn.prepare(&sql).map_err(read_error)?;
                let names: Vec<String> = stmt
                    .column_names()
                    .into_iter()
                    .map(String::from)
                    .collect();

                let mut rows = stmt.query(params![limit, offset]).map_err(read_error)?;
                let mut page = Vec::new();
                while let Some(row) = rows.next().map_err(read_error)? {
                    let mut record = Row::new();
                    for (index, name) in names.iter().enumerate() {
                        let value = row.get_ref(index).map_err(read_error)?;
                        record.insert(name.clone(), sql_to_json(value));
                    }
                    page.push(record);
                }
                Ok(page)
            },
        )
        .await
    }

    async fn upsert(&self, table: &str, batch: Vec<Row>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let table = table.to_string();
        let table_for_error = table.clone();

        self.blocking(
            move |e| MigrationError::write(table_for_error, e),
            move |conn| {
                let write_error = |e: rusqlite::Error| MigrationError::write(table.as_str(), e);
                let tx = conn.transaction().map_err(write_error)?;
                for row in &batch {
                    let columns: Vec<String> = row.keys().cloned().collect();
                    let placeholders = (1..=columns.len())
                        .map(|i| format!("?{}", i))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                        quote_identifier(&table),
                        quote_identifier_list(&columns),
                        placeholders
                    );
                    let mut stmt = tx.prepare_cached(&sql).map_err(write_error)?;
                    stmt.execute(params_from_iter(row.values().map(json_to_sql)))
                        .map_err(write_error)?;
                }
                tx.commit().map_err(write_error)?;
                Ok(())
            },
        )
        .await
    }
}
