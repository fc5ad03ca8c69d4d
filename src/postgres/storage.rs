// ABOUTME: PostgreSQL implementation of the storage port
// ABOUTME: Reads pages as JSONB in primary key order and upserts with ON CONFLICT

use crate::error::{MigrationError, Result};
use crate::storage::{Row, StoragePort, TableId, TableMetadata, TableStats};
use crate::utils::{quote_identifier, quote_identifier_list, redact_url};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tokio_postgres::Client;

#[derive(Debug, Clone)]
struct TableShape {
    primary_key: Vec<String>,
    columns: Vec<String>,
}

/// Storage port over the tables of one PostgreSQL schema
///
/// A single client is shared by all table tasks; tokio-postgres pipelines
/// concurrent queries on it.
pub struct PostgresStorage {
    client: Client,
    schema: String,
    name: String,
    shapes: RwLock<HashMap<TableId, TableShape>>,
}

impl PostgresStorage {
    /// Connect and expose the tables of `schema`
    pub async fn connect(connection_string: &str, schema: &str) -> Result<Self> {
        let client = super::connect_with_retry(connection_string)
            .await
            .map_err(|e| MigrationError::setup(format!("{:#}", e)))?;
        let name = format!("PostgreSQL {} (schema {})", redact_url(connection_string), schema);
        Ok(Self::new(client, schema, name))
    }

    /// Wrap an existing client
    pub fn new(client: Client, schema: &str, name: impl Into<String>) -> Self {
        Self {
            client,
            schema: schema.to_string(),
            name: name.into(),
            shapes: RwLock::new(HashMap::new()),
        }
    }

    fn qualified(&self, table: &str) -> String {
        qualified_name(&self.schema, table)
    }

    async fn shape(&self, table: &str) -> Result<TableShape> {
        if let Some(shape) = self.shapes.read().await.get(table) {
            return Ok(shape.clone());
        }

        let exists: bool = self
            .client
            .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&self.qualified(table)])
            .await
            .map_err(|e| MigrationError::read(table, e))?
            .get(0);
        if !exists {
            return Err(MigrationError::UnknownTable(table.to_string()));
        }

        let primary_key: Vec<String> = self
            .client
            .query(
                "SELECT a.attname::text
                 FROM pg_catalog.pg_index i
                 JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 WHERE i.indrelid = to_regclass($1::text) AND i.indisprimary
                 ORDER BY array_position(i.indkey::int2[], a.attnum)",
                &[&self.qualified(table)],
            )
            .await
            .map_err(|e| MigrationError::read(table, e))?
            .iter()
            .map(|row| row.get(0))
            .collect();

        let columns: Vec<String> = self
            .client
            .query(
                "SELECT column_name::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&self.schema, &table],
            )
            .await
            .map_err(|e| MigrationError::read(table, e))?
            .iter()
            .map(|row| row.get(0))
            .collect();

        let metadata = TableMetadata::new(table, primary_key)?;
        let shape = TableShape {
            primary_key: metadata.primary_key,
            columns,
        };
        self.shapes
            .write()
            .await
            .insert(table.to_string(), shape.clone());
        Ok(shape)
    }
}

fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn select_page_query(schema: &str, table: &str, order_by: &[String]) -> String {
    let order = order_by
        .iter()
        .map(|field| format!("t.{}", quote_identifier(field)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT to_jsonb(t) FROM {} AS t ORDER BY {} LIMIT $1 OFFSET $2",
        qualified_name(schema, table),
        order
    )
}

fn upsert_query(schema: &str, table: &str, primary_key: &[String], columns: &[String]) -> String {
    let target = qualified_name(schema, table);
    let updates: Vec<String> = columns
        .iter()
        .filter(|column| !primary_key.contains(column))
        .map(|column| {
            let quoted = quote_identifier(column);
            format!("{} = EXCLUDED.{}", quoted, quoted)
        })
        .collect();

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {target} SELECT * FROM jsonb_populate_recordset(NULL::{target}, $1::jsonb) \
         ON CONFLICT ({}) {}",
        quote_identifier_list(primary_key),
        action
    )
}

#[async_trait]
impl StoragePort for PostgresStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tables(&self) -> Result<BTreeSet<TableId>> {
        let rows = self
            .client
            .query(
                "SELECT tablename::text FROM pg_catalog.pg_tables
                 WHERE schemaname = $1
                 ORDER BY tablename",
                &[&self.schema],
            )
            .await
            .map_err(|e| MigrationError::read(format!("{}.*", self.schema), e))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn metadata(&self, table: &str) -> Result<TableMetadata> {
        let shape = self.shape(table).await?;
        Ok(TableMetadata {
            primary_key: shape.primary_key,
        })
    }

    async fn stats(&self) -> Result<BTreeMap<TableId, TableStats>> {
        let mut stats = BTreeMap::new();
        for table in self.list_tables().await? {
            let query = format!("SELECT COUNT(*) FROM {}", self.qualified(&table));
            let count: i64 = self
                .client
                .query_one(&query, &[])
                .await
                .map_err(|e| MigrationError::read(table.as_str(), e))?
                .get(0);
            tracing::debug!("{}.{}: {} rows", self.schema, table, count);
            stats.insert(
                table,
                TableStats {
                    count: count.max(0) as u64,
                },
            );
        }
        Ok(stats)
    }

    async fn select_page(
        &self,
        table: &str,
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let query = select_page_query(&self.schema, table, order_by);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = self
            .client
            .query(&query, &[&limit, &offset])
            .await
            .map_err(|e| MigrationError::read(table, e))?;

        rows.iter()
            .map(|row| match row.get::<_, Value>(0) {
                Value::Object(map) => Ok(map),
                other => Err(MigrationError::read(
                    table,
                    format!("expected a JSON object per row, got {}", other),
                )),
            })
            .collect()
    }

    async fn upsert(&self, table: &str, batch: Vec<Row>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let shape = match self.shape(table).await {
            Ok(shape) => shape,
            Err(MigrationError::Read { message, .. }) => {
                return Err(MigrationError::write(table, message))
            }
            Err(e) => return Err(e),
        };

        let query = upsert_query(&self.schema, table, &shape.primary_key, &shape.columns);
        let payload = Value::Array(batch.into_iter().map(Value::Object).collect());

        let written = self
            .client
            .execute(&query, &[&payload])
            .await
            .map_err(|e| MigrationError::write(table, e))?;
        tracing::debug!("Upserted {} rows into {}.{}", written, self.schema, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_page_query_orders_by_every_key_field() {
        let query = select_page_query(
            "public",
            "memberships",
            &["tenant".to_string(), "id".to_string()],
        );
        assert_eq!(
            query,
            "SELECT to_jsonb(t) FROM \"public\".\"memberships\" AS t \
             ORDER BY t.\"tenant\", t.\"id\" LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn test_upsert_query_updates_non_key_columns() {
        let query = upsert_query(
            "public",
            "users",
            &["id".to_string()],
            &["id".to_string(), "name".to_string(), "email".to_string()],
        );
        assert!(query.starts_with(
            "INSERT INTO \"public\".\"users\" SELECT * FROM \
             jsonb_populate_recordset(NULL::\"public\".\"users\", $1::jsonb)"
        ));
        assert!(query.ends_with(
            "ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \
             \"email\" = EXCLUDED.\"email\""
        ));
    }

    #[test]
    fn test_upsert_query_key_only_table() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let query = upsert_query("app", "links", &columns, &columns);
        assert!(query.ends_with("ON CONFLICT (\"a\", \"b\") DO NOTHING"));
    }

    #[test]
    fn test_qualified_name_escapes_quotes() {
        assert_eq!(qualified_name("s", "t\"x"), "\"s\".\"t\"\"x\"");
    }

    #[tokio::test]
    #[ignore]
    async fn test_lists_tables_on_real_database() {
        let url = std::env::var("TEST_SOURCE_URL").unwrap();
        let storage = PostgresStorage::connect(&url, "public").await.unwrap();

        let tables = storage.list_tables().await.unwrap();
        let stats = storage.stats().await.unwrap();
        println!("Found {} tables", tables.len());
        for table in &tables {
            println!("  - {} ({} rows)", table, stats[table].count);
        }
    }
}
