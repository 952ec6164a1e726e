// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory database usable as both dump source and load target

use crate::SqlError;
use crate::sql::{Row, SqlExecutor, SqlSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub ddl: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// schema -> table -> data; also the JSON form of a catalog file
pub type Catalog = BTreeMap<String, BTreeMap<String, TableData>>;

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    catalog: Mutex<Catalog>,
    /// Tables whose inserts fail, for exercising interrupted loads
    failing: Mutex<BTreeSet<(String, String)>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            failing: Mutex::default(),
        }
    }

    /// Add a table with a generated DDL statement and `rows`
    pub async fn add_table(&self, schema: &str, table: &str, rows: Vec<Row>) {
        let ddl = format!("CREATE TABLE `{schema}`.`{table}` (`id` INT PRIMARY KEY, `value` TEXT)");
        self.catalog
            .lock()
            .await
            .entry(schema.to_string())
            .or_default()
            .insert(table.to_string(), TableData { ddl, rows });
    }

    pub async fn snapshot(&self) -> Catalog {
        self.catalog.lock().await.clone()
    }

    pub async fn row_count(&self, schema: &str, table: &str) -> Option<usize> {
        self.catalog
            .lock()
            .await
            .get(schema)
            .and_then(|tables| tables.get(table))
            .map(|data| data.rows.len())
    }

    pub async fn fail_inserts_into(&self, schema: &str, table: &str) {
        self.failing
            .lock()
            .await
            .insert((schema.to_string(), table.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.failing.lock().await.clear();
    }
}

#[async_trait]
impl SqlExecutor for MemoryDatabase {
    async fn create_schema(&self, schema: &str) -> Result<(), SqlError> {
        self.catalog
            .lock()
            .await
            .entry(schema.to_string())
            .or_default();
        Ok(())
    }

    async fn create_table(&self, schema: &str, table: &str, ddl: &str) -> Result<(), SqlError> {
        let mut catalog = self.catalog.lock().await;
        let tables = catalog
            .get_mut(schema)
            .ok_or_else(|| SqlError::new(format!("Unknown database '{schema}'")))?;
        match tables.get(table) {
            Some(existing) if existing.ddl != ddl => Err(SqlError::new(format!(
                "Table '{table}' already exists with a different definition"
            ))),
            Some(_) => Ok(()),
            None => {
                tables.insert(
                    table.to_string(),
                    TableData {
                        ddl: ddl.to_string(),
                        rows: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Row>) -> Result<u64, SqlError> {
        if self
            .failing
            .lock()
            .await
            .contains(&(schema.to_string(), table.to_string()))
        {
            return Err(SqlError::new(format!(
                "Lost connection to MySQL server during insert into '{table}'"
            )));
        }
        let mut catalog = self.catalog.lock().await;
        let data = catalog
            .get_mut(schema)
            .and_then(|tables| tables.get_mut(table))
            .ok_or_else(|| SqlError::new(format!("Table '{schema}.{table}' doesn't exist")))?;
        let inserted = rows.len() as u64;
        data.rows.extend(rows);
        Ok(inserted)
    }
}

#[async_trait]
impl SqlSource for MemoryDatabase {
    async fn list_schemas(&self) -> Result<Vec<String>, SqlError> {
        Ok(self.catalog.lock().await.keys().cloned().collect())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, SqlError> {
        self.catalog
            .lock()
            .await
            .get(schema)
            .map(|tables| tables.keys().cloned().collect())
            .ok_or_else(|| SqlError::new(format!("Unknown database '{schema}'")))
    }

    async fn table_ddl(&self, schema: &str, table: &str) -> Result<String, SqlError> {
        self.catalog
            .lock()
            .await
            .get(schema)
            .and_then(|tables| tables.get(table))
            .map(|data| data.ddl.clone())
            .ok_or_else(|| SqlError::new(format!("Table '{schema}.{table}' doesn't exist")))
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>, SqlError> {
        let catalog = self.catalog.lock().await;
        let data = catalog
            .get(schema)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| SqlError::new(format!("Table '{schema}.{table}' doesn't exist")))?;
        Ok(data
            .rows
            .iter()
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_source_pages_rows() {
        let db = MemoryDatabase::new();
        db.add_table("world", "city", (0..5).map(|i| vec![json!(i), json!("x")]).collect())
            .await;
        let page = db.fetch_rows("world", "city", 3, 10).await.expect("rows");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0][0], json!(3));
        assert_eq!(db.list_tables("world").await.expect("tables"), vec!["city"]);
        assert!(db.list_tables("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_executor_is_tolerant_of_repeated_creates() {
        let db = MemoryDatabase::new();
        db.create_schema("s").await.expect("schema");
        db.create_schema("s").await.expect("again");
        db.create_table("s", "t", "CREATE TABLE t (a INT)").await.expect("table");
        db.create_table("s", "t", "CREATE TABLE t (a INT)").await.expect("same ddl");
        assert!(db.create_table("s", "t", "CREATE TABLE t (b INT)").await.is_err());
        assert!(db.create_table("missing", "t", "CREATE TABLE t (a INT)").await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let db = MemoryDatabase::new();
        db.create_schema("s").await.expect("schema");
        db.create_table("s", "t", "ddl").await.expect("table");
        db.fail_inserts_into("s", "t").await;
        assert!(db.insert_rows("s", "t", vec![vec![json!(1)]]).await.is_err());
        db.clear_failures().await;
        assert_eq!(db.insert_rows("s", "t", vec![vec![json!(1)]]).await.expect("insert"), 1);
        assert_eq!(db.row_count("s", "t").await, Some(1));
    }
}
