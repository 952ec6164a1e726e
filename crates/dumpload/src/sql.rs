// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The SQL execution layer, as seen by dump and load

use crate::SqlError;
use async_trait::async_trait;

/// One row, column values in table order
pub type Row = Vec<serde_json::Value>;

/// Target of a load
///
/// Implementations should tolerate `create_schema` for a schema that
/// already exists: a resumed load may repeat the call for a schema whose
/// creation was not yet recorded.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn create_schema(&self, schema: &str) -> Result<(), SqlError>;

    async fn create_table(&self, schema: &str, table: &str, ddl: &str) -> Result<(), SqlError>;

    /// Insert `rows`, returning the number inserted
    async fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Row>) -> Result<u64, SqlError>;
}

/// Source of a dump
#[async_trait]
pub trait SqlSource: Send + Sync {
    async fn list_schemas(&self) -> Result<Vec<String>, SqlError>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, SqlError>;

    async fn table_ddl(&self, schema: &str, table: &str) -> Result<String, SqlError>;

    /// Up to `limit` rows starting at `offset`, in a stable order
    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>, SqlError>;
}
