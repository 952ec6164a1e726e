// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Load target that writes SQL statements to a script file
//!
//! The script is opened for append so a resumed load continues it. Each
//! statement is synced before the executor returns, which keeps the script
//! no further behind than the progress journal.

use std::path::Path;

use async_trait::async_trait;
use dumpload::{Row, SqlError, SqlExecutor};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct SqlScriptWriter {
    file: Mutex<File>,
}

impl SqlScriptWriter {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    async fn write(&self, statement: String) -> Result<(), SqlError> {
        let mut file = self.file.lock().await;
        let io = async {
            file.write_all(statement.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        };
        io.await
            .map_err(|e| SqlError::new(format!("Failed to write SQL script: {e}")))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\0' => quoted.push_str("\\0"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Render one JSON cell as a SQL literal
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        other => quote_string(&other.to_string()),
    }
}

#[async_trait]
impl SqlExecutor for SqlScriptWriter {
    async fn create_schema(&self, schema: &str) -> Result<(), SqlError> {
        self.write(format!(
            "CREATE DATABASE IF NOT EXISTS {};\n",
            quote_identifier(schema)
        ))
        .await
    }

    async fn create_table(&self, _schema: &str, _table: &str, ddl: &str) -> Result<(), SqlError> {
        self.write(format!("{};\n", ddl.trim_end().trim_end_matches(';')))
            .await
    }

    async fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Row>) -> Result<u64, SqlError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(sql_literal).collect();
                format!("({})", cells.join(", "))
            })
            .collect();
        self.write(format!(
            "INSERT INTO {}.{} VALUES\n{};\n",
            quote_identifier(schema),
            quote_identifier(table),
            values.join(",\n")
        ))
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literals() {
        assert_eq!(sql_literal(&json!(null)), "NULL");
        assert_eq!(sql_literal(&json!(true)), "1");
        assert_eq!(sql_literal(&json!(42)), "42");
        assert_eq!(sql_literal(&json!("it's")), "'it''s'");
        assert_eq!(sql_literal(&json!("a\\b\n")), "'a\\\\b\\n'");
        assert_eq!(sql_literal(&json!([1, 2])), "'[1,2]'");
    }

    #[tokio::test]
    async fn test_script_appends_statements() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("load.sql");

        let writer = SqlScriptWriter::open(&path).await.expect("open");
        writer.create_schema("world").await.expect("schema");
        writer
            .create_table("world", "city", "CREATE TABLE `world`.`city` (`id` INT);")
            .await
            .expect("table");
        let inserted = writer
            .insert_rows("world", "city", vec![vec![json!(1)], vec![json!(2)]])
            .await
            .expect("insert");
        assert_eq!(inserted, 2);
        drop(writer);

        let again = SqlScriptWriter::open(&path).await.expect("reopen");
        again
            .insert_rows("world", "city", vec![vec![json!(3)]])
            .await
            .expect("insert");

        let script = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            script,
            "CREATE DATABASE IF NOT EXISTS `world`;\n\
             CREATE TABLE `world`.`city` (`id` INT);\n\
             INSERT INTO `world`.`city` VALUES\n(1),\n(2);\n\
             INSERT INTO `world`.`city` VALUES\n(3);\n"
        );
    }
}
