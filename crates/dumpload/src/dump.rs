// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump producer: database objects to storage objects
//!
//! Write order is what makes a dump safe to abort:
//!
//! 1. `@.json` and every `<schema>.json`
//! 2. per table, `<schema>@<table>.json` then its chunks (tables in parallel)
//! 3. `@.done.json`, only after every write above has succeeded
//!
//! A dump that stops anywhere before step 3 has no completion marker, and
//! every load of it fails with a not-found class error.

use crate::grant::AccessGrant;
use crate::manifest::{self, CompletionMarker, DumpManifest, SchemaEntry, TableInventory, TableMetadata};
use crate::options::DumpOptions;
use crate::sql::SqlSource;
use crate::{Error, Operation, OperationError, Result};
use bytes::Bytes;
use chrono::Utc;
use diagnostics::*;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use storage::{ObjectAccessor, OpenMode, StorageLocation, open_accessor};
use tokio_util::sync::CancellationToken;

/// Server-owned schemas a whole-instance dump leaves out
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub dump_id: String,
    pub schemas: usize,
    pub tables: usize,
    pub chunks: usize,
    pub rows: u64,
    pub bytes: u64,
    pub dry_run: bool,
}

impl fmt::Display for DumpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(
                f,
                "{} tables in {} schemas would be dumped (dry run).",
                self.tables, self.schemas
            )
        } else {
            write!(
                f,
                "{} tables in {} schemas were dumped: {} rows in {} chunks, {} bytes.",
                self.tables, self.schemas, self.rows, self.chunks, self.bytes
            )
        }
    }
}

/// Writes one dump of a [`SqlSource`] through an [`ObjectAccessor`]
pub struct DumpProducer {
    source: Arc<dyn SqlSource>,
    accessor: Arc<dyn ObjectAccessor>,
    location: StorageLocation,
    grant: AccessGrant,
    options: DumpOptions,
    cancel: CancellationToken,
}

impl DumpProducer {
    pub fn new(
        source: Arc<dyn SqlSource>,
        accessor: Arc<dyn ObjectAccessor>,
        location: StorageLocation,
        options: DumpOptions,
    ) -> Self {
        Self {
            grant: AccessGrant::for_location(&location),
            source,
            accessor,
            location,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_grant(mut self, grant: AccessGrant) -> Self {
        self.grant = grant;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the dump before its next write
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dump `schemas`, or every schema the source has when empty
    pub async fn dump(&self, schemas: &[String]) -> Result<DumpSummary> {
        let target = self.location.to_string();
        self.grant.check_dump(&self.location, Utc::now())?;

        let topology = self.enumerate(schemas).await?;
        let schema_count = topology.len();
        let table_count: usize = topology.iter().map(|s| s.tables.len()).sum();
        info!(
            "Dumping {table_count} tables in {schema_count} schemas to {target}",
            table_count,
            schema_count,
            target
        );

        if self.options.dry_run {
            return Ok(DumpSummary {
                schemas: schema_count,
                tables: table_count,
                dry_run: true,
                ..DumpSummary::default()
            });
        }

        if self.accessor.exists(manifest::MANIFEST_KEY).await? {
            return Err(Error::DumpExists { location: target });
        }

        let manifest = DumpManifest::new(target, self.options.compression, topology);
        manifest::write(&manifest, self.accessor.as_ref()).await?;

        let tables: Vec<(&str, &str)> = manifest
            .schemas
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (s.name.as_str(), t.as_str())))
            .collect();
        let mut inventory: Vec<TableInventory> = stream::iter(tables)
            .map(|(schema, table)| self.dump_table(&manifest, schema, table))
            .buffer_unordered(self.options.threads.max(1))
            .try_collect()
            .await?;
        inventory.sort_by(|a, b| (&a.schema, &a.table).cmp(&(&b.schema, &b.table)));

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let summary = DumpSummary {
            dump_id: manifest.dump_id.clone(),
            schemas: schema_count,
            tables: table_count,
            chunks: inventory.iter().map(|t| t.chunks).sum(),
            rows: inventory.iter().map(|t| t.rows).sum(),
            bytes: inventory.iter().map(|t| t.bytes).sum(),
            dry_run: false,
        };
        manifest::write_marker(
            &CompletionMarker {
                dump_id: manifest.dump_id.clone(),
                completed_at: Utc::now(),
                tables: inventory,
            },
            self.accessor.as_ref(),
        )
        .await?;

        let dump_id = summary.dump_id.as_str();
        info!("Dump {dump_id} complete", dump_id);
        Ok(summary)
    }

    async fn enumerate(&self, requested: &[String]) -> Result<Vec<SchemaEntry>> {
        let available = self
            .source
            .list_schemas()
            .await
            .map_err(Error::sql("schema list"))?;
        let names: Vec<String> = if requested.is_empty() {
            available
                .into_iter()
                .filter(|name| !SYSTEM_SCHEMAS.contains(&name.as_str()))
                .collect()
        } else {
            if let Some(missing) = requested.iter().find(|s| !available.contains(s)) {
                return Err(Error::Configuration(format!(
                    "Schema '{missing}' does not exist"
                )));
            }
            requested.to_vec()
        };

        let mut topology = Vec::with_capacity(names.len());
        for name in names {
            let tables = self
                .source
                .list_tables(&name)
                .await
                .map_err(Error::sql(&name))?
                .into_iter()
                .filter(|table| self.options.includes_table(&name, table))
                .collect();
            topology.push(SchemaEntry { name, tables });
        }
        Ok(topology)
    }

    async fn dump_table(
        &self,
        manifest: &DumpManifest,
        schema: &str,
        table: &str,
    ) -> Result<TableInventory> {
        let owner = format!("{schema}.{table}");
        let ddl = self
            .source
            .table_ddl(schema, table)
            .await
            .map_err(Error::sql(&owner))?;
        let metadata = TableMetadata {
            schema: schema.to_string(),
            table: table.to_string(),
            ddl,
            compression: manifest.compression,
        };
        self.check_cancelled()?;
        self.accessor
            .put(
                &manifest::table_key(schema, table),
                manifest::to_json_bytes(&metadata)?,
            )
            .await?;

        let mut writer = ChunkWriter {
            accessor: self.accessor.as_ref(),
            schema,
            table,
            compression: manifest.compression,
            buffer: Vec::new(),
            inventory: TableInventory {
                schema: schema.to_string(),
                table: table.to_string(),
                chunks: 0,
                rows: 0,
                bytes: 0,
            },
        };
        let page_size = self.options.rows_per_fetch.max(1);
        let bytes_per_chunk = self.options.bytes_per_chunk.max(1);
        let mut offset = 0u64;
        loop {
            let rows = self
                .source
                .fetch_rows(schema, table, offset, page_size)
                .await
                .map_err(Error::sql(&owner))?;
            let fetched = rows.len();
            offset += fetched as u64;
            for row in rows {
                serde_json::to_writer(&mut writer.buffer, &row)?;
                writer.buffer.push(b'\n');
                writer.inventory.rows += 1;
                if writer.buffer.len() >= bytes_per_chunk {
                    self.check_cancelled()?;
                    writer.cut().await?;
                }
            }
            if fetched < page_size {
                break;
            }
        }
        if !writer.buffer.is_empty() {
            self.check_cancelled()?;
            writer.cut().await?;
        }

        let chunks = writer.inventory.chunks;
        let rows = writer.inventory.rows;
        debug!("Dumped {owner}: {rows} rows in {chunks} chunks", owner, rows, chunks);
        Ok(writer.inventory)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Accumulates encoded rows of one table and writes them as chunks
struct ChunkWriter<'a> {
    accessor: &'a dyn ObjectAccessor,
    schema: &'a str,
    table: &'a str,
    compression: manifest::Compression,
    buffer: Vec<u8>,
    inventory: TableInventory,
}

impl ChunkWriter<'_> {
    async fn cut(&mut self) -> Result<()> {
        let key = manifest::chunk_key(
            self.schema,
            self.table,
            self.inventory.chunks,
            self.compression,
        );
        let encoded = self.compression.encode(std::mem::take(&mut self.buffer))?;
        let size = encoded.len() as u64;
        self.accessor.put(&key, Bytes::from(encoded)).await?;
        self.inventory.chunks += 1;
        self.inventory.bytes += size;
        debug!("Wrote {key} ({size} bytes)", key, size);
        Ok(())
    }
}

/// Dump the named schemas to `location`
pub async fn dump_schemas(
    source: Arc<dyn SqlSource>,
    location: &StorageLocation,
    schemas: &[String],
    options: DumpOptions,
) -> std::result::Result<DumpSummary, OperationError> {
    if schemas.is_empty() {
        return Err(OperationError::new(
            Operation::DumpSchemas,
            Error::Configuration("At least one schema is required".to_string()),
        ));
    }
    run_dump(source, location, schemas, options)
        .await
        .map_err(|error| OperationError::new(Operation::DumpSchemas, error))
}

/// Dump every schema of the source to `location`
pub async fn dump_instance(
    source: Arc<dyn SqlSource>,
    location: &StorageLocation,
    options: DumpOptions,
) -> std::result::Result<DumpSummary, OperationError> {
    run_dump(source, location, &[], options)
        .await
        .map_err(|error| OperationError::new(Operation::DumpInstance, error))
}

async fn run_dump(
    source: Arc<dyn SqlSource>,
    location: &StorageLocation,
    schemas: &[String],
    options: DumpOptions,
) -> Result<DumpSummary> {
    let accessor = open_accessor(location, &options.storage, OpenMode::Write)?;
    DumpProducer::new(source, accessor, location.clone(), options)
        .dump(schemas)
        .await
}
