// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Load consumer: storage objects back into a database
//!
//! A load moves through
//! `Unstarted -> ValidatingGrant -> ReadingManifest -> Applying -> Completed`
//! and ends in `Failed` on any error. Every configuration problem is found
//! before the first storage request. Objects are applied in dependency
//! order (schema, then table metadata, then chunks in sequence) and each
//! one is recorded in the progress journal only after the target accepted
//! it, so a failed or cancelled load can be resumed.

use crate::grant::AccessGrant;
use crate::manifest::{self, DataObject, DumpManifest, Owner, SchemaMetadata, TableMetadata};
use crate::options::{LoadOptions, ResumeMode};
use crate::progress::{self, DEFAULT_PROGRESS_FILE, ProgressRecord};
use crate::sql::{Row, SqlExecutor};
use crate::{Error, ErrorClass, Operation, OperationError, Result};
use chrono::Utc;
use diagnostics::*;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{ObjectAccessor, OpenMode, StorageLocation, looks_remote, open_accessor};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unstarted,
    ValidatingGrant,
    ReadingManifest,
    Applying,
    Completed,
    Failed,
}

/// What one invocation loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Tables completed by this invocation
    pub tables: usize,
    /// Schemas created, or with tables completed, by this invocation
    pub schemas: usize,
    pub chunks: usize,
    pub rows: u64,
    pub bytes: u64,
    /// Objects skipped because a previous invocation applied them
    pub skipped_objects: usize,
    pub dry_run: bool,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(
                f,
                "{} tables in {} schemas would be loaded (dry run).",
                self.tables, self.schemas
            )
        } else {
            write!(
                f,
                "{} tables in {} schemas were loaded.",
                self.tables, self.schemas
            )
        }
    }
}

/// Where progress is persisted, decided before any storage call
fn resolve_progress_path(
    location: &StorageLocation,
    options: &LoadOptions,
) -> Result<Option<PathBuf>> {
    let path = match options.progress_file.as_deref() {
        Some("") => None,
        Some(text) => {
            if looks_remote(text) {
                let message = if location.is_par() {
                    "When using a prefix PAR to load a dump, the progressFile option must be a local file"
                } else {
                    "The progressFile option must be a local file"
                };
                return Err(Error::Configuration(message.to_string()));
            }
            Some(PathBuf::from(text.strip_prefix("file://").unwrap_or(text)))
        }
        None => match location {
            StorageLocation::Par(_) => {
                return Err(Error::Configuration(
                    "When using a PAR to load a dump, the progressFile option must be defined"
                        .to_string(),
                ));
            }
            StorageLocation::Local(dir) => Some(dir.join(DEFAULT_PROGRESS_FILE)),
        },
    };
    if path.is_none() && options.resume == ResumeMode::Required {
        return Err(Error::Configuration(
            "Resuming a load requires a progress file".to_string(),
        ));
    }
    Ok(path)
}

/// Progress record plus where it is flushed, shared by the table tasks
struct ProgressSink {
    record: ProgressRecord,
    path: Option<PathBuf>,
}

impl ProgressSink {
    async fn flush(&mut self) -> Result<()> {
        match &self.path {
            Some(path) => progress::flush(&mut self.record, path).await,
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct TableOutcome {
    schema: String,
    completed: bool,
    chunks: usize,
    rows: u64,
    bytes: u64,
    skipped: usize,
}

/// Loads one dump into a [`SqlExecutor`]
pub struct LoadConsumer {
    accessor: Arc<dyn ObjectAccessor>,
    location: StorageLocation,
    grant: AccessGrant,
    options: LoadOptions,
    target: Arc<dyn SqlExecutor>,
    cancel: CancellationToken,
    state: LoadState,
}

impl LoadConsumer {
    pub fn new(
        accessor: Arc<dyn ObjectAccessor>,
        location: StorageLocation,
        target: Arc<dyn SqlExecutor>,
        options: LoadOptions,
    ) -> Self {
        Self {
            grant: AccessGrant::for_location(&location),
            accessor,
            location,
            options,
            target,
            cancel: CancellationToken::new(),
            state: LoadState::Unstarted,
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

    /// Token that stops the load before its next fetch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    fn enter(&mut self, state: LoadState) {
        let name = format!("{state:?}");
        debug!("Load state {name}", name);
        self.state = state;
    }

    pub async fn load(&mut self) -> Result<LoadSummary> {
        match self.run().await {
            Ok(summary) => {
                self.enter(LoadState::Completed);
                Ok(summary)
            }
            Err(err) => {
                self.enter(LoadState::Failed);
                let reason = err.to_string();
                warn!("Load failed: {reason}", reason);
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<LoadSummary> {
        let source = self.location.to_string();

        self.enter(LoadState::ValidatingGrant);
        self.grant.check_load(&self.location, Utc::now())?;
        let progress_path = resolve_progress_path(&self.location, &self.options)?;

        self.enter(LoadState::ReadingManifest);
        let existing = match (&progress_path, self.options.resume) {
            (Some(_), ResumeMode::Reset) | (None, _) => None,
            (Some(path), ResumeMode::Required) => match progress::load(path).await? {
                Some(record) => Some(record),
                None => {
                    return Err(Error::ProgressFileMissing {
                        path: path.display().to_string(),
                    });
                }
            },
            (Some(path), ResumeMode::Auto) => progress::load(path).await?,
        };

        info!("Loading dump from {source}", source);
        let manifest = manifest::read(self.accessor.as_ref()).await?;
        let record = match existing {
            Some(record) if record.dump_id() != manifest.dump_id => {
                return Err(Error::ProgressMismatch {
                    path: progress_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    expected: manifest.dump_id.clone(),
                    found: record.dump_id().to_string(),
                });
            }
            Some(record) => {
                let applied = record.counts().objects_applied;
                info!("Resuming load, {applied} objects already applied", applied);
                record
            }
            None => ProgressRecord::new(&manifest.dump_id, &self.location),
        };

        let plan = self.plan(&manifest);
        self.cross_reference(&manifest, &plan).await?;

        if self.options.dry_run {
            return Ok(LoadSummary {
                tables: plan
                    .iter()
                    .filter(|(s, t)| !record.is_table_done(s, t))
                    .count(),
                // A schema counts while its own object or any of its tables is pending
                schemas: self
                    .selected_schemas(&manifest)
                    .into_iter()
                    .filter(|schema| {
                        !record.is_applied(&manifest::schema_key(schema))
                            || plan
                                .iter()
                                .any(|(s, t)| s.as_str() == *schema && !record.is_table_done(s, t))
                    })
                    .count(),
                dry_run: true,
                ..LoadSummary::default()
            });
        }

        self.enter(LoadState::Applying);
        let sink = Mutex::new(ProgressSink {
            record,
            path: progress_path,
        });
        sink.lock().await.flush().await?;
        let summary = self.apply(&manifest, &plan, &sink).await?;

        let summary_text = summary.to_string();
        info!("{summary_text}", summary_text);
        Ok(summary)
    }

    /// Selected schemas in manifest order, including those without tables
    fn selected_schemas<'a>(&self, manifest: &'a DumpManifest) -> Vec<&'a str> {
        manifest
            .schema_names()
            .filter(|name| self.options.includes_schema(name))
            .collect()
    }

    /// Selected (schema, table) pairs in manifest order
    fn plan(&self, manifest: &DumpManifest) -> Vec<(String, String)> {
        manifest
            .schemas
            .iter()
            .filter(|s| self.options.includes_schema(&s.name))
            .flat_map(|s| {
                s.tables
                    .iter()
                    .filter(|t| self.options.includes_table(&s.name, t))
                    .map(|t| (s.name.clone(), t.clone()))
            })
            .collect()
    }

    /// Every object the marker promises for the plan must be listed
    async fn cross_reference(
        &self,
        manifest: &DumpManifest,
        plan: &[(String, String)],
    ) -> Result<()> {
        let objects: Vec<DataObject> = self
            .accessor
            .list("")
            .try_filter_map(|entry| {
                futures::future::ready(Ok(DataObject::from_listing(&entry.key, entry.size)))
            })
            .try_collect()
            .await?;
        let count = objects.len();
        debug!("Listed {count} dump objects", count);

        // Chunks written with another compression do not count
        let extension = manifest.compression.extension();
        let listed: BTreeSet<(Owner, Option<usize>)> = objects
            .into_iter()
            .filter(|object| object.sequence.is_none() || object.key.ends_with(extension))
            .map(|object| (object.owner, object.sequence))
            .collect();
        let require = |owner: Owner, sequence: Option<usize>, key: String| {
            if listed.contains(&(owner, sequence)) {
                Ok(())
            } else {
                Err(Error::MissingObject { key })
            }
        };

        for schema in self.selected_schemas(manifest) {
            require(
                Owner::Schema(schema.to_string()),
                None,
                manifest::schema_key(schema),
            )?;
        }
        for (schema, table) in plan {
            let owner = Owner::Table {
                schema: schema.clone(),
                table: table.clone(),
            };
            require(owner.clone(), None, manifest::table_key(schema, table))?;
            let chunks = manifest
                .table_inventory(schema, table)
                .map_or(0, |inventory| inventory.chunks);
            for index in 0..chunks {
                let key = manifest::chunk_key(schema, table, index, manifest.compression);
                require(owner.clone(), Some(index), key)?;
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        manifest: &DumpManifest,
        plan: &[(String, String)],
        sink: &Mutex<ProgressSink>,
    ) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        let mut schemas_touched = BTreeSet::new();

        // Schemas first, in manifest order
        let schemas = self.selected_schemas(manifest);
        for schema in &schemas {
            self.check_cancelled()?;
            let key = manifest::schema_key(schema);
            if sink.lock().await.record.is_applied(&key) {
                summary.skipped_objects += 1;
                continue;
            }
            let data = self.accessor.get(&key).await?;
            let metadata: SchemaMetadata = manifest::from_json_bytes(&key, &data)?;
            if metadata.schema != *schema {
                return Err(Error::invalid_object(
                    &key,
                    format!("describes schema '{}'", metadata.schema),
                ));
            }
            self.target
                .create_schema(schema)
                .await
                .map_err(Error::sql(schema))?;
            self.record(sink, &key, schema, data.len() as u64).await?;
            summary.bytes += data.len() as u64;
            schemas_touched.insert(schema.to_string());
        }

        // Tables concurrently; the first failure stops the others
        let failed = self.cancel.child_token();
        let results: Vec<Result<TableOutcome>> = stream::iter(plan)
            .map(|(schema, table)| {
                let failed = &failed;
                async move {
                    let result = self.load_table(manifest, schema, table, sink, failed).await;
                    if result.is_err() {
                        failed.cancel();
                    }
                    result
                }
            })
            .buffer_unordered(self.options.threads.max(1))
            .collect()
            .await;

        let mut first_error: Option<Error> = None;
        for result in results {
            match result {
                Ok(outcome) => {
                    summary.chunks += outcome.chunks;
                    summary.rows += outcome.rows;
                    summary.bytes += outcome.bytes;
                    summary.skipped_objects += outcome.skipped;
                    if outcome.completed {
                        summary.tables += 1;
                        schemas_touched.insert(outcome.schema);
                    }
                }
                Err(err) => {
                    // A table stopped by another's failure reports Cancelled
                    let replace = match &first_error {
                        None => true,
                        Some(current) => {
                            current.class() == ErrorClass::Cancelled
                                && err.class() != ErrorClass::Cancelled
                        }
                    };
                    if replace {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut sink = sink.lock().await;
        for schema in &schemas {
            let complete = plan
                .iter()
                .filter(|(s, _)| s == schema)
                .all(|(s, t)| sink.record.is_table_done(s, t));
            if complete {
                sink.record.record_schema_done(schema);
            }
        }
        sink.flush().await?;

        summary.schemas = schemas_touched.len();
        Ok(summary)
    }

    async fn load_table(
        &self,
        manifest: &DumpManifest,
        schema: &str,
        table: &str,
        sink: &Mutex<ProgressSink>,
        stop: &CancellationToken,
    ) -> Result<TableOutcome> {
        let mut outcome = TableOutcome {
            schema: schema.to_string(),
            ..TableOutcome::default()
        };
        if sink.lock().await.record.is_table_done(schema, table) {
            return Ok(outcome);
        }
        let owner = format!("{schema}.{table}");

        let key = manifest::table_key(schema, table);
        if sink.lock().await.record.is_applied(&key) {
            outcome.skipped += 1;
        } else {
            check(stop)?;
            let data = self.accessor.get(&key).await?;
            let metadata: TableMetadata = manifest::from_json_bytes(&key, &data)?;
            if metadata.schema != schema || metadata.table != table {
                return Err(Error::invalid_object(
                    &key,
                    format!("describes table '{}.{}'", metadata.schema, metadata.table),
                ));
            }
            self.target
                .create_table(schema, table, &metadata.ddl)
                .await
                .map_err(Error::sql(&owner))?;
            self.record(sink, &key, &owner, data.len() as u64).await?;
            outcome.bytes += data.len() as u64;
        }

        let chunks = manifest
            .table_inventory(schema, table)
            .map_or(0, |inventory| inventory.chunks);
        for index in 0..chunks {
            let key = manifest::chunk_key(schema, table, index, manifest.compression);
            if sink.lock().await.record.is_applied(&key) {
                outcome.skipped += 1;
                continue;
            }
            check(stop)?;
            let data = self.accessor.get(&key).await?;
            let rows = decode_rows(&key, manifest.compression, &data)?;
            let inserted = self
                .target
                .insert_rows(schema, table, rows)
                .await
                .map_err(Error::sql(&owner))?;
            self.record(sink, &key, &owner, data.len() as u64).await?;
            outcome.chunks += 1;
            outcome.rows += inserted;
            outcome.bytes += data.len() as u64;
            debug!("Applied {key}: {inserted} rows", key, inserted);
        }

        let rows = manifest
            .table_inventory(schema, table)
            .map_or(outcome.rows, |inventory| inventory.rows);
        let mut sink = sink.lock().await;
        sink.record.record_table_done(schema, table, rows);
        sink.flush().await?;
        outcome.completed = true;
        Ok(outcome)
    }

    /// Mark `key` applied and make it durable before moving on
    async fn record(
        &self,
        sink: &Mutex<ProgressSink>,
        key: &str,
        owner: &str,
        bytes: u64,
    ) -> Result<()> {
        let mut sink = sink.lock().await;
        sink.record.record_applied(key, owner, bytes);
        sink.flush().await
    }

    fn check_cancelled(&self) -> Result<()> {
        check(&self.cancel)
    }
}

fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn decode_rows(key: &str, compression: manifest::Compression, data: &[u8]) -> Result<Vec<Row>> {
    let plain = compression
        .decode(data)
        .map_err(|e| Error::invalid_object(key, e.to_string()))?;
    plain
        .split(|b| *b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .map(|line| manifest::from_json_bytes::<Row>(key, line))
        .collect()
}

/// Load the dump at `location` into `target`
pub async fn load_dump(
    location: &StorageLocation,
    target: Arc<dyn SqlExecutor>,
    options: LoadOptions,
) -> std::result::Result<LoadSummary, OperationError> {
    load_dump_with_grant(location, AccessGrant::for_location(location), target, options).await
}

/// Load with an explicitly declared grant
pub async fn load_dump_with_grant(
    location: &StorageLocation,
    grant: AccessGrant,
    target: Arc<dyn SqlExecutor>,
    options: LoadOptions,
) -> std::result::Result<LoadSummary, OperationError> {
    let wrap = |error| OperationError::new(Operation::LoadDump, error);
    let accessor = open_accessor(location, &options.storage, OpenMode::Read)
        .map_err(|e| wrap(e.into()))?;
    LoadConsumer::new(accessor, location.clone(), target, options)
        .with_grant(grant)
        .load()
        .await
        .map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn par(prefix: &str) -> StorageLocation {
        StorageLocation::parse(&format!(
            "https://objectstorage.example.com/p/LoAdToKeN/n/tenancy/b/dumps/o/{prefix}"
        ))
        .expect("par")
    }

    fn with_progress(progress_file: Option<&str>) -> LoadOptions {
        LoadOptions {
            progress_file: progress_file.map(str::to_string),
            ..LoadOptions::default()
        }
    }

    #[test]
    fn test_par_requires_progress_file() {
        let err = resolve_progress_path(&par(""), &with_progress(None)).expect_err("required");
        assert_eq!(
            err.to_string(),
            "When using a PAR to load a dump, the progressFile option must be defined"
        );
    }

    #[test]
    fn test_prefix_par_requires_local_progress_file() {
        let err = resolve_progress_path(
            &par("nightly/"),
            &with_progress(Some("http://whatever-file_starting-with-http")),
        )
        .expect_err("remote");
        assert_eq!(
            err.to_string(),
            "When using a prefix PAR to load a dump, the progressFile option must be a local file"
        );
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_bucket_par_requires_local_progress_file() {
        let err = resolve_progress_path(&par(""), &with_progress(Some("https://host/progress")))
            .expect_err("remote");
        assert_eq!(
            err.to_string(),
            "When using a prefix PAR to load a dump, the progressFile option must be a local file"
        );
    }

    #[test]
    fn test_local_dump_requires_local_progress_file() {
        let local = StorageLocation::Local(PathBuf::from("/dumps/world"));
        let err = resolve_progress_path(&local, &with_progress(Some("s3://b/progress.json")))
            .expect_err("remote");
        assert_eq!(err.to_string(), "The progressFile option must be a local file");
    }

    #[test]
    fn test_progress_path_forms() {
        assert_eq!(
            resolve_progress_path(&par(""), &with_progress(Some(""))).expect("no file"),
            None
        );
        assert_eq!(
            resolve_progress_path(&par("x/"), &with_progress(Some("file:///tmp/p.json")))
                .expect("local"),
            Some(PathBuf::from("/tmp/p.json"))
        );
        let local = StorageLocation::Local(PathBuf::from("/dumps/world"));
        assert_eq!(
            resolve_progress_path(&local, &with_progress(None)).expect("default"),
            Some(PathBuf::from("/dumps/world/load-progress.json"))
        );
        let required = LoadOptions {
            progress_file: Some(String::new()),
            resume: ResumeMode::Required,
            ..LoadOptions::default()
        };
        assert!(resolve_progress_path(&local, &required).is_err());
    }

    #[test]
    fn test_summary_line() {
        let summary = LoadSummary {
            tables: 251,
            schemas: 1,
            ..LoadSummary::default()
        };
        assert_eq!(summary.to_string(), "251 tables in 1 schemas were loaded.");
    }

    #[test]
    fn test_decode_rows_skips_blank_lines() {
        let rows = decode_rows(
            "s@t@0.jsonl",
            manifest::Compression::None,
            b"[1,\"a\"]\n\n[2,null]\n",
        )
        .expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(decode_rows("s@t@0.jsonl", manifest::Compression::None, b"{oops\n").is_err());
    }
}
