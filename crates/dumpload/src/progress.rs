// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Resumable load progress
//!
//! A progress file is an append-only JSON-lines journal owned by a single
//! load. The first line is a header identifying the dump; every later
//! line is an event:
//!
//! ```text
//! {"event":"header","version":1,"dump_id":"...","source":"https://.../p/[REDACTED]/...","started_at":"..."}
//! {"event":"applied","key":"world.json","owner":"world","bytes":61}
//! {"event":"applied","key":"world@city.json","owner":"world.city","bytes":140}
//! {"event":"applied","key":"world@city@0.jsonl.zst","owner":"world.city","bytes":5120}
//! {"event":"table-done","schema":"world","table":"city","rows":4079}
//! {"event":"schema-done","schema":"world"}
//! ```
//!
//! [`flush`] appends pending events and syncs the file before returning.
//! A crash mid-append leaves at most one partial last line, which is
//! ignored when the journal is read back and cut off by the next flush.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use diagnostics::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::Path;
use storage::StorageLocation;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

pub const PROGRESS_VERSION: u32 = 1;

/// Progress file name used for local dumps when none is given
pub const DEFAULT_PROGRESS_FILE: &str = "load-progress.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum Entry {
    Header {
        version: u32,
        dump_id: String,
        source: String,
        started_at: DateTime<Utc>,
    },
    Applied {
        key: String,
        owner: String,
        bytes: u64,
    },
    TableDone {
        schema: String,
        table: String,
        rows: u64,
    },
    SchemaDone {
        schema: String,
    },
}

/// Totals derived from the journal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub objects_applied: usize,
    pub tables_loaded: usize,
    pub schemas_loaded: usize,
    pub rows_loaded: u64,
    pub bytes_transferred: u64,
}

/// What a load has durably applied
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    dump_id: String,
    source: String,
    started_at: DateTime<Utc>,
    applied: BTreeSet<String>,
    tables_done: BTreeSet<(String, String)>,
    schemas_done: BTreeSet<String>,
    counts: ProgressCounts,
    /// Events recorded but not yet flushed
    pending: Vec<Entry>,
    /// Length of the journal prefix known to be valid on disk
    persisted_len: u64,
}

impl ProgressRecord {
    /// An empty record for loading `dump_id` from `source`
    ///
    /// Only the redacted form of `source` is kept.
    pub fn new(dump_id: &str, source: &StorageLocation) -> Self {
        let source = source.to_string();
        let started_at = Utc::now();
        Self {
            pending: vec![Entry::Header {
                version: PROGRESS_VERSION,
                dump_id: dump_id.to_string(),
                source: source.clone(),
                started_at,
            }],
            dump_id: dump_id.to_string(),
            source,
            started_at,
            applied: BTreeSet::new(),
            tables_done: BTreeSet::new(),
            schemas_done: BTreeSet::new(),
            counts: ProgressCounts::default(),
            persisted_len: 0,
        }
    }

    pub fn dump_id(&self) -> &str {
        &self.dump_id
    }

    /// Redacted description of the dump this record belongs to
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn counts(&self) -> &ProgressCounts {
        &self.counts
    }

    /// Mark `key` applied; returns false when it already was
    pub fn record_applied(&mut self, key: &str, owner: &str, bytes: u64) -> bool {
        let entry = Entry::Applied {
            key: key.to_string(),
            owner: owner.to_string(),
            bytes,
        };
        let added = self.apply(&entry);
        if added {
            self.pending.push(entry);
        }
        added
    }

    pub fn is_applied(&self, key: &str) -> bool {
        self.applied.contains(key)
    }

    pub fn record_table_done(&mut self, schema: &str, table: &str, rows: u64) -> bool {
        let entry = Entry::TableDone {
            schema: schema.to_string(),
            table: table.to_string(),
            rows,
        };
        let added = self.apply(&entry);
        if added {
            self.pending.push(entry);
        }
        added
    }

    pub fn is_table_done(&self, schema: &str, table: &str) -> bool {
        self.tables_done
            .contains(&(schema.to_string(), table.to_string()))
    }

    pub fn record_schema_done(&mut self, schema: &str) -> bool {
        let entry = Entry::SchemaDone {
            schema: schema.to_string(),
        };
        let added = self.apply(&entry);
        if added {
            self.pending.push(entry);
        }
        added
    }

    /// Events recorded since the last flush
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Fold one event into the in-memory state
    fn apply(&mut self, entry: &Entry) -> bool {
        match entry {
            Entry::Header { .. } => false,
            Entry::Applied { key, bytes, .. } => {
                let added = self.applied.insert(key.clone());
                if added {
                    self.counts.objects_applied += 1;
                    self.counts.bytes_transferred += bytes;
                }
                added
            }
            Entry::TableDone {
                schema,
                table,
                rows,
            } => {
                let added = self.tables_done.insert((schema.clone(), table.clone()));
                if added {
                    self.counts.tables_loaded += 1;
                    self.counts.rows_loaded += rows;
                }
                added
            }
            Entry::SchemaDone { schema } => {
                let added = self.schemas_done.insert(schema.clone());
                if added {
                    self.counts.schemas_loaded += 1;
                }
                added
            }
        }
    }
}

/// Read the journal at `path`; `None` when there is no file or it holds
/// no complete header
pub async fn load(path: &Path) -> Result<Option<ProgressRecord>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse(path, &data)
}

fn parse(path: &Path, data: &[u8]) -> Result<Option<ProgressRecord>> {
    let corrupt = |line: usize, reason: String| Error::CorruptProgress {
        path: path.display().to_string(),
        line,
        reason,
    };

    let mut record: Option<ProgressRecord> = None;
    let mut valid_len = 0usize;
    for (index, segment) in data.split_inclusive(|b| *b == b'\n').enumerate() {
        let line = index + 1;
        if !segment.ends_with(b"\n") {
            // Partial append from an interrupted flush
            let display = path.display().to_string();
            warn!("Ignoring incomplete last line {line} of progress file {display}", line, display);
            break;
        }
        valid_len += segment.len();
        let text = segment.trim_ascii();
        if text.is_empty() {
            continue;
        }
        let entry: Entry =
            serde_json::from_slice(text).map_err(|e| corrupt(line, e.to_string()))?;
        match entry {
            Entry::Header {
                version,
                dump_id,
                source,
                started_at,
            } => {
                if record.is_some() {
                    return Err(corrupt(line, "unexpected second header".to_string()));
                }
                if version > PROGRESS_VERSION {
                    return Err(corrupt(line, format!("unsupported version {version}")));
                }
                record = Some(ProgressRecord {
                    dump_id,
                    source,
                    started_at,
                    applied: BTreeSet::new(),
                    tables_done: BTreeSet::new(),
                    schemas_done: BTreeSet::new(),
                    counts: ProgressCounts::default(),
                    pending: Vec::new(),
                    persisted_len: 0,
                });
            }
            event => match record.as_mut() {
                Some(record) => {
                    record.apply(&event);
                }
                None => return Err(corrupt(line, "expected a header".to_string())),
            },
        }
    }

    Ok(record.map(|mut record| {
        record.persisted_len = valid_len as u64;
        record
    }))
}

/// Durably append the pending events of `progress` to the journal at `path`
///
/// Anything on disk past the valid prefix the record knows about is cut
/// first: a partial line after a crash, or a stale journal being reset.
pub async fn flush(progress: &mut ProgressRecord, path: &Path) -> Result<()> {
    if !progress.has_pending() && progress.persisted_len > 0 {
        return Ok(());
    }
    let mut buffer = Vec::new();
    for entry in &progress.pending {
        serde_json::to_writer(&mut buffer, entry)?;
        buffer.push(b'\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    if file.metadata().await?.len() != progress.persisted_len {
        file.set_len(progress.persisted_len).await?;
    }
    file.seek(SeekFrom::Start(progress.persisted_len)).await?;
    file.write_all(&buffer).await?;
    file.flush().await?;
    file.sync_data().await?;

    progress.persisted_len += buffer.len() as u64;
    progress.pending.clear();
    Ok(())
}
