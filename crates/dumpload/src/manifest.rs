// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump layout: which objects a dump consists of and what they contain
//!
//! Every object lives directly under the dump root:
//!
//! | key | content |
//! |---|---|
//! | `@.json` | [`ManifestFile`]: dump identity and topology |
//! | `<schema>.json` | [`SchemaMetadata`] |
//! | `<schema>@<table>.json` | [`TableMetadata`]: the table DDL |
//! | `<schema>@<table>@<n>.jsonl[.zst]` | data chunk `n`, one JSON array per row |
//! | `@.done.json` | [`CompletionMarker`], written last |
//!
//! Names are escaped with [`escape_name`] so that `@` and `.` only ever
//! appear as separators.

use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use diagnostics::*;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use storage::ObjectAccessor;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_KEY: &str = "@.json";
pub const MARKER_KEY: &str = "@.done.json";

/// Escape a schema or table name for use in an object key
///
/// `[A-Za-z0-9_-]` are kept, every other byte becomes `=XX`.
pub fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("={byte:02X}"));
        }
    }
    escaped
}

pub fn unescape_name(text: &str) -> Option<String> {
    let raw = text.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'=' {
            let hex = text.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    None,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Zstd => ".jsonl.zst",
            Compression::None => ".jsonl",
        }
    }

    pub fn encode(self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Compression::Zstd => Ok(zstd::encode_all(&data[..], 3)?),
            Compression::None => Ok(data),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Zstd => Ok(zstd::decode_all(data)?),
            Compression::None => Ok(data.to_vec()),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "zstd" => Ok(Compression::Zstd),
            "none" => Ok(Compression::None),
            other => Err(Error::Configuration(format!(
                "Unsupported compression '{other}', expected 'zstd' or 'none'"
            ))),
        }
    }
}

pub fn schema_key(schema: &str) -> String {
    format!("{}.json", escape_name(schema))
}

pub fn table_key(schema: &str, table: &str) -> String {
    format!("{}@{}.json", escape_name(schema), escape_name(table))
}

pub fn chunk_key(schema: &str, table: &str, index: usize, compression: Compression) -> String {
    format!(
        "{}@{}@{}{}",
        escape_name(schema),
        escape_name(table),
        index,
        compression.extension()
    )
}

/// What an object key denotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRole {
    Manifest,
    Marker,
    Schema { schema: String },
    Table { schema: String, table: String },
    Chunk {
        schema: String,
        table: String,
        index: usize,
    },
    /// Not part of the dump layout
    Other,
}

pub fn parse_key(key: &str) -> KeyRole {
    match key {
        MANIFEST_KEY => return KeyRole::Manifest,
        MARKER_KEY => return KeyRole::Marker,
        _ => {}
    }
    let chunk = key
        .strip_suffix(Compression::Zstd.extension())
        .or_else(|| key.strip_suffix(Compression::None.extension()));
    if let Some(stem) = chunk {
        let parts: Vec<&str> = stem.split('@').collect();
        if let [schema, table, index] = parts[..] {
            if let (Some(schema), Some(table), Ok(index)) = (
                unescape_name(schema),
                unescape_name(table),
                index.parse::<usize>(),
            ) {
                return KeyRole::Chunk {
                    schema,
                    table,
                    index,
                };
            }
        }
        return KeyRole::Other;
    }
    let Some(stem) = key.strip_suffix(".json") else {
        return KeyRole::Other;
    };
    let names: Option<Vec<String>> = stem.split('@').map(unescape_name).collect();
    match names.as_deref() {
        Some([schema]) if !schema.is_empty() => KeyRole::Schema {
            schema: schema.clone(),
        },
        Some([schema, table]) if !schema.is_empty() && !table.is_empty() => KeyRole::Table {
            schema: schema.clone(),
            table: table.clone(),
        },
        _ => KeyRole::Other,
    }
}

/// Logical owner of a stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Owner {
    Metadata,
    Schema(String),
    Table { schema: String, table: String },
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Metadata => f.write_str("metadata"),
            Owner::Schema(schema) => f.write_str(schema),
            Owner::Table { schema, table } => write!(f, "{schema}.{table}"),
        }
    }
}

/// One stored object of a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObject {
    pub key: String,
    pub size: u64,
    pub owner: Owner,
    /// Chunk index within a table; `None` for metadata objects
    pub sequence: Option<usize>,
}

impl DataObject {
    /// Classify a listed object, `None` when it is not part of a dump
    pub fn from_listing(key: &str, size: u64) -> Option<Self> {
        let (owner, sequence) = match parse_key(key) {
            KeyRole::Manifest | KeyRole::Marker => (Owner::Metadata, None),
            KeyRole::Schema { schema } => (Owner::Schema(schema), None),
            KeyRole::Table { schema, table } => (Owner::Table { schema, table }, None),
            KeyRole::Chunk {
                schema,
                table,
                index,
            } => (Owner::Table { schema, table }, Some(index)),
            KeyRole::Other => return None,
        };
        Some(Self {
            key: key.to_string(),
            size,
            owner,
            sequence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub name: String,
    pub tables: Vec<String>,
}

/// `@.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub version: u32,
    pub dump_id: String,
    pub created_at: DateTime<Utc>,
    pub compression: Compression,
    pub schemas: Vec<SchemaEntry>,
}

/// `<schema>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub schema: String,
    pub tables: Vec<String>,
}

/// `<schema>@<table>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub schema: String,
    pub table: String,
    pub ddl: String,
    pub compression: Compression,
}

/// What the dump wrote for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInventory {
    pub schema: String,
    pub table: String,
    pub chunks: usize,
    pub rows: u64,
    pub bytes: u64,
}

/// `@.done.json`, present only once every other object is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub dump_id: String,
    pub completed_at: DateTime<Utc>,
    pub tables: Vec<TableInventory>,
}

/// In-memory view of a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpManifest {
    /// Redacted description of the dump root
    pub root: String,
    pub version: u32,
    pub dump_id: String,
    pub created_at: DateTime<Utc>,
    pub compression: Compression,
    pub schemas: Vec<SchemaEntry>,
    /// True only when the completion marker exists
    pub complete: bool,
    /// From the completion marker, keyed by (schema, table)
    pub inventory: BTreeMap<(String, String), TableInventory>,
}

impl DumpManifest {
    /// A fresh manifest for a dump about to be written
    pub fn new(root: String, compression: Compression, schemas: Vec<SchemaEntry>) -> Self {
        Self {
            root,
            version: FORMAT_VERSION,
            dump_id: uuid7::uuid7().to_string(),
            created_at: Utc::now(),
            compression,
            schemas,
            complete: false,
            inventory: BTreeMap::new(),
        }
    }

    pub fn schema_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|s| s.name.as_str())
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    pub fn table_inventory(&self, schema: &str, table: &str) -> Option<&TableInventory> {
        self.inventory.get(&(schema.to_string(), table.to_string()))
    }

    /// Every object the completion marker promises for one table
    pub fn table_objects(&self, schema: &str, table: &str) -> Vec<String> {
        let chunks = self
            .table_inventory(schema, table)
            .map_or(0, |inventory| inventory.chunks);
        std::iter::once(table_key(schema, table))
            .chain((0..chunks).map(|n| chunk_key(schema, table, n, self.compression)))
            .collect()
    }

    fn file(&self) -> ManifestFile {
        ManifestFile {
            version: self.version,
            dump_id: self.dump_id.clone(),
            created_at: self.created_at,
            compression: self.compression,
            schemas: self.schemas.clone(),
        }
    }
}

pub(crate) fn to_json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec_pretty(value)?))
}

pub(crate) fn from_json_bytes<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::invalid_object(key, e.to_string()))
}

/// Write the topology: `@.json` then one metadata object per schema
///
/// Called before any table object is written.
pub async fn write(manifest: &DumpManifest, accessor: &dyn ObjectAccessor) -> Result<()> {
    accessor
        .put(MANIFEST_KEY, to_json_bytes(&manifest.file())?)
        .await?;
    for schema in &manifest.schemas {
        let metadata = SchemaMetadata {
            schema: schema.name.clone(),
            tables: schema.tables.clone(),
        };
        accessor
            .put(&schema_key(&schema.name), to_json_bytes(&metadata)?)
            .await?;
    }
    Ok(())
}

/// Write the completion marker; the caller has confirmed every other write
pub async fn write_marker(marker: &CompletionMarker, accessor: &dyn ObjectAccessor) -> Result<()> {
    accessor.put(MARKER_KEY, to_json_bytes(marker)?).await?;
    Ok(())
}

/// Read a dump, rejecting one whose completion marker is missing
pub async fn read(accessor: &dyn ObjectAccessor) -> Result<DumpManifest> {
    let manifest = read_unchecked(accessor).await?;
    if !manifest.complete {
        return Err(Error::IncompleteDump {
            location: manifest.root,
        });
    }
    Ok(manifest)
}

/// Read a dump whether or not it is complete
pub async fn read_unchecked(accessor: &dyn ObjectAccessor) -> Result<DumpManifest> {
    let root = accessor.describe();
    let data = match accessor.get(MANIFEST_KEY).await {
        Ok(data) => data,
        Err(err) if err.is_not_found() => {
            debug!("No dump manifest under {root}", root);
            return Err(Error::DumpNotFound { location: root });
        }
        Err(err) => return Err(err.into()),
    };
    let file: ManifestFile = from_json_bytes(MANIFEST_KEY, &data)?;
    if file.version > FORMAT_VERSION {
        return Err(Error::invalid_object(
            MANIFEST_KEY,
            format!("unsupported dump format version {}", file.version),
        ));
    }

    let mut manifest = DumpManifest {
        root,
        version: file.version,
        dump_id: file.dump_id,
        created_at: file.created_at,
        compression: file.compression,
        schemas: file.schemas,
        complete: false,
        inventory: BTreeMap::new(),
    };

    match accessor.get(MARKER_KEY).await {
        Ok(data) => {
            let marker: CompletionMarker = from_json_bytes(MARKER_KEY, &data)?;
            if marker.dump_id != manifest.dump_id {
                return Err(Error::invalid_object(
                    MARKER_KEY,
                    format!(
                        "completion marker belongs to dump {}, manifest to {}",
                        marker.dump_id, manifest.dump_id
                    ),
                ));
            }
            manifest.inventory = marker
                .tables
                .into_iter()
                .map(|t| ((t.schema.clone(), t.table.clone()), t))
                .collect();
            manifest.complete = true;
        }
        Err(err) if err.is_not_found() => {
            let root = manifest.root.as_str();
            debug!("Dump under {root} has no completion marker", root);
        }
        Err(err) => return Err(err.into()),
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::StoreAccessor;

    #[test]
    fn test_escaping() {
        assert_eq!(escape_name("sakila"), "sakila");
        assert_eq!(escape_name("my db.v2"), "my=20db=2Ev2");
        assert_eq!(escape_name("a@b"), "a=40b");
        assert_eq!(unescape_name("my=20db=2Ev2").as_deref(), Some("my db.v2"));
        assert_eq!(unescape_name("caf=C3=A9").as_deref(), Some("café"));
        assert_eq!(unescape_name("bad=4"), None);
    }

    #[test]
    fn test_parse_key_roles() {
        assert_eq!(parse_key("@.json"), KeyRole::Manifest);
        assert_eq!(parse_key("@.done.json"), KeyRole::Marker);
        assert_eq!(
            parse_key("world.json"),
            KeyRole::Schema {
                schema: "world".to_string()
            }
        );
        assert_eq!(
            parse_key("world@city.json"),
            KeyRole::Table {
                schema: "world".to_string(),
                table: "city".to_string()
            }
        );
        assert_eq!(
            parse_key(&chunk_key("my db", "t.1", 12, Compression::Zstd)),
            KeyRole::Chunk {
                schema: "my db".to_string(),
                table: "t.1".to_string(),
                index: 12
            }
        );
        assert_eq!(
            parse_key("world@city@0.jsonl"),
            KeyRole::Chunk {
                schema: "world".to_string(),
                table: "city".to_string(),
                index: 0
            }
        );
        assert_eq!(parse_key("load-progress.json.tmp"), KeyRole::Other);
        assert_eq!(parse_key("a@b@c@d.json"), KeyRole::Other);
    }

    #[test]
    fn test_data_object_owner() {
        let chunk = DataObject::from_listing("world@city@3.jsonl.zst", 10).expect("chunk");
        assert_eq!(chunk.owner.to_string(), "world.city");
        assert_eq!(chunk.sequence, Some(3));
        let meta = DataObject::from_listing("@.json", 1).expect("manifest");
        assert_eq!(meta.owner, Owner::Metadata);
        assert!(DataObject::from_listing("README", 1).is_none());
    }

    #[test]
    fn test_compression_round_trip() {
        let rows = b"[1,\"a\"]\n[2,\"b\"]\n".to_vec();
        let packed = Compression::Zstd.encode(rows.clone()).expect("encode");
        assert_ne!(packed, rows);
        assert_eq!(Compression::Zstd.decode(&packed).expect("decode"), rows);
    }

    #[tokio::test]
    async fn test_missing_marker_is_incomplete() {
        let accessor = StoreAccessor::in_memory();
        let manifest = DumpManifest::new(
            accessor.describe(),
            Compression::None,
            vec![SchemaEntry {
                name: "world".to_string(),
                tables: vec!["city".to_string()],
            }],
        );
        write(&manifest, &accessor).await.expect("write");

        let unchecked = read_unchecked(&accessor).await.expect("read");
        assert!(!unchecked.complete);
        assert_eq!(unchecked.dump_id, manifest.dump_id);
        assert!(matches!(
            read(&accessor).await.expect_err("incomplete"),
            Error::IncompleteDump { .. }
        ));

        write_marker(
            &CompletionMarker {
                dump_id: manifest.dump_id.clone(),
                completed_at: Utc::now(),
                tables: vec![TableInventory {
                    schema: "world".to_string(),
                    table: "city".to_string(),
                    chunks: 2,
                    rows: 7,
                    bytes: 64,
                }],
            },
            &accessor,
        )
        .await
        .expect("marker");
        let complete = read(&accessor).await.expect("complete");
        assert!(complete.complete);
        assert_eq!(
            complete.table_objects("world", "city"),
            vec!["world@city.json", "world@city@0.jsonl", "world@city@1.jsonl"]
        );
    }

    #[tokio::test]
    async fn test_absent_manifest_is_not_found() {
        let accessor = StoreAccessor::in_memory();
        let err = read(&accessor).await.expect_err("absent");
        assert!(matches!(err, Error::DumpNotFound { .. }));
        assert!(err.to_string().starts_with("Not Found"));
    }
}
