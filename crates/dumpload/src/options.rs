// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump and load options
//!
//! Options come from defaults, an optional YAML file, then individual
//! `name=value` overrides. Each option answers to several spellings,
//! resolved through [`OPTION_ALIASES`].

use crate::manifest::Compression;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use storage::AccessorConfig;

/// What a load does with an existing progress file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Resume when the file exists, otherwise start fresh
    #[default]
    Auto,
    /// Fail when the file does not exist
    Required,
    /// Discard existing progress and start over
    Reset,
}

impl std::str::FromStr for ResumeMode {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "auto" => Ok(ResumeMode::Auto),
            "required" => Ok(ResumeMode::Required),
            "reset" => Ok(ResumeMode::Reset),
            other => Err(Error::Configuration(format!(
                "Invalid resume mode '{other}', expected auto, required or reset"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadOptions {
    /// Absent: default location; empty: no progress file; else a local path
    pub progress_file: Option<String>,
    pub resume: ResumeMode,
    /// Tables loaded concurrently
    pub threads: usize,
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    /// `schema.table` names
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub dry_run: bool,
    pub storage: AccessorConfig,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            progress_file: None,
            resume: ResumeMode::Auto,
            threads: 4,
            include_schemas: Vec::new(),
            exclude_schemas: Vec::new(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            dry_run: false,
            storage: AccessorConfig::default(),
        }
    }
}

impl LoadOptions {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| Error::Configuration(format!("Invalid load options: {e}")))
    }

    pub fn includes_schema(&self, schema: &str) -> bool {
        (self.include_schemas.is_empty() || self.include_schemas.iter().any(|s| s == schema))
            && !self.exclude_schemas.iter().any(|s| s == schema)
    }

    pub fn includes_table(&self, schema: &str, table: &str) -> bool {
        let name = format!("{schema}.{table}");
        self.includes_schema(schema)
            && (self.include_tables.is_empty() || self.include_tables.contains(&name))
            && !self.exclude_tables.contains(&name)
    }

    /// Apply one `name=value` override
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match resolve_option(name)? {
            OptionName::ProgressFile => self.progress_file = Some(value.to_string()),
            OptionName::ResetProgress => {
                self.resume = if parse_bool(name, value)? {
                    ResumeMode::Reset
                } else {
                    ResumeMode::Auto
                };
            }
            OptionName::Resume => self.resume = value.parse()?,
            OptionName::Threads => self.threads = parse_count(name, value)?,
            OptionName::IncludeSchemas => self.include_schemas = parse_list(value),
            OptionName::ExcludeSchemas => self.exclude_schemas = parse_list(value),
            OptionName::IncludeTables => self.include_tables = parse_list(value),
            OptionName::ExcludeTables => self.exclude_tables = parse_list(value),
            OptionName::DryRun => self.dry_run = parse_bool(name, value)?,
            other => {
                return Err(Error::Configuration(format!(
                    "Option '{name}' ({other:?}) does not apply to a load"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DumpOptions {
    /// Tables dumped concurrently
    pub threads: usize,
    /// A data chunk is cut once its uncompressed size reaches this
    pub bytes_per_chunk: usize,
    /// Rows requested from the source at a time
    pub rows_per_fetch: usize,
    pub compression: Compression,
    /// `schema.table` names left out of the dump
    pub exclude_tables: Vec<String>,
    pub dry_run: bool,
    pub storage: AccessorConfig,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            bytes_per_chunk: 64 * 1024 * 1024,
            rows_per_fetch: 1000,
            compression: Compression::Zstd,
            exclude_tables: Vec::new(),
            dry_run: false,
            storage: AccessorConfig::default(),
        }
    }
}

impl DumpOptions {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| Error::Configuration(format!("Invalid dump options: {e}")))
    }

    pub fn includes_table(&self, schema: &str, table: &str) -> bool {
        !self.exclude_tables.contains(&format!("{schema}.{table}"))
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match resolve_option(name)? {
            OptionName::Threads => self.threads = parse_count(name, value)?,
            OptionName::BytesPerChunk => self.bytes_per_chunk = parse_size(name, value)?,
            OptionName::RowsPerFetch => self.rows_per_fetch = parse_count(name, value)?,
            OptionName::Compression => self.compression = value.parse()?,
            OptionName::ExcludeTables => self.exclude_tables = parse_list(value),
            OptionName::DryRun => self.dry_run = parse_bool(name, value)?,
            other => {
                return Err(Error::Configuration(format!(
                    "Option '{name}' ({other:?}) does not apply to a dump"
                )));
            }
        }
        Ok(())
    }
}

/// Canonical option names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionName {
    ProgressFile,
    ResetProgress,
    Resume,
    Threads,
    IncludeSchemas,
    ExcludeSchemas,
    IncludeTables,
    ExcludeTables,
    DryRun,
    BytesPerChunk,
    RowsPerFetch,
    Compression,
}

/// Every accepted spelling of every option
pub const OPTION_ALIASES: &[(&str, OptionName)] = &[
    ("progressFile", OptionName::ProgressFile),
    ("progress-file", OptionName::ProgressFile),
    ("progress_file", OptionName::ProgressFile),
    ("resetProgress", OptionName::ResetProgress),
    ("reset-progress", OptionName::ResetProgress),
    ("reset_progress", OptionName::ResetProgress),
    ("resume", OptionName::Resume),
    ("threads", OptionName::Threads),
    ("includeSchemas", OptionName::IncludeSchemas),
    ("include-schemas", OptionName::IncludeSchemas),
    ("include_schemas", OptionName::IncludeSchemas),
    ("excludeSchemas", OptionName::ExcludeSchemas),
    ("exclude-schemas", OptionName::ExcludeSchemas),
    ("exclude_schemas", OptionName::ExcludeSchemas),
    ("includeTables", OptionName::IncludeTables),
    ("include-tables", OptionName::IncludeTables),
    ("include_tables", OptionName::IncludeTables),
    ("excludeTables", OptionName::ExcludeTables),
    ("exclude-tables", OptionName::ExcludeTables),
    ("exclude_tables", OptionName::ExcludeTables),
    ("dryRun", OptionName::DryRun),
    ("dry-run", OptionName::DryRun),
    ("dry_run", OptionName::DryRun),
    ("bytesPerChunk", OptionName::BytesPerChunk),
    ("bytes-per-chunk", OptionName::BytesPerChunk),
    ("bytes_per_chunk", OptionName::BytesPerChunk),
    ("rowsPerFetch", OptionName::RowsPerFetch),
    ("rows-per-fetch", OptionName::RowsPerFetch),
    ("rows_per_fetch", OptionName::RowsPerFetch),
    ("compression", OptionName::Compression),
];

pub fn canonical_option(name: &str) -> Option<OptionName> {
    OPTION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, option)| *option)
}

fn resolve_option(name: &str) -> Result<OptionName> {
    canonical_option(name).ok_or_else(|| Error::Configuration(format!("Invalid option: {name}")))
}

/// Split `name=value`
pub fn parse_assignment(text: &str) -> Result<(&str, &str)> {
    text.split_once('=')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| Error::Configuration(format!("Expected name=value, got '{text}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "Option '{name}' expects a boolean, got '{value}'"
        ))),
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(Error::Configuration(format!(
            "Option '{name}' expects a positive integer, got '{value}'"
        ))),
    }
}

/// Byte sizes with an optional `k`, `M` or `G` suffix
fn parse_size(name: &str, value: &str) -> Result<usize> {
    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, 'k' | 'K')) => (&value[..idx], 1024),
        Some((idx, 'm' | 'M')) => (&value[..idx], 1024 * 1024),
        Some((idx, 'g' | 'G')) => (&value[..idx], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    parse_count(name, digits)?
        .checked_mul(multiplier)
        .ok_or_else(|| {
            Error::Configuration(format!("Option '{name}' size '{value}' is too large"))
        })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
