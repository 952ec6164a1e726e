// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Load command - applies a dump to a SQL script or a catalog file
//!
//! Example:
//!   dumpload load /backups/world --sql-out world.sql
//!   dumpload load 'https://.../p/<token>/n/ns/b/bucket/o/nightly/' \
//!       --progress-file nightly-progress.json --catalog-out restored.json

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Args;
use diagnostics::*;
use dumpload::{
    AccessGrant, LoadConsumer, LoadSummary, MemoryDatabase, Operation, OperationError,
    SqlExecutor,
};
use storage::{AccessType, OpenMode, open_accessor};

use super::cancel_on_interrupt;
use crate::common::{OptionArgs, parse_location, read_catalog, write_catalog};
use crate::sql_script::SqlScriptWriter;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Local directory or PAR URL holding the dump
    pub location: String,

    /// Local progress journal; an empty value disables progress tracking
    #[arg(long)]
    pub progress_file: Option<String>,

    /// Discard recorded progress and load everything again
    #[arg(long)]
    pub reset_progress: bool,

    /// auto, required or reset
    #[arg(long)]
    pub resume: Option<String>,

    /// Tables loaded concurrently
    #[arg(long)]
    pub threads: Option<usize>,

    /// Validate the dump without applying anything
    #[arg(long)]
    pub dry_run: bool,

    /// Append SQL statements to this script
    #[arg(long, conflicts_with = "catalog_out")]
    pub sql_out: Option<PathBuf>,

    /// Load into a JSON catalog file, extending it if it exists
    #[arg(long)]
    pub catalog_out: Option<PathBuf>,

    /// Declared PAR access type (AnyObjectRead, AnyObjectWrite, AnyObjectReadWrite)
    #[arg(long)]
    pub access: Option<String>,

    /// The PAR does not permit listing objects
    #[arg(long, requires = "access")]
    pub no_list: bool,

    /// PAR expiry time (RFC 3339)
    #[arg(long, requires = "access")]
    pub expires: Option<String>,

    #[command(flatten)]
    pub options: OptionArgs,
}

impl LoadArgs {
    fn grant(&self, location: &storage::StorageLocation) -> Result<AccessGrant> {
        let Some(access) = &self.access else {
            return Ok(AccessGrant::for_location(location));
        };
        let access: AccessType = access.parse()?;
        let mut grant = AccessGrant::declared(location, access, !self.no_list);
        if let Some(expires) = &self.expires {
            let expires_at = DateTime::parse_from_rfc3339(expires)
                .map_err(|e| anyhow!("Invalid --expires value '{expires}': {e}"))?
                .with_timezone(&Utc);
            grant = grant.with_expiry(expires_at);
        }
        Ok(grant)
    }
}

#[allow(clippy::print_stdout)]
pub async fn load_command(args: &LoadArgs) -> Result<LoadSummary> {
    let mut options = args.options.load_options()?;
    if let Some(progress_file) = &args.progress_file {
        options.set("progressFile", progress_file)?;
    }
    if args.reset_progress {
        options.set("resetProgress", "true")?;
    }
    if let Some(resume) = &args.resume {
        options.set("resume", resume)?;
    }
    if let Some(threads) = args.threads {
        options.threads = threads.max(1);
    }
    if args.dry_run {
        options.dry_run = true;
    }

    let location = parse_location(&args.location)?;
    let grant = args.grant(&location)?;
    let wrap = |error: dumpload::Error| OperationError::new(Operation::LoadDump, error);

    let memory = match (&args.sql_out, &args.catalog_out) {
        (None, Some(path)) if path.exists() => {
            Some(Arc::new(MemoryDatabase::from_catalog(read_catalog(path)?)))
        }
        (None, _) => Some(Arc::new(MemoryDatabase::new())),
        (Some(_), _) => None,
    };
    let target: Arc<dyn SqlExecutor> = match (&args.sql_out, &memory) {
        (Some(path), _) => Arc::new(
            SqlScriptWriter::open(path)
                .await
                .with_context(|| format!("Failed to open SQL script {}", path.display()))?,
        ),
        (None, Some(memory)) => memory.clone(),
        (None, None) => return Err(anyhow!("No load target")),
    };

    let accessor = open_accessor(&location, &options.storage, OpenMode::Read)
        .map_err(|e| wrap(e.into()))?;
    let mut consumer = LoadConsumer::new(accessor, location, target, options).with_grant(grant);
    cancel_on_interrupt(consumer.cancellation_token());

    let result = consumer.load().await;

    // The catalog reflects whatever was applied, so a resumed load can extend it
    if let (Some(memory), Some(path)) = (&memory, &args.catalog_out) {
        write_catalog(path, &memory.snapshot().await)?;
    }

    let summary = result.map_err(wrap)?;
    println!("{summary}");
    if summary.skipped_objects > 0 {
        let skipped = summary.skipped_objects;
        info!("Skipped {skipped} objects applied by a previous load", skipped);
    }
    Ok(summary)
}
