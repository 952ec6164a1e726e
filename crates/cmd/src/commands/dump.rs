// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump command - writes a catalog file's schemas to a dump location
//!
//! Example:
//!   dumpload dump --catalog world.json --output /backups/world world
//!   dumpload dump --catalog world.json --output 'https://.../p/<token>/n/ns/b/bucket/o/'

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use diagnostics::*;
use dumpload::{DumpProducer, DumpSummary, MemoryDatabase, Operation, OperationError};
use storage::{OpenMode, open_accessor};

use super::cancel_on_interrupt;
use crate::common::{OptionArgs, format_size, parse_location, read_catalog};

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// JSON catalog (schema -> table -> {ddl, rows}) to dump
    #[arg(long)]
    pub catalog: PathBuf,

    /// Local directory or PAR URL receiving the dump
    #[arg(long)]
    pub output: String,

    /// Schemas to dump; all schemas when omitted
    pub schemas: Vec<String>,

    /// Enumerate what would be dumped without writing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub options: OptionArgs,
}

#[allow(clippy::print_stdout)]
pub async fn dump_command(args: &DumpArgs) -> Result<DumpSummary> {
    let mut options = args.options.dump_options()?;
    if args.dry_run {
        options.dry_run = true;
    }
    let location = parse_location(&args.output)?;
    let source = Arc::new(MemoryDatabase::from_catalog(read_catalog(&args.catalog)?));

    let operation = if args.schemas.is_empty() {
        Operation::DumpInstance
    } else {
        Operation::DumpSchemas
    };
    let wrap = |error: dumpload::Error| OperationError::new(operation, error);

    let accessor = open_accessor(&location, &options.storage, OpenMode::Write)
        .map_err(|e| wrap(e.into()))?;
    let producer = DumpProducer::new(source, accessor, location.clone(), options);
    cancel_on_interrupt(producer.cancellation_token());

    let target = location.to_string();
    info!("Dumping to {target}", target);
    let summary = producer.dump(&args.schemas).await.map_err(wrap)?;

    println!("{summary}");
    if !summary.dry_run {
        println!("Dump {} ({})", summary.dump_id, format_size(summary.bytes));
    }
    Ok(summary)
}
