// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Inspect command - describes a dump without loading it

use anyhow::Result;
use clap::Args;
use dumpload::manifest;
use storage::{AccessorConfig, OpenMode, open_accessor};

use crate::common::{format_size, parse_location};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Local directory or PAR URL holding the dump
    pub location: String,
}

/// Render the manifest of the dump at `location`
pub async fn describe_dump(location: &str) -> Result<String> {
    let location = parse_location(location)?;
    let accessor = open_accessor(&location, &AccessorConfig::default(), OpenMode::Read)?;
    let dump = manifest::read_unchecked(accessor.as_ref()).await?;

    let mut out = String::new();
    out.push_str(&format!("Dump {} at {}\n", dump.dump_id, dump.root));
    out.push_str(&format!(
        "Created {}, format version {}, compression {:?}\n",
        dump.created_at.to_rfc3339(),
        dump.version,
        dump.compression
    ));
    out.push_str(if dump.complete {
        "Status: complete\n"
    } else {
        "Status: INCOMPLETE (no completion marker)\n"
    });
    for schema in &dump.schemas {
        out.push_str(&format!("{} ({} tables)\n", schema.name, schema.tables.len()));
        for table in &schema.tables {
            match dump.table_inventory(&schema.name, table) {
                Some(inventory) => out.push_str(&format!(
                    "  {:<32} {:>6} chunks {:>10} rows {:>10}\n",
                    table,
                    inventory.chunks,
                    inventory.rows,
                    format_size(inventory.bytes)
                )),
                None => out.push_str(&format!("  {table}\n")),
            }
        }
    }
    Ok(out)
}

#[allow(clippy::print_stdout)]
pub async fn inspect_command(args: &InspectArgs) -> Result<()> {
    print!("{}", describe_dump(&args.location).await?);
    Ok(())
}
