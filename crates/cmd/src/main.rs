// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cmd::commands::{
    DumpArgs, InspectArgs, LoadArgs, dump_command, inspect_command, load_command,
};
use diagnostics::*;
use dumpload::{ErrorClass, OperationError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "dumpload")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (off, error, warn, info, debug); overrides DUMPLOAD_LOG
    #[arg(long, global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump schemas from a JSON catalog to a directory or PAR URL
    Dump(DumpArgs),
    /// Load a dump, resuming from the progress file when one exists
    Load(LoadArgs),
    /// Describe a dump without loading it
    Inspect(InspectArgs),
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Dump(args) => dump_command(&args).await.map(|_| ()),
        Commands::Load(args) => load_command(&args).await.map(|_| ()),
        Commands::Inspect(args) => inspect_command(&args).await,
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OperationError>().map(OperationError::class) {
        Some(ErrorClass::Configuration) => 2,
        Some(ErrorClass::Authorization) => 3,
        Some(ErrorClass::NotFound) => 4,
        Some(ErrorClass::Transient) => 5,
        Some(ErrorClass::Cancelled) => 130,
        Some(ErrorClass::Fatal) | None => 1,
    }
}

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match &cli.log {
        Some(level) => diagnostics::init_with_level(level),
        None => diagnostics::init_diagnostics(),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = format!("{err:#}");
            debug!("Command failed: {message}", message);
            eprintln!("Error: {message}");
            ExitCode::from(exit_code(&err))
        }
    }
}
