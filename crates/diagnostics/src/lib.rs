// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging for the dump/load workspace
//!
//! Every crate logs through the macros re-exported here so that one
//! environment variable controls the whole process:
//!
//! - `DUMPLOAD_LOG=off` (default) - no logs
//! - `DUMPLOAD_LOG=error` / `warn` - failures only
//! - `DUMPLOAD_LOG=info` - one line per dump/load phase
//! - `DUMPLOAD_LOG=debug` - one line per storage object
//!
//! Never log a raw storage location: format the `StorageLocation`, whose
//! `Display` redacts pre-authenticated request tokens.

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

static INIT: Once = Once::new();

/// Environment variable that selects the log level
pub const LOG_ENV: &str = "DUMPLOAD_LOG";

/// Parse a level name. `None` means logging is disabled.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "error" => Ok(Some(emit::Level::Error)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "info" => Ok(Some(emit::Level::Info)),
        "debug" => Ok(Some(emit::Level::Debug)),
        other => Err(format!("unknown log level '{other}'")),
    }
}

/// Initialize diagnostics from `DUMPLOAD_LOG`
///
/// Safe to call more than once; only the first call installs an emitter.
pub fn init_diagnostics() {
    let configured = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
    init_with_level(&configured);
}

/// Initialize diagnostics with an explicit level name, e.g. from a `--log` flag
pub fn init_with_level(level: &str) {
    INIT.call_once(|| {
        let min = match parse_level(level) {
            Ok(None) => return,
            Ok(Some(min)) => min,
            Err(msg) => {
                // Bootstrap warning, the emitter is not installed yet
                eprintln!("Warning: {msg}, using 'info'");
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min))
            .init();

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

/// Per-object detail: keys fetched, chunks cut, pages listed
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Phase-level progress: dump started, manifest read, load summary
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Recoverable conditions: retries, truncated progress journal tails
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures that end an operation
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
