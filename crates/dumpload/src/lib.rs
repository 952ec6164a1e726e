// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump and load MySQL schemas through object storage
//!
//! A dump is a directory of objects: `@.json` describes the schemas, one
//! `<schema>.json` and `<schema>@<table>.json` per schema and table, row
//! chunks as `<schema>@<table>@<n>.jsonl.zst`, and finally `@.done.json`,
//! which marks the dump complete. Loads read the same layout back through
//! a local directory or a PAR URL and keep a progress journal so an
//! interrupted load can resume without re-applying anything.

pub mod dump;
pub mod error;
pub mod grant;
pub mod load;
pub mod manifest;
pub mod memory;
pub mod options;
pub mod progress;
pub mod sql;

pub use dump::{DumpProducer, DumpSummary, dump_instance, dump_schemas};
pub use error::{Error, ErrorClass, Operation, OperationError, Result, SqlError};
pub use grant::{AccessGrant, Permissions};
pub use load::{LoadConsumer, LoadState, LoadSummary, load_dump, load_dump_with_grant};
pub use manifest::{Compression, DumpManifest};
pub use memory::{Catalog, MemoryDatabase, TableData};
pub use options::{DumpOptions, LoadOptions, ResumeMode};
pub use progress::{ProgressCounts, ProgressRecord};
pub use sql::{Row, SqlExecutor, SqlSource};
