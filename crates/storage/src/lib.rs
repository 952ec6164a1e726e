// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object storage access for dumps: local directories and
//! pre-authenticated request (PAR) URLs behind one [`ObjectAccessor`]
//! capability.

pub mod accessor;
pub mod config;
pub mod error;
pub mod location;
pub mod par;
pub mod retry;
pub mod secret;
pub mod store;

#[cfg(feature = "mock-server")]
pub mod testing;

pub use accessor::{ObjectAccessor, ObjectEntry, OpenMode, open_accessor};
pub use config::{AccessorConfig, LIST_PAGE_SIZE_MAX};
pub use error::StorageError;
pub use location::{AccessType, GrantScope, ParUrl, StorageLocation, looks_remote};
pub use par::{ListPager, ParAccessor};
pub use retry::RetryPolicy;
pub use secret::{REDACTED, Secret};
pub use store::StoreAccessor;

pub type Result<T> = std::result::Result<T, StorageError>;
