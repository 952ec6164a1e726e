// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The object-storage capability consumed by dump and load

use crate::config::AccessorConfig;
use crate::location::StorageLocation;
use crate::par::ParAccessor;
use crate::store::StoreAccessor;
use crate::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use futures::stream::BoxStream;
use std::sync::Arc;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Key relative to the accessor root
    pub key: String,
    pub size: u64,
}

/// Uniform object access scoped to one root location
///
/// Keys are relative to the root the accessor was opened on. An accessor
/// carries its authorization for its whole life and is used by a single
/// dump or load.
#[async_trait]
pub trait ObjectAccessor: Send + Sync + std::fmt::Debug {
    /// Redacted description of the root, safe for logs and errors
    fn describe(&self) -> String;

    /// Every object whose key starts with `prefix`, fetched lazily
    ///
    /// Pagination is internal: the stream ends only when the listing is
    /// exhausted, however many pages that takes.
    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry>>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Bytes>;

    /// Existence probe without reading the object
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn put(&self, key: &str, data: Bytes) -> Result<()>;
}

/// Whether the caller intends to write through the accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Build the accessor for a location
///
/// No remote call is made here; the first storage request happens when
/// the caller uses the accessor.
pub fn open_accessor(
    location: &StorageLocation,
    config: &AccessorConfig,
    mode: OpenMode,
) -> Result<Arc<dyn ObjectAccessor>> {
    let describe = location.to_string();
    debug!("Opening accessor for {describe}", describe);
    match location {
        StorageLocation::Local(path) => {
            if mode == OpenMode::Write {
                std::fs::create_dir_all(path)?;
            } else if !path.is_dir() {
                return Err(StorageError::NotFound {
                    key: String::new(),
                    message: format!("Not Found: directory {} does not exist", path.display()),
                });
            }
            Ok(Arc::new(StoreAccessor::local(path)?))
        }
        StorageLocation::Par(par) => Ok(Arc::new(ParAccessor::new(par.clone(), config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_open_local_for_write_creates_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("nested").join("dump");
        let location = StorageLocation::Local(root.clone());

        let accessor =
            open_accessor(&location, &AccessorConfig::default(), OpenMode::Write).expect("open");
        accessor
            .put("@.json", Bytes::from_static(b"{}"))
            .await
            .expect("put");
        assert!(root.join("@.json").is_file());

        let listed: Vec<ObjectEntry> = accessor.list("").try_collect().await.expect("list");
        assert_eq!(
            listed,
            vec![ObjectEntry {
                key: "@.json".to_string(),
                size: 2
            }]
        );
    }

    #[test]
    fn test_open_missing_local_for_read_is_not_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let location = StorageLocation::Local(tmp.path().join("absent"));
        let err = open_accessor(&location, &AccessorConfig::default(), OpenMode::Read)
            .expect_err("missing directory");
        assert!(err.is_not_found());
    }
}
