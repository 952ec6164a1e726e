// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Accessor over an `object_store` backend (local filesystem or memory)

use crate::accessor::{ObjectAccessor, ObjectEntry};
use crate::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Object access through any [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct StoreAccessor {
    store: Arc<dyn ObjectStore>,
    description: String,
}

impl StoreAccessor {
    /// Local directory; it must exist
    pub fn local(dir: &std::path::Path) -> Result<Self> {
        let store = object_store::local::LocalFileSystem::new_with_prefix(dir)?;
        Ok(Self {
            store: Arc::new(store),
            description: dir.display().to_string(),
        })
    }

    /// Fresh in-memory store
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            description: "memory://".to_string(),
        }
    }

    fn path(&self, key: &str) -> Path {
        Path::from(key)
    }
}

#[async_trait]
impl ObjectAccessor for StoreAccessor {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry>> {
        // object_store lists by path segment; filter to the exact string prefix
        let prefix = prefix.to_string();
        let directory = prefix.rfind('/').map(|idx| Path::from(&prefix[..idx]));

        self.store
            .list(directory.as_ref())
            .filter_map(move |item| {
                let prefix = prefix.clone();
                async move {
                    match item {
                        Ok(meta) => {
                            let name = meta.location.to_string();
                            name.starts_with(&prefix).then(|| {
                                Ok(ObjectEntry {
                                    key: name,
                                    size: meta.size,
                                })
                            })
                        }
                        Err(err) => Some(Err(StorageError::from(err))),
                    }
                }
            })
            .boxed()
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&self.path(key)).await?;
        Ok(result.bytes().await?)
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        Ok(self
            .store
            .get_range(&self.path(key), offset..offset + length)
            .await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&self.path(key), PutPayload::from(data))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn populate(accessor: &StoreAccessor, keys: &[&str]) {
        for key in keys {
            accessor
                .put(key, Bytes::from(key.as_bytes().to_vec()))
                .await
                .expect("put");
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_string_prefix() {
        let accessor = StoreAccessor::in_memory();
        populate(
            &accessor,
            &["sakila.json", "sakila@actor.json", "sakila@actor@0.jsonl", "world.json"],
        )
        .await;

        let mut keys: Vec<String> = accessor
            .list("sakila@")
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .expect("list");
        keys.sort();
        assert_eq!(keys, vec!["sakila@actor.json", "sakila@actor@0.jsonl"]);
    }

    #[tokio::test]
    async fn test_list_more_than_a_thousand_objects() {
        let accessor = StoreAccessor::in_memory();
        for i in 0..1200 {
            accessor
                .put(&format!("s@t@{i}.jsonl"), Bytes::from_static(b"[1]\n"))
                .await
                .expect("put");
        }
        let count = accessor.list("").try_collect::<Vec<_>>().await.expect("list").len();
        assert_eq!(count, 1200);
    }

    #[tokio::test]
    async fn test_get_range_and_exists() {
        let accessor = StoreAccessor::in_memory();
        accessor
            .put("k", Bytes::from_static(b"0123456789"))
            .await
            .expect("put");
        let part = accessor.get_range("k", 2, 3).await.expect("range");
        assert_eq!(&part[..], b"234");
        assert!(accessor.get_range("k", 0, 0).await.expect("empty").is_empty());
        assert!(accessor.exists("k").await.expect("head"));
        assert!(!accessor.exists("missing").await.expect("head"));
        assert!(accessor.get("missing").await.expect_err("absent").is_not_found());
    }
}
