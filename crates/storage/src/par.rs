// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object access through a pre-authenticated request (PAR) URL
//!
//! The PAR token is the only credential. Requests go straight to the
//! object-storage REST endpoints below the PAR base:
//!
//! - `GET  <base>/o/?prefix=..&start=..&limit=..` lists one page
//! - `GET  <base>/o/<name>` reads an object (optionally with `Range`)
//! - `HEAD <base>/o/<name>` probes existence
//! - `PUT  <base>/o/<name>` writes an object
//!
//! Listing pages hold at most 1000 objects; [`ListPager`] follows the
//! `nextStartWith` continuation until the listing is exhausted.

use crate::accessor::{ObjectAccessor, ObjectEntry};
use crate::config::AccessorConfig;
use crate::location::ParUrl;
use crate::retry::RetryPolicy;
use crate::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    objects: Vec<ListedObject>,
    #[serde(default)]
    next_start_with: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Error body returned by the object-storage service
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
struct ParClient {
    par: ParUrl,
    http: reqwest::Client,
    retry: RetryPolicy,
    page_size: usize,
}

impl ParClient {
    /// Object name as the service knows it, including the PAR prefix
    fn full_name(&self, key: &str) -> String {
        format!("{}{}", self.par.prefix(), key)
    }

    /// Send a request built by `request`, retrying transient failures, and
    /// return the body of the successful response
    async fn fetch<R>(&self, operation: &'static str, key: &str, request: R) -> Result<Bytes>
    where
        R: Fn() -> reqwest::RequestBuilder,
    {
        let (_, body) = self.send(operation, key, request).await?;
        Ok(body)
    }

    /// Like [`ParClient::fetch`], keeping the success status
    async fn send<R>(
        &self,
        operation: &'static str,
        key: &str,
        request: R,
    ) -> Result<(StatusCode, Bytes)>
    where
        R: Fn() -> reqwest::RequestBuilder,
    {
        let request = &request;
        let par = &self.par;
        self.retry
            .run(operation, key, move || async move {
                let response = request()
                    .send()
                    .await
                    .map_err(|e| StorageError::from_transport(operation, e))?;
                let status = response.status();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| StorageError::from_transport(operation, e))?;
                if status.is_success() {
                    Ok((status, body))
                } else {
                    let message = serde_json::from_slice::<ServiceError>(&body)
                        .ok()
                        .map(|e| par.scrub(&e.message));
                    Err(StorageError::from_status(
                        operation,
                        key,
                        status.as_u16(),
                        message,
                    ))
                }
            })
            .await
    }

    async fn list_page(&self, prefix: &str, start: Option<&str>) -> Result<ListResponse> {
        let url = self.par.list_url()?;
        let limit = self.page_size.to_string();
        let body = self
            .fetch("list", prefix, || {
                let mut query = vec![
                    ("prefix", prefix),
                    ("fields", "name,size"),
                    ("limit", limit.as_str()),
                ];
                if let Some(start) = start {
                    query.push(("start", start));
                }
                self.http.get(url.clone()).query(&query)
            })
            .await?;
        serde_json::from_slice(&body).map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }
}

/// Restartable cursor over a paginated listing
///
/// Each call to [`ListPager::next_page`] fetches one page and remembers
/// the continuation; `None` means the listing is exhausted.
#[derive(Debug)]
pub struct ListPager {
    client: Arc<ParClient>,
    /// Full object-name prefix, PAR prefix included
    prefix: String,
    next_start: Option<String>,
    exhausted: bool,
    pages: usize,
}

impl ListPager {
    fn new(client: Arc<ParClient>, prefix: &str) -> Self {
        let prefix = client.full_name(prefix);
        Self {
            client,
            prefix,
            next_start: None,
            exhausted: false,
            pages: 0,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectEntry>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .client
            .list_page(&self.prefix, self.next_start.as_deref())
            .await?;
        self.pages += 1;

        let next = page.next_start_with.filter(|s| !s.is_empty());
        if next.is_some() && next == self.next_start {
            return Err(StorageError::InvalidResponse(
                "listing continuation did not advance".to_string(),
            ));
        }
        self.exhausted = next.is_none();
        self.next_start = next;

        let scope = self.client.par.prefix();
        let entries = page
            .objects
            .into_iter()
            .filter_map(|object| {
                object.name.strip_prefix(scope).map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: object.size.unwrap_or(0),
                })
            })
            .collect::<Vec<_>>();
        let pages = self.pages;
        let count = entries.len();
        debug!("Listed page {pages} with {count} objects", pages, count);
        Ok(Some(entries))
    }

    /// Start over from the first page
    pub fn restart(&mut self) {
        self.next_start = None;
        self.exhausted = false;
        self.pages = 0;
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}

/// [`ObjectAccessor`] over a bucket or prefix PAR
#[derive(Debug, Clone)]
pub struct ParAccessor {
    client: Arc<ParClient>,
}

impl ParAccessor {
    pub fn new(par: ParUrl, config: &AccessorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| StorageError::from_transport("connect", e))?;
        Ok(Self {
            client: Arc::new(ParClient {
                par,
                http,
                retry: config.retry.clone(),
                page_size: config.page_size(),
            }),
        })
    }

    pub fn par(&self) -> &ParUrl {
        &self.client.par
    }

    /// A pager over every object whose key starts with `prefix`
    pub fn pager(&self, prefix: &str) -> ListPager {
        ListPager::new(Arc::clone(&self.client), prefix)
    }
}

#[async_trait]
impl ObjectAccessor for ParAccessor {
    fn describe(&self) -> String {
        self.client.par.to_string()
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry>> {
        stream::try_unfold(self.pager(prefix), |mut pager| async move {
            let page = pager.next_page().await?;
            Ok::<_, StorageError>(page.map(|entries| {
                (
                    stream::iter(entries.into_iter().map(Ok::<_, StorageError>)),
                    pager,
                )
            }))
        })
        .try_flatten()
        .boxed()
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let url = self.client.par.object_url(&self.client.full_name(key))?;
        self.client
            .fetch("get", key, || self.client.http.get(url.clone()))
            .await
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let url = self.client.par.object_url(&self.client.full_name(key))?;
        let last = offset.saturating_add(length - 1);
        let range = format!("bytes={offset}-{last}");
        let (status, body) = self
            .client
            .send("get", key, || {
                self.client.http.get(url.clone()).header(RANGE, range.as_str())
            })
            .await?;
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(body);
        }
        // 200 carries the whole object when the server ignored Range
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(body.len());
        let end = usize::try_from(length)
            .unwrap_or(usize::MAX)
            .saturating_add(start)
            .min(body.len());
        Ok(body.slice(start..end))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.client.par.object_url(&self.client.full_name(key))?;
        match self
            .client
            .fetch("head", key, || self.client.http.head(url.clone()))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let url = self.client.par.object_url(&self.client.full_name(key))?;
        self.client
            .fetch("put", key, || self.client.http.put(url.clone()).body(data.clone()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_parses_continuation() {
        let body = br#"{"objects":[{"name":"a.json","size":3},{"name":"b.json"}],"nextStartWith":"c.json"}"#;
        let page: ListResponse = serde_json::from_slice(body).expect("parse");
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[1].size, None);
        assert_eq!(page.next_start_with.as_deref(), Some("c.json"));

        let last: ListResponse = serde_json::from_slice(br#"{"objects":[]}"#).expect("parse");
        assert!(last.next_start_with.is_none());
    }

    #[test]
    fn test_describe_is_redacted() {
        let par = ParUrl::parse("https://host.example/p/TopSecret99/n/ns/b/bkt/o/").expect("par");
        let accessor = ParAccessor::new(par, &AccessorConfig::default()).expect("accessor");
        assert!(!accessor.describe().contains("TopSecret99"));
        assert!(!format!("{accessor:?}").contains("TopSecret99"));
    }
}
