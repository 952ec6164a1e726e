// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-process object-storage service for tests
//!
//! [`MockObjectStorage`] serves one bucket over HTTP on a loopback port
//! and issues PAR URLs with a chosen access type, listing permission and
//! prefix. It answers the way the real service does:
//!
//! | Request | Grant lacks | Status | Message |
//! |---|---|---|---|
//! | list | listing | 404 | "Either the bucket named ... not authorized to access it" |
//! | get/head | read | 404 | "Not Found" |
//! | put | write | 403 | "Forbidden" |
//! | any | (expired) | 401 | NotAuthenticated |
//!
//! The listing is paginated with `nextStartWith` continuations, at most
//! 1000 objects per page.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

pub use crate::location::AccessType;

#[derive(Debug, Clone)]
struct MockPar {
    access: AccessType,
    list_objects: bool,
    prefix: String,
    expired: bool,
}

#[derive(Debug, Default)]
struct MockState {
    namespace: String,
    bucket: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    pars: Mutex<HashMap<String, MockPar>>,
    page_size: AtomicUsize,
    next_token: AtomicUsize,
    list_requests: AtomicUsize,
    object_gets: Mutex<Vec<String>>,
    /// Object name to the number of upcoming reads that answer 503
    failures: Mutex<HashMap<String, usize>>,
    ignore_ranges: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a running mock service; the server stops when it is dropped
#[derive(Debug)]
pub struct MockObjectStorage {
    state: Arc<MockState>,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockObjectStorage {
    /// Serve bucket `bucket` of `namespace` on an ephemeral loopback port
    pub async fn start(namespace: &str, bucket: &str) -> std::io::Result<Self> {
        let state = Arc::new(MockState {
            namespace: namespace.to_string(),
            bucket: bucket.to_string(),
            page_size: AtomicUsize::new(1000),
            ..MockState::default()
        });

        let router = Router::new()
            .route("/p/{token}/n/{namespace}/b/{bucket}/o/", get(list_objects))
            .route(
                "/p/{token}/n/{namespace}/b/{bucket}/o/{*name}",
                get(object).put(object),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await;
        });

        Ok(Self {
            state,
            addr,
            shutdown: Some(shutdown),
        })
    }

    /// Issue a PAR and return its URL
    ///
    /// `prefix` must be empty for a bucket PAR or end in `/`.
    pub fn create_par(&self, access: AccessType, list_objects: bool, prefix: &str) -> String {
        let n = self.state.next_token.fetch_add(1, Ordering::SeqCst);
        let token = format!("MoCkPaRtOkEn{n:04}");
        lock(&self.state.pars).insert(
            token.clone(),
            MockPar {
                access,
                list_objects,
                prefix: prefix.to_string(),
                expired: false,
            },
        );
        format!(
            "http://{}/p/{}/n/{}/b/{}/o/{}",
            self.addr, token, self.state.namespace, self.state.bucket, prefix
        )
    }

    /// Mark the PAR behind `url` as expired
    pub fn expire(&self, url: &str) {
        let mut pars = lock(&self.state.pars);
        for (token, par) in pars.iter_mut() {
            if url.contains(&format!("/p/{token}/")) {
                par.expired = true;
            }
        }
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state
            .page_size
            .store(page_size.clamp(1, 1000), Ordering::SeqCst);
    }

    pub fn insert(&self, name: &str, data: impl Into<Bytes>) {
        lock(&self.state.objects).insert(name.to_string(), data.into());
    }

    pub fn remove(&self, name: &str) -> Option<Bytes> {
        lock(&self.state.objects).remove(name)
    }

    pub fn object(&self, name: &str) -> Option<Bytes> {
        lock(&self.state.objects).get(name).cloned()
    }

    /// Every object name in the bucket, in order
    pub fn object_names(&self) -> Vec<String> {
        lock(&self.state.objects).keys().cloned().collect()
    }

    /// Names of objects read with GET since the last reset
    pub fn object_gets(&self) -> Vec<String> {
        lock(&self.state.object_gets).clone()
    }

    pub fn list_requests(&self) -> usize {
        self.state.list_requests.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        lock(&self.state.object_gets).clear();
        self.state.list_requests.store(0, Ordering::SeqCst);
    }

    /// Answer ranged reads with the whole object and 200, as some servers do
    pub fn ignore_ranges(&self, ignore: bool) {
        self.state.ignore_ranges.store(ignore, Ordering::SeqCst);
    }

    /// Make the next `count` reads of `name` answer 503
    pub fn fail_next_reads(&self, name: &str, count: usize) {
        lock(&self.state.failures).insert(name.to_string(), count);
    }
}

impl Drop for MockObjectStorage {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn service_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

fn bucket_not_found(state: &MockState) -> Response {
    service_error(
        StatusCode::NOT_FOUND,
        "BucketNotFound",
        &format!(
            "Either the bucket named '{}' does not exist in the namespace '{}' or you are not authorized to access it",
            state.bucket, state.namespace
        ),
    )
}

/// Resolve the grant for a request, or the response that refuses it
fn authorize(
    state: &MockState,
    token: &str,
    namespace: &str,
    bucket: &str,
) -> Result<MockPar, Response> {
    if namespace != state.namespace || bucket != state.bucket {
        return Err(bucket_not_found(state));
    }
    let par = lock(&state.pars)
        .get(token)
        .cloned()
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;
    if par.expired {
        return Err(service_error(
            StatusCode::UNAUTHORIZED,
            "NotAuthenticated",
            "The required information to complete authentication was not provided",
        ));
    }
    Ok(par)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    prefix: String,
    start: Option<String>,
    limit: Option<usize>,
}

async fn list_objects(
    State(state): State<Arc<MockState>>,
    Path((token, namespace, bucket)): Path<(String, String, String)>,
    Query(query): Query<ListQuery>,
) -> Response {
    state.list_requests.fetch_add(1, Ordering::SeqCst);
    let par = match authorize(&state, &token, &namespace, &bucket) {
        Ok(par) => par,
        Err(response) => return response,
    };
    if !par.list_objects || !query.prefix.starts_with(&par.prefix) {
        return bucket_not_found(&state);
    }

    let limit = query
        .limit
        .unwrap_or(1000)
        .min(state.page_size.load(Ordering::SeqCst))
        .max(1);
    let objects = lock(&state.objects);
    let start = query.start.unwrap_or_default();
    let mut matching = objects
        .range(start..)
        .filter(|(name, _)| name.starts_with(&query.prefix));

    let page: Vec<_> = matching
        .by_ref()
        .take(limit)
        .map(|(name, data)| json!({ "name": name, "size": data.len() }))
        .collect();
    let mut body = json!({ "objects": page });
    if let Some((next, _)) = matching.next() {
        body["nextStartWith"] = json!(next);
    }
    Json(body).into_response()
}

async fn object(
    State(state): State<Arc<MockState>>,
    method: Method,
    Path((token, namespace, bucket, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let par = match authorize(&state, &token, &namespace, &bucket) {
        Ok(par) => par,
        Err(response) => return response,
    };
    if !name.starts_with(&par.prefix) {
        return StatusCode::NOT_FOUND.into_response();
    }

    if method == Method::PUT {
        if !par.access.can_write() {
            return service_error(StatusCode::FORBIDDEN, "NotAllowed", "Forbidden");
        }
        lock(&state.objects).insert(name, body);
        return StatusCode::OK.into_response();
    }

    if !par.access.can_read() {
        return StatusCode::NOT_FOUND.into_response();
    }
    {
        let mut failures = lock(&state.failures);
        if let Some(remaining) = failures.get_mut(&name).filter(|r| **r > 0) {
            *remaining -= 1;
            return service_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "ServiceUnavailable",
                "Service Unavailable",
            );
        }
    }
    let Some(data) = lock(&state.objects).get(&name).cloned() else {
        return service_error(
            StatusCode::NOT_FOUND,
            "ObjectNotFound",
            &format!("The object '{name}' was not found in the bucket '{bucket}'"),
        );
    };
    if method == Method::HEAD {
        return StatusCode::OK.into_response();
    }
    lock(&state.object_gets).push(name);

    if state.ignore_ranges.load(Ordering::SeqCst) {
        return (StatusCode::OK, data).into_response();
    }
    match headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range)
    {
        Some((first, last)) => {
            let len = data.len() as u64;
            if first >= len {
                return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            }
            let end = last.min(len - 1) + 1;
            (
                StatusCode::PARTIAL_CONTENT,
                data.slice(first as usize..end as usize),
            )
                .into_response()
        }
        None => (StatusCode::OK, data).into_response(),
    }
}

/// `bytes=<first>-<last>`
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (first, last) = value.strip_prefix("bytes=")?.split_once('-')?;
    let first = first.parse().ok()?;
    let last = last.parse().ok()?;
    (first <= last).then_some((first, last))
}
