// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use futures::TryStreamExt;
use storage::testing::{AccessType, MockObjectStorage};
use storage::{
    AccessorConfig, ObjectAccessor, OpenMode, RetryPolicy, StorageLocation, open_accessor,
};
use std::sync::Arc;

fn fast_config() -> AccessorConfig {
    AccessorConfig {
        retry: RetryPolicy {
            max_retries: 3,
            min_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..AccessorConfig::default()
    }
}

fn open(url: &str) -> Arc<dyn ObjectAccessor> {
    let location = StorageLocation::parse(url).expect("parse PAR");
    open_accessor(&location, &fast_config(), OpenMode::Read).expect("open")
}

#[tokio::test]
async fn test_listing_follows_continuations() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    for i in 0..2501 {
        mock.insert(&format!("s@t@{i:05}.jsonl"), Bytes::from_static(b"[1]\n"));
    }
    mock.insert("other.json", Bytes::from_static(b"{}"));

    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, true, ""));
    let keys: Vec<String> = accessor
        .list("s@")
        .map_ok(|entry| entry.key)
        .try_collect()
        .await
        .expect("list");

    assert_eq!(keys.len(), 2501);
    assert_eq!(keys.first().map(String::as_str), Some("s@t@00000.jsonl"));
    assert_eq!(keys.last().map(String::as_str), Some("s@t@02500.jsonl"));
    assert_eq!(mock.list_requests(), 3);
}

#[tokio::test]
async fn test_pager_restarts_from_first_page() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.set_page_size(2);
    for name in ["a", "b", "c", "d", "e"] {
        mock.insert(name, Bytes::from_static(b"x"));
    }
    let url = mock.create_par(AccessType::AnyObjectRead, true, "");
    let StorageLocation::Par(par) = StorageLocation::parse(&url).expect("parse") else {
        panic!("expected PAR");
    };
    let accessor = storage::ParAccessor::new(par, &fast_config()).expect("accessor");

    let mut pager = accessor.pager("");
    let first = pager.next_page().await.expect("page").expect("some");
    assert_eq!(first.len(), 2);
    pager.next_page().await.expect("page").expect("some");
    let last = pager.next_page().await.expect("page").expect("some");
    assert_eq!(last.len(), 1);
    assert!(pager.next_page().await.expect("done").is_none());
    assert_eq!(pager.pages_fetched(), 3);

    pager.restart();
    let again = pager.next_page().await.expect("page").expect("some");
    assert_eq!(again, first);
}

#[tokio::test]
async fn test_prefix_par_keys_are_relative() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("nightly/@.json", Bytes::from_static(b"{}"));
    mock.insert("nightly/world.json", Bytes::from_static(b"{}"));
    mock.insert("elsewhere/@.json", Bytes::from_static(b"{}"));

    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, true, "nightly/"));
    let mut keys: Vec<String> = accessor
        .list("")
        .map_ok(|entry| entry.key)
        .try_collect()
        .await
        .expect("list");
    keys.sort();
    assert_eq!(keys, vec!["@.json", "world.json"]);
    assert_eq!(&accessor.get("@.json").await.expect("get")[..], b"{}");
}

#[tokio::test]
async fn test_read_without_listing_permission() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("@.json", Bytes::from_static(b"{}"));
    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, false, ""));

    assert!(accessor.get("@.json").await.is_ok());
    let err = accessor
        .list("")
        .try_collect::<Vec<_>>()
        .await
        .expect_err("listing denied");
    assert_eq!(
        err.to_string(),
        "Either the bucket named 'dumps' does not exist in the namespace 'tenancy' or you are not authorized to access it"
    );
}

#[tokio::test]
async fn test_write_only_par_cannot_read() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("@.json", Bytes::from_static(b"{}"));
    let accessor = open(&mock.create_par(AccessType::AnyObjectWrite, true, ""));

    let err = accessor.get("@.json").await.expect_err("write only");
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Not Found");
    accessor
        .put("new.json", Bytes::from_static(b"[]"))
        .await
        .expect("put");
    assert_eq!(mock.object("new.json"), Some(Bytes::from_static(b"[]")));
}

#[tokio::test]
async fn test_read_only_par_cannot_write() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, true, ""));
    let err = accessor
        .put("new.json", Bytes::from_static(b"[]"))
        .await
        .expect_err("read only");
    assert!(err.is_authorization());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("s@t@0.jsonl", Bytes::from_static(b"[1]\n"));
    mock.fail_next_reads("s@t@0.jsonl", 2);
    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, true, ""));

    let data = accessor.get("s@t@0.jsonl").await.expect("third attempt");
    assert_eq!(&data[..], b"[1]\n");

    mock.fail_next_reads("s@t@0.jsonl", 10);
    let err = accessor.get("s@t@0.jsonl").await.expect_err("exhausted");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_expired_par_is_an_authorization_failure() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("@.json", Bytes::from_static(b"{}"));
    let url = mock.create_par(AccessType::AnyObjectRead, true, "");
    mock.expire(&url);

    let err = open(&url).get("@.json").await.expect_err("expired");
    assert!(err.is_authorization());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_range_exists_and_names_needing_escapes() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("my schema@t=40x.json", Bytes::from_static(b"0123456789"));
    let accessor = open(&mock.create_par(AccessType::AnyObjectReadWrite, true, ""));

    assert!(accessor.exists("my schema@t=40x.json").await.expect("head"));
    assert!(!accessor.exists("absent.json").await.expect("head"));
    let part = accessor
        .get_range("my schema@t=40x.json", 3, 4)
        .await
        .expect("range");
    assert_eq!(&part[..], b"3456");
}

#[tokio::test]
async fn test_range_when_server_sends_whole_object() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    mock.insert("k", Bytes::from_static(b"0123456789"));
    mock.ignore_ranges(true);
    let accessor = open(&mock.create_par(AccessType::AnyObjectRead, true, ""));

    let tail = accessor.get_range("k", 5, 10).await.expect("range");
    assert_eq!(&tail[..], b"56789");
    let middle = accessor.get_range("k", 2, 3).await.expect("range");
    assert_eq!(&middle[..], b"234");
    let past_end = accessor.get_range("k", 20, 4).await.expect("range");
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_errors_never_contain_the_token() {
    let mock = MockObjectStorage::start("tenancy", "dumps").await.expect("start");
    let url = mock.create_par(AccessType::AnyObjectWrite, false, "");
    let accessor = open(&url);
    let token = url
        .split("/p/")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .expect("token")
        .to_string();

    let get_err = accessor.get("@.json").await.expect_err("denied");
    let list_err = accessor
        .list("")
        .try_collect::<Vec<_>>()
        .await
        .expect_err("denied");
    for text in [
        get_err.to_string(),
        format!("{get_err:?}"),
        list_err.to_string(),
        accessor.describe(),
        format!("{accessor:?}"),
    ] {
        assert!(!text.contains(&token), "token leaked in {text}");
    }
}
