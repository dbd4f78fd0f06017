//! Content addressing: authority lookup, path roots, converters, and
//! cancellation.

mod common;

use httpmock::MockServer;
use satchel_db::DbError;
use satchel_sync::{ContentData, ContentProvider, SyncError};
use serde_json::json;
use std::path::Path;
use tokio_util::sync::CancellationToken;

async fn seeded_provider(root: &Path, server: &MockServer) -> ContentProvider {
    common::mock_initial_content(server).await;
    let provider = common::provider(root, server).await;
    provider
        .authority("blog")
        .unwrap()
        .sync_now()
        .await
        .unwrap();
    provider
}

#[tokio::test]
async fn test_unknown_authority() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = common::provider(dir.path(), &server).await;

    let err = provider
        .resolve("content://wiki/posts/p1.json", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthorityNotFound(name) if name == "wiki"));
}

#[tokio::test]
async fn test_unknown_path_root() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = common::provider(dir.path(), &server).await;

    let err = provider
        .resolve("content://blog/comments/1.json", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SyncError::PathNotFound { authority, root } => {
            assert_eq!(authority, "blog");
            assert_eq!(root, "comments");
        }
        other => panic!("expected PathNotFound, got {other}"),
    }
}

#[tokio::test]
async fn test_malformed_addresses() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = common::provider(dir.path(), &server).await;
    let cancel = CancellationToken::new();

    for address in ["nonsense", "https://blog/posts/1.json", "content:///posts/1"] {
        let err = provider.resolve(address, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidPath(_)), "{address}");
    }
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let err = provider
        .resolve("content://blog/posts/p1.xml", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnsupportedContentType(t) if t == "xml"));
}

#[tokio::test]
async fn test_missing_record() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let err = provider
        .resolve("content://blog/posts/zzz.json", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(DbError::NotFound(_))));
}

#[tokio::test]
async fn test_posts_query_with_parameters() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;
    let cancel = CancellationToken::new();

    let data = provider
        .resolve("content://blog/posts.json?type=post", &cancel)
        .await
        .unwrap();
    let ContentData::Records(rows) = data else {
        panic!("expected records");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("p1"));

    let data = provider
        .resolve("content://blog/posts.json?type=page", &cancel)
        .await
        .unwrap();
    assert_eq!(data, ContentData::Records(Vec::new()));
}

#[tokio::test]
async fn test_table_query_projects_listing_fields() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let data = provider
        .resolve("content://blog/posts.table", &CancellationToken::new())
        .await
        .unwrap();
    let ContentData::Records(rows) = data else {
        panic!("expected records");
    };
    assert_eq!(rows[0]["title"], json!("Hello"));
    assert!(rows[0].get("body").is_none());
}

#[tokio::test]
async fn test_file_resolves_to_cache_location() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let data = provider
        .resolve("content://blog/images/hello.png", &CancellationToken::new())
        .await
        .unwrap();
    let ContentData::File(path) = data else {
        panic!("expected a file");
    };
    assert_eq!(
        path,
        dir.path().join("content/blog/images/images/hello.png")
    );
    assert!(path.is_file());
}

#[tokio::test]
async fn test_webpage_conversion_renders_html() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let data = provider
        .resolve("content://blog/posts/p1.html", &CancellationToken::new())
        .await
        .unwrap();
    let ContentData::Record(record) = data else {
        panic!("expected a record");
    };
    let html = record["html"].as_str().unwrap();
    assert!(html.contains("<title>Hello</title>"));
    assert!(html.contains("<p>first post</p>"));
}

#[tokio::test]
async fn test_cancelled_resolution() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded_provider(dir.path(), &server).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = provider
        .resolve("content://blog/posts/p1.json", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
}
