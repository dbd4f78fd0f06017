//! Shared fixtures: a provider wired to an httpmock CMS with an in-memory
//! credential store.

use httpmock::MockServer;
use satchel_core::{AuthorityConfig, CachePolicy, CmsSettings, FilesetConfig, ProviderConfig};
use satchel_sync::{ContentProvider, MemoryCredentialStore, ReqwestClient, ZipUnpacker};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Provider configuration with one `blog` authority pointing at the mock
/// CMS. Categories: `pages` (app cache), `images` (content cache), `live`
/// (never cached).
pub fn config(root: &Path, server: &MockServer) -> ProviderConfig {
    let filesets = HashMap::from([
        (
            "pages".to_string(),
            FilesetConfig {
                mappings: vec!["html".to_string()],
                cache: CachePolicy::App,
                cachable: true,
            },
        ),
        (
            "images".to_string(),
            FilesetConfig {
                mappings: vec!["png".to_string()],
                cache: CachePolicy::Content,
                cachable: true,
            },
        ),
        (
            "live".to_string(),
            FilesetConfig {
                mappings: Vec::new(),
                cache: CachePolicy::None,
                cachable: false,
            },
        ),
    ]);
    let record_types = HashMap::from([
        ("json".to_string(), "record".to_string()),
        ("html".to_string(), "webpage".to_string()),
        ("png".to_string(), "file".to_string()),
    ]);
    let query_types = HashMap::from([
        ("json".to_string(), "results".to_string()),
        ("table".to_string(), "table".to_string()),
    ]);
    ProviderConfig {
        staging_path: root.join("staging"),
        app_cache_path: root.join("app"),
        content_cache_path: root.join("content"),
        queue_db: root.join("queue.sqlite"),
        delete_executed_queue_records: true,
        authorities: HashMap::from([(
            "blog".to_string(),
            AuthorityConfig {
                cms: CmsSettings {
                    host: server.host(),
                    port: Some(server.port()),
                    secure: false,
                    account: "acme".to_string(),
                    repo: "blog".to_string(),
                    branch: "master".to_string(),
                    auth_realm: "acme/blog".to_string(),
                },
                refresh_interval: 30.0,
                file_db: root.join("blog.sqlite"),
                filesets,
                record_types,
                query_types,
                max_retries: 3,
                // No rate limiting in tests.
                max_requests_per_minute: 0.0,
            },
        )]),
    }
}

pub async fn provider(root: &Path, server: &MockServer) -> ContentProvider {
    ContentProvider::with_capabilities(
        config(root, server),
        Arc::new(ReqwestClient::new()),
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ZipUnpacker),
    )
    .await
    .expect("provider construction failed")
}

/// A first feed: one commit, one post, a page, an image, and an uncached
/// live record.
pub fn initial_feed() -> Value {
    json!({
        "commits": [{"id": "c1", "branch": "master", "date": "2026-08-01"}],
        "posts": [{
            "id": "p1",
            "type": "post",
            "title": "Hello",
            "body": "<p>first post</p>",
            "image": "f2",
            "commit_id": "c1",
            "status": "published"
        }],
        "files": [
            {"id": "f1", "post_id": "p1", "category": "pages", "path": "pages/hello.html"},
            {"id": "f2", "post_id": "p1", "category": "images", "path": "images/hello.png"},
            {"id": "f3", "post_id": "p1", "category": "live", "path": "live/now.json"}
        ]
    })
}

/// Mock the feed and both cachable file downloads for [`initial_feed`].
pub async fn mock_initial_content(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/acme/blog/updates/master");
            then.status(200).json_body(initial_feed());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/acme/blog/files/master/pages/hello.html");
            then.status(200).body("<h1>hello</h1>");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/acme/blog/files/master/images/hello.png");
            then.status(200).body("png-bytes");
        })
        .await;
}
