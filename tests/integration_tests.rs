/// Integration tests for the repository content bridge
///
/// GitHub behaviour is checked against a local mockito server; concurrency
/// scenarios run against the in-memory store, which enforces real sha checks.
use std::sync::Arc;

use mockito::{Matcher, Server};
use repo_content_bridge::{
    encoding::encode_content, BridgeConfig, BridgeError, ContentBridge, ContentRef,
    DeleteRequest, EntryType, ErrorKind, Identity, MemoryStore, RepositoryLocation, ToolRequest,
    TreeEntryType, UpsertRequest,
};
use serde_json::json;
use tempfile::TempDir;

fn acme() -> RepositoryLocation {
    RepositoryLocation::new("acme", "widgets")
}

fn github_bridge(server: &Server) -> ContentBridge {
    let config = BridgeConfig::default()
        .with_token("test-token")
        .with_base_url(server.url());
    ContentBridge::from_config(&config).unwrap()
}

fn file_json(path: &str, sha: &str, content: &[u8]) -> String {
    json!({
        "type": "file",
        "name": path.rsplit('/').next().unwrap(),
        "path": path,
        "sha": sha,
        "size": content.len(),
        "encoding": "base64",
        "content": encode_content(content),
        "html_url": format!("https://github.com/acme/widgets/blob/main/{path}"),
        "download_url": null
    })
    .to_string()
}

fn write_json(content_sha: Option<&str>, commit_sha: &str) -> String {
    json!({
        "content": content_sha.map(|sha| json!({ "sha": sha })),
        "commit": {
            "sha": commit_sha,
            "html_url": format!("https://github.com/acme/widgets/commit/{commit_sha}")
        }
    })
    .to_string()
}

async fn memory_bridge() -> (ContentBridge, MemoryStore) {
    let store = MemoryStore::new();
    store.create_repository(&acme(), "main").await;
    (ContentBridge::new(Arc::new(store.clone())), store)
}

#[tokio::test]
async fn test_read_file_decodes_content() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/acme/widgets/contents/src/config.json")
        .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
        .match_header("authorization", "Bearer test-token")
        .match_header("accept", "application/vnd.github+json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(file_json("src/config.json", "abc123", b"{\"a\":1}"))
        .create_async()
        .await;

    let bridge = github_bridge(&server);
    let file = bridge
        .read_file(&acme(), &ContentRef::new("/src/config.json").at("main"))
        .await
        .unwrap();

    assert_eq!(file.text(), Some("{\"a\":1}"));
    assert_eq!(file.sha, "abc123");
    assert_eq!(file.encoding, "base64");
    assert_eq!(file.name, "config.json");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_read_directory_is_not_a_file() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/src")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!([
                { "type": "file", "name": "lib.rs", "path": "src/lib.rs", "sha": "a1", "size": 10 },
                { "type": "dir", "name": "bin", "path": "src/bin", "sha": "t1", "size": 0 }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let err = github_bridge(&server)
        .read_file(&acme(), &ContentRef::new("src"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAFile);
}

#[tokio::test]
async fn test_read_oversized_file_fails_before_decoding() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/assets/video.mp4")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "type": "file",
                "name": "video.mp4",
                "path": "assets/video.mp4",
                "sha": "big1",
                "size": 6 * 1024 * 1024,
                "encoding": "none",
                "content": ""
            })
            .to_string(),
        )
        .create_async()
        .await;

    match github_bridge(&server)
        .read_file(&acme(), &ContentRef::new("assets/video.mp4"))
        .await
    {
        Err(BridgeError::TooLarge { size, limit, .. }) => {
            assert_eq!(size, 6 * 1024 * 1024);
            assert_eq!(limit, 5 * 1024 * 1024);
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_withheld_content_fetches_blob() {
    let body = vec![b'7'; 2 * 1024 * 1024];
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/data.json")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "type": "file",
                "name": "data.json",
                "path": "data.json",
                "sha": "big2",
                "size": body.len(),
                "encoding": "none",
                "content": ""
            })
            .to_string(),
        )
        .create_async()
        .await;
    let blob = server
        .mock("GET", "/repos/acme/widgets/git/blobs/big2")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "sha": "big2",
                "size": body.len(),
                "encoding": "base64",
                "content": encode_content(&body)
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let file = github_bridge(&server)
        .read_file(&acme(), &ContentRef::new("data.json"))
        .await
        .unwrap();
    assert_eq!(file.size, 2 * 1024 * 1024);
    assert_eq!(file.content.len(), body.len());
    assert_eq!(file.sha, "big2");
    blob.assert_async().await;
}

#[tokio::test]
async fn test_repository_info() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/acme/widgets")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(
            json!({
                "id": 42,
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme" },
                "description": null,
                "private": true,
                "visibility": "private",
                "default_branch": "trunk",
                "size": 1234,
                "html_url": "https://github.com/acme/widgets"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let info = github_bridge(&server).repository_info(&acme()).await.unwrap();
    assert_eq!(info.full_name, "acme/widgets");
    assert_eq!(info.default_branch, "trunk");
    assert!(info.private);
    assert_eq!(info.visibility.as_deref(), Some("private"));
    assert_eq!(info.size, 1234);
    assert_eq!(info.description, None);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_list_single_file_is_one_element_sequence() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/README.md")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(file_json("README.md", "r1", b"# widgets"))
        .create_async()
        .await;

    let listing = github_bridge(&server)
        .list_directory(&acme(), &ContentRef::new("README.md"))
        .await
        .unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].entry_type, EntryType::File);
    assert_eq!(listing.entries[0].size, Some(9));
}

#[tokio::test]
async fn test_list_root() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/acme/widgets/contents/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!([
                { "type": "dir", "name": "src", "path": "src", "sha": "t1", "size": 0 },
                { "type": "file", "name": "Cargo.toml", "path": "Cargo.toml", "sha": "c1", "size": 42 }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let listing = github_bridge(&server)
        .list_directory(&acme(), &ContentRef::new("/"))
        .await
        .unwrap();
    assert_eq!(listing.entries.len(), 2);
    assert_eq!(listing.entries[0].entry_type, EntryType::Dir);
    assert_eq!(listing.entries[0].size, None);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upsert_creates_when_path_missing() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/src/config.json")
        .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/repos/acme/widgets/contents/src/config.json")
        .match_query(Matcher::Any)
        .match_body(Matcher::Json(json!({
            "message": "init config",
            "content": encode_content(b"{\"a\":1}"),
            "branch": "main"
        })))
        .with_status(201)
        .with_body(write_json(Some("new1"), "commit1"))
        .expect(1)
        .create_async()
        .await;

    let outcome = github_bridge(&server)
        .upsert_file(
            &acme(),
            UpsertRequest::new("src/config.json", "{\"a\":1}", "init config").branch("main"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.content_sha.as_deref(), Some("new1"));
    assert_eq!(outcome.commit_sha, "commit1");
    put.assert_async().await;
}

#[tokio::test]
async fn test_upsert_attaches_discovered_sha() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/notes.md")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(file_json("notes.md", "abc123", b"old"))
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/repos/acme/widgets/contents/notes.md")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "sha": "abc123",
            "author": { "name": "Ada", "email": "ada@example.com" }
        })))
        .with_status(200)
        .with_body(write_json(Some("def456"), "commit2"))
        .expect(1)
        .create_async()
        .await;

    let outcome = github_bridge(&server)
        .upsert_file(
            &acme(),
            UpsertRequest::new("notes.md", "new", "update notes").author(Identity {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.content_sha.as_deref(), Some("def456"));
    put.assert_async().await;
}

#[tokio::test]
async fn test_upsert_with_expected_sha_skips_discovery() {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    server
        .mock("PUT", "/repos/acme/widgets/contents/notes.md")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({ "sha": "abc123" })))
        .with_status(200)
        .with_body(write_json(Some("def456"), "commit3"))
        .create_async()
        .await;

    github_bridge(&server)
        .upsert_file(
            &acme(),
            UpsertRequest::new("notes.md", "new", "update").expected_sha("abc123"),
        )
        .await
        .unwrap();
    get.assert_async().await;
}

#[tokio::test]
async fn test_upsert_stale_sha_is_conflict_and_not_retried() {
    let mut server = Server::new_async().await;
    let put = server
        .mock("PUT", "/repos/acme/widgets/contents/src/config.json")
        .match_query(Matcher::Any)
        .with_status(409)
        .with_body(r#"{"message":"src/config.json does not match abc123"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = github_bridge(&server)
        .upsert_file(
            &acme(),
            UpsertRequest::new("src/config.json", "{}", "overwrite").expected_sha("abc123"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("Re-fetch the current content and retry"));
    put.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_is_retried_then_succeeds() {
    let mut server = Server::new_async().await;
    let throttled = server
        .mock("GET", "/repos/acme/widgets/contents/a.txt")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "0")
        .with_body(r#"{"message":"API rate limit exceeded"}"#)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/repos/acme/widgets/contents/a.txt")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(file_json("a.txt", "s1", b"hello"))
        .expect(1)
        .create_async()
        .await;

    let file = github_bridge(&server)
        .read_file(&acme(), &ContentRef::new("a.txt"))
        .await
        .unwrap();
    assert_eq!(file.text(), Some("hello"));
    throttled.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_retries_are_bounded() {
    let mut server = Server::new_async().await;
    let throttled = server
        .mock("GET", "/repos/acme/widgets/contents/a.txt")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_header("retry-after", "0")
        .with_body(r#"{"message":"API rate limit exceeded"}"#)
        .expect(3)
        .create_async()
        .await;

    let mut config = BridgeConfig::default()
        .with_token("test-token")
        .with_base_url(server.url());
    config.max_rate_limit_retries = 2;
    let bridge = ContentBridge::from_config(&config).unwrap();

    let err = bridge
        .read_file(&acme(), &ContentRef::new("a.txt"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    throttled.assert_async().await;
}

#[tokio::test]
async fn test_long_server_delay_is_surfaced_without_sleeping() {
    let mut server = Server::new_async().await;
    let throttled = server
        .mock("GET", "/repos/acme/widgets/contents/a.txt")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "3600")
        .expect(1)
        .create_async()
        .await;

    match github_bridge(&server)
        .read_file(&acme(), &ContentRef::new("a.txt"))
        .await
    {
        Err(BridgeError::RateLimited { retry_after, .. }) => {
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(3600)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    throttled.assert_async().await;
}

#[tokio::test]
async fn test_bad_credentials_are_unauthorized() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Any)
        .with_status(401)
        .with_body(r#"{"message":"Bad credentials"}"#)
        .create_async()
        .await;

    let err = github_bridge(&server)
        .list_directory(&acme(), &ContentRef::root())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_server_error_preserves_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Any)
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;

    match github_bridge(&server)
        .list_tree_recursive(&acme(), Some("main"))
        .await
    {
        Err(BridgeError::Remote { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "upstream unavailable");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_missing_file_performs_no_write() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/gone.txt")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = github_bridge(&server)
        .delete_file(&acme(), DeleteRequest::new("gone.txt"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    delete.assert_async().await;
}

#[tokio::test]
async fn test_delete_sends_current_sha() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/contents/old.txt")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(file_json("old.txt", "oldsha", b"bye"))
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/repos/acme/widgets/contents/old.txt")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "sha": "oldsha",
            "message": "Delete old.txt"
        })))
        .with_status(200)
        .with_body(write_json(None, "commit4"))
        .expect(1)
        .create_async()
        .await;

    let outcome = github_bridge(&server)
        .delete_file(&acme(), DeleteRequest::new("old.txt"))
        .await
        .unwrap();
    assert_eq!(outcome.content_sha, None);
    assert_eq!(outcome.commit_sha, "commit4");
    delete.assert_async().await;
}

#[tokio::test]
async fn test_tree_listing() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/widgets/git/trees/main")
        .match_query(Matcher::UrlEncoded("recursive".into(), "1".into()))
        .with_status(200)
        .with_body(
            json!({
                "sha": "root1",
                "truncated": false,
                "tree": [
                    { "path": "src", "mode": "040000", "type": "tree", "sha": "t1" },
                    { "path": "src/lib.rs", "mode": "100644", "type": "blob", "sha": "b1", "size": 120 }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let tree = github_bridge(&server)
        .list_tree_recursive(&acme(), Some("main"))
        .await
        .unwrap();
    assert_eq!(tree.sha, "root1");
    assert_eq!(tree.entries.len(), 2);
    assert_eq!(tree.entries[0].entry_type, TreeEntryType::Tree);
    assert_eq!(tree.entries[0].size, None);
    assert_eq!(tree.entries[1].size, Some(120));
}

#[tokio::test]
async fn test_create_then_read_scenario() {
    let (bridge, _) = memory_bridge().await;

    let outcome = bridge
        .upsert_file(
            &acme(),
            UpsertRequest::new("src/config.json", r#"{"a":1}"#, "init config"),
        )
        .await
        .unwrap();
    assert!(!outcome.commit_sha.is_empty());
    assert!(outcome.content_sha.is_some());

    let file = bridge
        .read_file(&acme(), &ContentRef::new("src/config.json"))
        .await
        .unwrap();
    assert_eq!(file.text(), Some(r#"{"a":1}"#));
    assert_eq!(Some(file.sha), outcome.content_sha);
}

#[tokio::test]
async fn test_update_with_current_sha_changes_it() {
    let (bridge, _) = memory_bridge().await;
    let first = bridge
        .upsert_file(&acme(), UpsertRequest::new("a.txt", "one", "first"))
        .await
        .unwrap();
    let sha = first.content_sha.unwrap();

    let second = bridge
        .upsert_file(&acme(), UpsertRequest::new("a.txt", "two", "second").expected_sha(&sha))
        .await
        .unwrap();
    assert_ne!(second.content_sha.as_deref(), Some(sha.as_str()));
}

#[tokio::test]
async fn test_wrong_expected_sha_leaves_content_unchanged() {
    let (bridge, store) = memory_bridge().await;
    bridge
        .upsert_file(&acme(), UpsertRequest::new("a.txt", "original", "first"))
        .await
        .unwrap();

    let err = bridge
        .upsert_file(
            &acme(),
            UpsertRequest::new("a.txt", "clobber", "second").expected_sha("not-the-sha"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        store.file(&acme(), None, "a.txt").await.unwrap(),
        bytes::Bytes::from("original")
    );
}

#[tokio::test]
async fn test_concurrent_writers_one_wins_one_conflicts() {
    let (bridge, store) = memory_bridge().await;
    let seed = store
        .seed_file(&acme(), None, "src/config.json", r#"{"v":0}"#)
        .await
        .unwrap();
    let bridge = Arc::new(bridge);

    let left = bridge.clone();
    let right = bridge.clone();
    let left_sha = seed.clone();
    let right_sha = seed.clone();

    let (first, second) = tokio::join!(
        async move {
            left.upsert_file(
                &acme(),
                UpsertRequest::new("src/config.json", r#"{"v":1}"#, "left").expected_sha(left_sha),
            )
            .await
        },
        async move {
            right
                .upsert_file(
                    &acme(),
                    UpsertRequest::new("src/config.json", r#"{"v":2}"#, "right")
                        .expected_sha(right_sha),
                )
                .await
        },
    );

    let (winner, loser) = match (&first, &second) {
        (Ok(_), Err(e)) => (r#"{"v":1}"#, e),
        (Err(e), Ok(_)) => (r#"{"v":2}"#, e),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(loser.kind(), ErrorKind::Conflict);
    assert_eq!(
        store.file(&acme(), None, "src/config.json").await.unwrap(),
        bytes::Bytes::from(winner)
    );
    assert_eq!(store.commit_count(&acme()).await, 1);
}

#[tokio::test]
async fn test_utf8_round_trip() {
    let (bridge, _) = memory_bridge().await;
    let samples = [
        "",
        "plain ascii",
        "línea con acentos y ñ",
        "日本語のテキスト",
        "emoji 🚀🦀 and\r\nwindows newlines\n",
        "\u{0}nul and \u{7f} controls",
    ];

    for (i, text) in samples.iter().enumerate() {
        let path = format!("samples/{i}.txt");
        bridge
            .upsert_file(&acme(), UpsertRequest::new(path.clone(), *text, "sample"))
            .await
            .unwrap();
        let file = bridge.read_file(&acme(), &ContentRef::new(&path)).await.unwrap();
        assert_eq!(file.text(), Some(*text), "sample {i} changed in transit");
    }
}

#[tokio::test]
async fn test_tool_call_end_to_end() {
    let (bridge, _) = memory_bridge().await;

    let created = ToolRequest::from_call(
        "upsertFile",
        json!({
            "owner": "acme",
            "repo": "widgets",
            "path": "docs/intro.md",
            "content": "# Intro",
            "message": "add intro"
        }),
    )
    .unwrap()
    .invoke(&bridge)
    .await
    .unwrap();
    assert_eq!(created["repository"], "acme/widgets");

    let listing = ToolRequest::from_call(
        "listRepositoryFiles",
        json!({ "owner": "acme", "repo": "widgets", "path": "/docs" }),
    )
    .unwrap()
    .invoke(&bridge)
    .await
    .unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["files"][0]["path"], "docs/intro.md");
    assert_eq!(listing["files"][0]["type"], "file");

    let deleted = ToolRequest::from_call(
        "deleteFile",
        json!({ "owner": "acme", "repo": "widgets", "path": "docs/intro.md" }),
    )
    .unwrap()
    .invoke(&bridge)
    .await
    .unwrap();
    assert!(deleted["content"].is_null());

    let tree = ToolRequest::from_call("listRepositoryTree", json!({ "owner": "acme", "repo": "widgets" }))
        .unwrap()
        .invoke(&bridge)
        .await
        .unwrap();
    assert_eq!(tree["count"], 0);
}

#[test]
fn test_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(
        &path,
        "max_file_size = 1024\nrequest_timeout_secs = 12\napi_base_url = \"http://127.0.0.1:9/\"\n",
    )
    .unwrap();

    let config = BridgeConfig::from_file(&path).unwrap();
    assert_eq!(config.max_file_size, 1024);
    assert_eq!(config.request_timeout_secs, 12);

    std::fs::write(&path, "max_file_size = \"lots\"").unwrap();
    assert!(matches!(
        BridgeConfig::from_file(&path),
        Err(BridgeError::InvalidConfig { .. })
    ));
    assert!(matches!(
        BridgeConfig::from_file(dir.path().join("missing.toml")),
        Err(BridgeError::Io(_))
    ));
}
