//! Chat adapter integration tests: pagination, thread assembly, and
//! idempotent re-fetch against an in-process mock API.

mod common;

use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use common::store_with_group;
use wg_radar::chat::ChatFetcher;
use wg_radar::store::Group;

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Timestamps for three top-level messages and one reply, all inside the
/// last day.
struct TsFixture {
    t1: String,
    t2: String,
    t3: String,
    reply: String,
}

fn fixture() -> TsFixture {
    let base = Utc::now().timestamp() - 3600;
    TsFixture {
        t1: format!("{}.000100", base),
        t2: format!("{}.000200", base + 60),
        t3: format!("{}.000300", base + 120),
        reply: format!("{}.000400", base + 180),
    }
}

/// Mock API: two history pages (cursor `c2` between them) and one replies
/// page for the parent `t1`.
fn mock_router(ts: &TsFixture) -> Router {
    let t1 = ts.t1.clone();
    let t2 = ts.t2.clone();
    let t3 = ts.t3.clone();
    let reply = ts.reply.clone();

    let history_t1 = t1.clone();
    let history = move |Query(params): Query<HashMap<String, String>>| {
        let t1 = history_t1.clone();
        let t2 = t2.clone();
        let t3 = t3.clone();
        async move {
            let page: Value = match params.get("cursor").map(String::as_str) {
                None => json!({
                    "ok": true,
                    "messages": [
                        {"type": "message", "ts": t1, "user": "U1", "text": "kickoff", "reply_count": 1},
                        {"type": "message", "ts": t2, "user": "U2", "text": "status update"},
                    ],
                    "has_more": true,
                    "response_metadata": {"next_cursor": "c2"},
                }),
                Some("c2") => json!({
                    "ok": true,
                    "messages": [
                        {"type": "message", "ts": t3, "user": "U3", "text": "wrap up"},
                    ],
                    "has_more": false,
                }),
                Some(other) => json!({"ok": false, "error": format!("bad cursor {other}")}),
            };
            Json(page)
        }
    };

    let replies = move |Query(params): Query<HashMap<String, String>>| {
        let t1 = t1.clone();
        let reply = reply.clone();
        async move {
            assert_eq!(params.get("ts"), Some(&t1));
            Json(json!({
                "ok": true,
                "messages": [
                    {"type": "message", "ts": t1, "thread_ts": t1, "user": "U1", "text": "kickoff", "reply_count": 1},
                    {"type": "message", "ts": reply, "thread_ts": t1, "user": "U2", "text": "answered in thread"},
                ],
                "has_more": false,
            }))
        }
    };

    Router::new()
        .route("/conversations.history", get(history))
        .route("/conversations.replies", get(replies))
}

fn test_group() -> Group {
    Group {
        id: "g1".to_string(),
        name: "Group One".to_string(),
        category: "implementation".to_string(),
        channel_id: "C1".to_string(),
        channel_name: "#group-one".to_string(),
        ..Group::default()
    }
}

#[tokio::test]
async fn test_pagination_and_thread_assembly() {
    let ts = fixture();
    let base_url = spawn_server(mock_router(&ts)).await;
    let store = store_with_group("g1", "Group One").await;

    let fetcher = ChatFetcher::new(store.clone(), &base_url, "xoxc-test", "cookie").unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();

    let end = Utc::now();
    let start = end - Duration::days(1);
    fetcher
        .fetch_messages(&test_group(), start, end, &cancel)
        .await
        .unwrap();

    let messages = store.get_chat_messages("g1", start, end).await.unwrap();
    assert_eq!(messages.len(), 4, "three top-level messages plus one reply");

    let top_level: Vec<_> = messages.iter().filter(|m| m.thread_ts.is_empty()).collect();
    assert_eq!(top_level.len(), 3);
    assert!(top_level.iter().all(|m| m.channel_id == "C1"));

    let replies: Vec<_> = messages.iter().filter(|m| !m.thread_ts.is_empty()).collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].thread_ts, ts.t1);
    assert_eq!(replies[0].text, "answered in thread");
}

#[tokio::test]
async fn test_refetch_is_idempotent() {
    let ts = fixture();
    let base_url = spawn_server(mock_router(&ts)).await;
    let store = store_with_group("g1", "Group One").await;

    let fetcher = ChatFetcher::new(store.clone(), &base_url, "xoxc-test", "cookie").unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();

    let end = Utc::now();
    let start = end - Duration::days(1);
    fetcher
        .fetch_messages(&test_group(), start, end, &cancel)
        .await
        .unwrap();
    fetcher
        .fetch_messages(&test_group(), start, end, &cancel)
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE channel_id = 'C1'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 4, "re-fetch must not duplicate rows");
}

#[tokio::test]
async fn test_missing_channel_id_fails_fast() {
    let store = store_with_group("g1", "Group One").await;
    let fetcher = ChatFetcher::new(store, "http://127.0.0.1:1", "t", "c").unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();

    let mut group = test_group();
    group.channel_id = String::new();

    let err = fetcher
        .fetch_messages(&group, Utc::now() - Duration::days(1), Utc::now(), &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no channel id"));
}

#[tokio::test]
async fn test_api_error_code_is_surfaced() {
    let router = Router::new().route(
        "/conversations.history",
        get(|| async { Json(json!({"ok": false, "error": "channel_not_found"})) }),
    );
    let base_url = spawn_server(router).await;
    let store = store_with_group("g1", "Group One").await;

    let fetcher = ChatFetcher::new(store, &base_url, "t", "c").unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();

    let err = fetcher
        .fetch_messages(&test_group(), Utc::now() - Duration::days(1), Utc::now(), &cancel)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("channel_not_found"));
}
