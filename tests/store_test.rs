//! Store integration tests: upsert idempotence and window predicates.

mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use common::store_with_group;
use wg_radar::store::{
    AnalysisCacheEntry, ChatMessage, FetchLogEntry, FetchStatus, Group, MeetingNote, Store,
    VideoTranscript,
};

fn note(group: &str, date: (i32, u32, u32), text: &str) -> MeetingNote {
    MeetingNote {
        group_id: group.to_string(),
        doc_id: "doc1".to_string(),
        meeting_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        raw_text: text.to_string(),
        content_hash: format!("hash-{}", text),
        fetched_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_open_is_idempotent() {
    // Opening (and migrating) twice against the same path must not fail.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radar.db").display().to_string();

    let first = Store::open(&path).await.unwrap();
    first.close().await;
    let second = Store::open(&path).await.unwrap();
    second.close().await;
}

#[tokio::test]
async fn test_group_upsert_refreshes_fields() {
    let store = Store::open(":memory:").await.unwrap();

    let mut group = Group {
        id: "collector".to_string(),
        name: "Collector".to_string(),
        category: "implementation".to_string(),
        ..Group::default()
    };
    store.upsert_group(&group).await.unwrap();

    group.name = "Collector (renamed)".to_string();
    group.channel_id = "C123".to_string();
    store.upsert_group(&group).await.unwrap();

    let groups = store.list_groups(&[]).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "Collector (renamed)");
    assert_eq!(groups[0].channel_id, "C123");
}

#[tokio::test]
async fn test_list_groups_filter_and_order() {
    let store = Store::open(":memory:").await.unwrap();
    for (id, name, category) in [
        ("zz-group", "ZZ", "cross-cutting"),
        ("collector", "Collector", "implementation"),
        ("sampling", "Sampling", "specification"),
    ] {
        store
            .upsert_group(&Group {
                id: id.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                ..Group::default()
            })
            .await
            .unwrap();
    }

    let all = store.list_groups(&[]).await.unwrap();
    let categories: Vec<&str> = all.iter().map(|g| g.category.as_str()).collect();
    assert_eq!(categories, ["cross-cutting", "implementation", "specification"]);

    let filtered = store
        .list_groups(&["collector".to_string()])
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, "collector");
}

#[tokio::test]
async fn test_meeting_note_upsert_idempotent_and_windowed() {
    let store = store_with_group("g1", "Group One").await;

    store.upsert_meeting_note(&note("g1", (2026, 2, 18), "v1")).await.unwrap();
    store.upsert_meeting_note(&note("g1", (2026, 2, 11), "mid")).await.unwrap();
    store.upsert_meeting_note(&note("g1", (2026, 2, 4), "old")).await.unwrap();

    // Re-writing the same date updates in place.
    store.upsert_meeting_note(&note("g1", (2026, 2, 18), "v2")).await.unwrap();

    let start = Utc.with_ymd_and_hms(2026, 2, 11, 15, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 2, 18, 3, 0, 0).unwrap();
    let notes = store.get_meeting_notes("g1", start, end).await.unwrap();

    // Feb 4 excluded; descending by date; latest text wins.
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].meeting_date, NaiveDate::from_ymd_opt(2026, 2, 18).unwrap());
    assert_eq!(notes[0].raw_text, "v2");
    assert_eq!(notes[1].raw_text, "mid");
}

#[tokio::test]
async fn test_transcript_upsert_keyed_by_url() {
    let store = store_with_group("g1", "Group One").await;

    let mut vt = VideoTranscript {
        group_id: "g1".to_string(),
        recording_url: "https://recordings.example/rec/1".to_string(),
        recording_date: Utc.with_ymd_and_hms(2026, 2, 12, 17, 0, 0).unwrap(),
        duration_minutes: 55,
        transcript: "first pass".to_string(),
        transcript_source: "share_page_vtt".to_string(),
        content_hash: "h1".to_string(),
        fetched_at: Utc::now(),
    };
    store.upsert_transcript(&vt).await.unwrap();

    vt.transcript = "second pass".to_string();
    vt.content_hash = "h2".to_string();
    store.upsert_transcript(&vt).await.unwrap();

    let start = Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).unwrap();
    let transcripts = store.get_transcripts("g1", start, end).await.unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].transcript, "second pass");
    assert_eq!(transcripts[0].content_hash, "h2");
}

#[tokio::test]
async fn test_transcript_windowing_uses_day_bounds() {
    let store = store_with_group("g1", "Group One").await;

    // 23:30 on the window's end day is still inside the window.
    let vt = VideoTranscript {
        group_id: "g1".to_string(),
        recording_url: "https://recordings.example/rec/late".to_string(),
        recording_date: Utc.with_ymd_and_hms(2026, 2, 18, 23, 30, 0).unwrap(),
        duration_minutes: 30,
        transcript: "late meeting".to_string(),
        transcript_source: "share_page_vtt".to_string(),
        content_hash: "h".to_string(),
        fetched_at: Utc::now(),
    };
    store.upsert_transcript(&vt).await.unwrap();

    let start = Utc.with_ymd_and_hms(2026, 2, 11, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 2, 18, 1, 0, 0).unwrap();
    let transcripts = store.get_transcripts("g1", start, end).await.unwrap();
    assert_eq!(transcripts.len(), 1);
}

#[tokio::test]
async fn test_chat_message_upsert_keyed_by_channel_and_ts() {
    let store = store_with_group("g1", "Group One").await;

    let mut msg = ChatMessage {
        group_id: "g1".to_string(),
        channel_id: "C1".to_string(),
        message_ts: "1770000000.000100".to_string(),
        thread_ts: String::new(),
        user_id: "U1".to_string(),
        user_name: "alice".to_string(),
        text: "original".to_string(),
        message_date: Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap(),
        fetched_at: Utc::now(),
    };
    store.upsert_chat_message(&msg).await.unwrap();

    msg.text = "edited".to_string();
    store.upsert_chat_message(&msg).await.unwrap();

    let start = Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).unwrap();
    let messages = store.get_chat_messages("g1", start, end).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "edited");
}

#[tokio::test]
async fn test_cache_miss_is_none_and_put_is_upsert() {
    let store = store_with_group("g1", "Group One").await;

    assert!(store.get_cache("missing-key").await.unwrap().is_none());

    let mut entry = AnalysisCacheEntry {
        cache_key: "key1".to_string(),
        group_id: "g1".to_string(),
        stage: "notes".to_string(),
        window_start: NaiveDate::from_ymd_opt(2026, 2, 11).unwrap(),
        window_end: NaiveDate::from_ymd_opt(2026, 2, 18).unwrap(),
        prompt_hash: "ph".to_string(),
        result: "first".to_string(),
        model: "m1".to_string(),
        tokens_used: 42,
        created_at: Utc::now(),
    };
    store.put_cache(&entry).await.unwrap();

    entry.result = "second".to_string();
    store.put_cache(&entry).await.unwrap();

    let cached = store.get_cache("key1").await.unwrap().unwrap();
    assert_eq!(cached.result, "second");
    assert_eq!(cached.tokens_used, 42);
    assert_eq!(cached.window_start, NaiveDate::from_ymd_opt(2026, 2, 11).unwrap());
}

#[tokio::test]
async fn test_fetch_log_appends() {
    let store = store_with_group("g1", "Group One").await;

    for status in [FetchStatus::Success, FetchStatus::Error, FetchStatus::Skipped] {
        store
            .log_fetch(&FetchLogEntry {
                source: "meeting_notes".to_string(),
                group_id: "g1".to_string(),
                url: "https://docs.example/doc".to_string(),
                status,
                error_message: String::new(),
                duration_ms: 12,
            })
            .await
            .unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_log")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 3);
}
