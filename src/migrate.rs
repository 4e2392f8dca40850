//! Database schema migrations.
//!
//! Migrations are monotonically numbered; each runs inside its own
//! transaction and records its version in `schema_version`. Opening a store
//! applies every pending migration, so a failed migration is fatal before
//! any other work starts.
//!
//! # Tables
//!
//! | Table | Purpose | Unique key |
//! |-------|---------|------------|
//! | `groups` | working-group catalog entries | `id` |
//! | `meeting_notes` | windowed meeting-note records | `(group_id, meeting_date)` |
//! | `video_transcripts` | parsed recording transcripts | `recording_url` |
//! | `chat_messages` | channel messages and thread replies | `(channel_id, message_ts)` |
//! | `analysis_cache` | memoized LLM stage results | `cache_key` |
//! | `reports` | emitted report files | — |
//! | `fetch_log` | append-only fetch audit | — |
//!
//! The unique keys are load-bearing: every writer upserts on them, which is
//! what makes re-running a fetch or analyze phase idempotent. They must be
//! preserved across schema versions.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        meeting_time TEXT NOT NULL DEFAULT '',
        notes_doc_id TEXT NOT NULL DEFAULT '',
        channel_id TEXT NOT NULL DEFAULT '',
        channel_name TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meeting_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL REFERENCES groups(id),
        doc_id TEXT NOT NULL,
        meeting_date TEXT NOT NULL,
        raw_text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        fetched_at INTEGER NOT NULL,
        UNIQUE(group_id, meeting_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS video_transcripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL REFERENCES groups(id),
        recording_url TEXT NOT NULL,
        recording_date INTEGER NOT NULL,
        duration_minutes INTEGER NOT NULL DEFAULT 0,
        transcript TEXT NOT NULL,
        transcript_source TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        fetched_at INTEGER NOT NULL,
        UNIQUE(recording_url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL REFERENCES groups(id),
        channel_id TEXT NOT NULL,
        message_ts TEXT NOT NULL,
        thread_ts TEXT NOT NULL DEFAULT '',
        user_id TEXT NOT NULL DEFAULT '',
        user_name TEXT NOT NULL DEFAULT '',
        text TEXT NOT NULL,
        message_date INTEGER NOT NULL,
        fetched_at INTEGER NOT NULL,
        UNIQUE(channel_id, message_ts)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analysis_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cache_key TEXT NOT NULL UNIQUE,
        group_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        window_start TEXT NOT NULL,
        window_end TEXT NOT NULL,
        prompt_hash TEXT NOT NULL,
        result TEXT NOT NULL,
        model TEXT NOT NULL,
        tokens_used INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        report_type TEXT NOT NULL,
        group_id TEXT NOT NULL DEFAULT '',
        window_start TEXT NOT NULL,
        window_end TEXT NOT NULL,
        file_path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fetch_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        group_id TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        error_message TEXT NOT NULL DEFAULT '',
        duration_ms INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_meeting_notes_group_date
        ON meeting_notes(group_id, meeting_date DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transcripts_group_date
        ON video_transcripts(group_id, recording_date DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_chat_group_date
        ON chat_messages(group_id, message_date DESC)
    "#,
];

/// Apply all pending migrations.
///
/// Each migration runs in its own transaction together with its
/// `schema_version` record, so a crash mid-migration leaves the version
/// ledger consistent with the applied DDL.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
        .execute(pool)
        .await
        .context("creating schema_version table")?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .context("reading schema version")?;

    for (i, stmt) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::query(stmt)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("running migration {}", version))?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("recording migration {}", version))?;
        tx.commit().await?;
    }

    Ok(())
}
