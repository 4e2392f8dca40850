//! Durable local cache for catalog entries, windowed source records,
//! memoized analysis results, and the fetch audit log.
//!
//! All writes are idempotent upserts keyed by each record's natural
//! uniqueness tuple (see [`crate::migrate`] for the keys), so re-running a
//! fetch or analyze phase never duplicates rows — it refreshes `fetched_at`
//! and any mutable fields instead.
//!
//! Calendar dates (`meeting_date`, cache windows) are stored as `YYYY-MM-DD`
//! text; instants are stored as Unix epoch seconds in UTC.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::migrate;

/// A working-group descriptor parsed from the community catalog.
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Normalized slug, unique across the catalog.
    pub id: String,
    pub name: String,
    /// One of `specification`, `implementation`, `cross-cutting`, `localization`.
    pub category: String,
    pub meeting_time: String,
    pub notes_doc_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub updated_at: DateTime<Utc>,
}

/// A single meeting's notes, sliced out of the group's long-lived document.
#[derive(Debug, Clone)]
pub struct MeetingNote {
    pub group_id: String,
    pub doc_id: String,
    pub meeting_date: NaiveDate,
    pub raw_text: String,
    /// SHA-256 of `raw_text`.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// A parsed recording transcript.
#[derive(Debug, Clone)]
pub struct VideoTranscript {
    pub group_id: String,
    pub recording_url: String,
    pub recording_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub transcript: String,
    pub transcript_source: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// A chat message. Thread replies carry the parent's timestamp in
/// `thread_ts`; top-level messages carry an empty string.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub group_id: String,
    pub channel_id: String,
    /// Source-native high-resolution timestamp, e.g. `1706123456.789012`.
    pub message_ts: String,
    pub thread_ts: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub message_date: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// A memoized LLM stage result.
#[derive(Debug, Clone)]
pub struct AnalysisCacheEntry {
    /// SHA-256 over (group, stage, window, input hash); see
    /// [`crate::analysis::build_cache_key`].
    pub cache_key: String,
    pub group_id: String,
    pub stage: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub prompt_hash: String,
    pub result: String,
    pub model: String,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

/// A record of an emitted report file.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub report_type: String,
    pub group_id: String,
    pub window_start: String,
    pub window_end: String,
    pub file_path: String,
    pub content_hash: String,
}

/// Outcome of one fetch operation, for the append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Error,
    Skipped,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Error => "error",
            FetchStatus::Skipped => "skipped",
        }
    }
}

/// An entry in the fetch audit log.
#[derive(Debug, Clone)]
pub struct FetchLogEntry {
    pub source: String,
    pub group_id: String,
    pub url: String,
    pub status: FetchStatus,
    pub error_message: String,
    pub duration_ms: i64,
}

/// Database handle. Cheap to clone; all methods take `&self`.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the store at `db_path` (`:memory:` for a volatile store) and
    /// apply pending migrations. Migration failure is fatal.
    pub async fn open(db_path: &str) -> Result<Self> {
        let pool = db::connect(db_path).await.context("opening database")?;
        migrate::run_migrations(&pool)
            .await
            .context("running migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The underlying pool, for ad-hoc queries in tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a group by id, refreshing `updated_at`.
    pub async fn upsert_group(&self, group: &Group) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (id, name, category, meeting_time, notes_doc_id, channel_id, channel_name, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                meeting_time = excluded.meeting_time,
                notes_doc_id = excluded.notes_doc_id,
                channel_id = excluded.channel_id,
                channel_name = excluded.channel_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.category)
        .bind(&group.meeting_time)
        .bind(&group.notes_doc_id)
        .bind(&group.channel_id)
        .bind(&group.channel_name)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List groups, optionally filtered to a set of ids, ordered by
    /// (category, name).
    pub async fn list_groups(&self, filter_ids: &[String]) -> Result<Vec<Group>> {
        let rows = if filter_ids.is_empty() {
            sqlx::query(
                "SELECT id, name, category, meeting_time, notes_doc_id, channel_id, channel_name, updated_at
                 FROM groups ORDER BY category, name",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            let placeholders = vec!["?"; filter_ids.len()].join(", ");
            let sql = format!(
                "SELECT id, name, category, meeting_time, notes_doc_id, channel_id, channel_name, updated_at
                 FROM groups WHERE id IN ({}) ORDER BY category, name",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in filter_ids {
                query = query.bind(id);
            }
            query.fetch_all(&self.pool).await?
        };

        Ok(rows
            .iter()
            .map(|row| Group {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category"),
                meeting_time: row.get("meeting_time"),
                notes_doc_id: row.get("notes_doc_id"),
                channel_id: row.get("channel_id"),
                channel_name: row.get("channel_name"),
                updated_at: ts_to_utc(row.get("updated_at")),
            })
            .collect())
    }

    /// Insert or update a meeting note; conflicts on (group_id, meeting_date)
    /// overwrite the text, hash, and fetch time.
    pub async fn upsert_meeting_note(&self, note: &MeetingNote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meeting_notes (group_id, doc_id, meeting_date, raw_text, content_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id, meeting_date) DO UPDATE SET
                raw_text = excluded.raw_text,
                content_hash = excluded.content_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&note.group_id)
        .bind(&note.doc_id)
        .bind(note.meeting_date.format("%Y-%m-%d").to_string())
        .bind(&note.raw_text)
        .bind(&note.content_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Meeting notes for a group whose date falls within
    /// `[start-of-day(start), end-of-day(end)]`, newest first.
    pub async fn get_meeting_notes(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingNote>> {
        let rows = sqlx::query(
            r#"
            SELECT group_id, doc_id, meeting_date, raw_text, content_hash, fetched_at
            FROM meeting_notes
            WHERE group_id = ? AND meeting_date >= ? AND meeting_date <= ?
            ORDER BY meeting_date DESC
            "#,
        )
        .bind(group_id)
        .bind(start.date_naive().format("%Y-%m-%d").to_string())
        .bind(end.date_naive().format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let date_str: String = row.get("meeting_date");
                let meeting_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                    .with_context(|| format!("invalid meeting_date in store: {:?}", date_str))?;
                Ok(MeetingNote {
                    group_id: row.get("group_id"),
                    doc_id: row.get("doc_id"),
                    meeting_date,
                    raw_text: row.get("raw_text"),
                    content_hash: row.get("content_hash"),
                    fetched_at: ts_to_utc(row.get("fetched_at")),
                })
            })
            .collect()
    }

    /// Insert or update a transcript; conflicts on recording_url overwrite
    /// the transcript, source tag, hash, and fetch time.
    pub async fn upsert_transcript(&self, vt: &VideoTranscript) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO video_transcripts
                (group_id, recording_url, recording_date, duration_minutes, transcript, transcript_source, content_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(recording_url) DO UPDATE SET
                transcript = excluded.transcript,
                transcript_source = excluded.transcript_source,
                content_hash = excluded.content_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&vt.group_id)
        .bind(&vt.recording_url)
        .bind(vt.recording_date.timestamp())
        .bind(vt.duration_minutes)
        .bind(&vt.transcript)
        .bind(&vt.transcript_source)
        .bind(&vt.content_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transcripts for a group within the window, newest first.
    pub async fn get_transcripts(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VideoTranscript>> {
        let (lo, hi) = day_bounds(start, end);
        let rows = sqlx::query(
            r#"
            SELECT group_id, recording_url, recording_date, duration_minutes,
                   transcript, transcript_source, content_hash, fetched_at
            FROM video_transcripts
            WHERE group_id = ? AND recording_date >= ? AND recording_date <= ?
            ORDER BY recording_date DESC
            "#,
        )
        .bind(group_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VideoTranscript {
                group_id: row.get("group_id"),
                recording_url: row.get("recording_url"),
                recording_date: ts_to_utc(row.get("recording_date")),
                duration_minutes: row.get("duration_minutes"),
                transcript: row.get("transcript"),
                transcript_source: row.get("transcript_source"),
                content_hash: row.get("content_hash"),
                fetched_at: ts_to_utc(row.get("fetched_at")),
            })
            .collect())
    }

    /// Insert or update a chat message; conflicts on (channel_id, message_ts)
    /// overwrite the text, user name, and fetch time.
    pub async fn upsert_chat_message(&self, msg: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages
                (group_id, channel_id, message_ts, thread_ts, user_id, user_name, text, message_date, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id, message_ts) DO UPDATE SET
                text = excluded.text,
                user_name = excluded.user_name,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&msg.group_id)
        .bind(&msg.channel_id)
        .bind(&msg.message_ts)
        .bind(&msg.thread_ts)
        .bind(&msg.user_id)
        .bind(&msg.user_name)
        .bind(&msg.text)
        .bind(msg.message_date.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Chat messages for a group within the window, newest first.
    pub async fn get_chat_messages(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>> {
        let (lo, hi) = day_bounds(start, end);
        let rows = sqlx::query(
            r#"
            SELECT group_id, channel_id, message_ts, thread_ts, user_id, user_name,
                   text, message_date, fetched_at
            FROM chat_messages
            WHERE group_id = ? AND message_date >= ? AND message_date <= ?
            ORDER BY message_date DESC
            "#,
        )
        .bind(group_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatMessage {
                group_id: row.get("group_id"),
                channel_id: row.get("channel_id"),
                message_ts: row.get("message_ts"),
                thread_ts: row.get("thread_ts"),
                user_id: row.get("user_id"),
                user_name: row.get("user_name"),
                text: row.get("text"),
                message_date: ts_to_utc(row.get("message_date")),
                fetched_at: ts_to_utc(row.get("fetched_at")),
            })
            .collect())
    }

    /// Look up a memoized analysis result. A miss is `Ok(None)`, never an
    /// error.
    pub async fn get_cache(&self, cache_key: &str) -> Result<Option<AnalysisCacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT cache_key, group_id, stage, window_start, window_end,
                   prompt_hash, result, model, tokens_used, created_at
            FROM analysis_cache WHERE cache_key = ?
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let start_str: String = row.get("window_start");
        let end_str: String = row.get("window_end");
        Ok(Some(AnalysisCacheEntry {
            cache_key: row.get("cache_key"),
            group_id: row.get("group_id"),
            stage: row.get("stage"),
            window_start: NaiveDate::parse_from_str(&start_str, "%Y-%m-%d")
                .context("invalid window_start in cache")?,
            window_end: NaiveDate::parse_from_str(&end_str, "%Y-%m-%d")
                .context("invalid window_end in cache")?,
            prompt_hash: row.get("prompt_hash"),
            result: row.get("result"),
            model: row.get("model"),
            tokens_used: row.get("tokens_used"),
            created_at: ts_to_utc(row.get("created_at")),
        }))
    }

    /// Store an analysis result, upserting on cache_key.
    pub async fn put_cache(&self, entry: &AnalysisCacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_cache
                (cache_key, group_id, stage, window_start, window_end, prompt_hash, result, model, tokens_used, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                result = excluded.result,
                model = excluded.model,
                tokens_used = excluded.tokens_used,
                created_at = excluded.created_at
            "#,
        )
        .bind(&entry.cache_key)
        .bind(&entry.group_id)
        .bind(&entry.stage)
        .bind(entry.window_start.format("%Y-%m-%d").to_string())
        .bind(entry.window_end.format("%Y-%m-%d").to_string())
        .bind(&entry.prompt_hash)
        .bind(&entry.result)
        .bind(&entry.model)
        .bind(entry.tokens_used)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record an emitted report file.
    pub async fn insert_report(&self, report: &ReportRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reports (report_type, group_id, window_start, window_end, file_path, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.report_type)
        .bind(&report.group_id)
        .bind(&report.window_start)
        .bind(&report.window_end)
        .bind(&report.file_path)
        .bind(&report.content_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a fetch audit entry.
    pub async fn log_fetch(&self, entry: &FetchLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_log (source, group_id, url, status, error_message, duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.source)
        .bind(&entry.group_id)
        .bind(&entry.url)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.duration_ms)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Epoch-second bounds for `[start-of-day(start), end-of-day(end)]` in UTC.
fn day_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> (i64, i64) {
    let lo = Utc
        .from_utc_datetime(&start.date_naive().and_hms_opt(0, 0, 0).unwrap())
        .timestamp();
    let hi = Utc
        .from_utc_datetime(&end.date_naive().and_hms_opt(23, 59, 59).unwrap())
        .timestamp();
    (lo, hi)
}

fn ts_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
