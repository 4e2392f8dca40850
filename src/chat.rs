//! Chat-channel history adapter.
//!
//! Pages a group's channel history through a `conversations.history`-style
//! web API, pulls thread replies for every parent with replies, and upserts
//! each message. All calls share one token-bucket limiter tuned to the
//! service's ~50 requests/minute tier.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ratelimit::RateLimiter;
use crate::store::{ChatMessage, FetchLogEntry, FetchStatus, Group, Store};

/// Messages per history/replies page.
const PAGE_SIZE: usize = 200;

/// ~50 requests/minute.
const REQUEST_INTERVAL: Duration = Duration::from_millis(1200);

/// Fetches channel history and threads for working groups.
pub struct ChatFetcher {
    store: Store,
    token: String,
    cookie: String,
    http: reqwest::Client,
    api_base: String,
    limiter: RateLimiter,
}

/// Generic API response envelope; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    messages: Vec<ApiMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    text: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: String,
    #[serde(default)]
    reply_count: i64,
    #[serde(default)]
    username: String,
}

impl ChatFetcher {
    pub fn new(store: Store, api_base: &str, token: &str, cookie: &str) -> Result<Self> {
        Ok(Self {
            store,
            token: token.to_string(),
            cookie: cookie.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(REQUEST_INTERVAL),
        })
    }

    /// Fetch all messages and thread replies for the group's channel within
    /// `[start, end]` and upsert them.
    pub async fn fetch_messages(
        &self,
        group: &Group,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if group.channel_id.is_empty() {
            bail!("group {:?} has no channel id", group.id);
        }

        let fetch_start = std::time::Instant::now();
        let channel_id = group.channel_id.as_str();

        // The API keys pagination on epoch-second timestamps with a
        // microsecond fraction.
        let oldest = format!("{}.000000", start.timestamp());
        let latest = format!("{}.000000", end.timestamp());

        let mut all_messages: Vec<ApiMessage> = Vec::new();
        let mut cursor = String::new();
        let mut page = 0;

        loop {
            page += 1;
            self.limiter.wait(cancel).await?;

            let (messages, next_cursor) = match self
                .fetch_history_page(channel_id, &oldest, &latest, &cursor)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    self.log_fetch(&group.id, channel_id, FetchStatus::Error, &format!("{e:#}"), fetch_start)
                        .await;
                    return Err(e.context(format!("fetching history page {}", page)));
                }
            };

            debug!(group = %group.id, page, count = messages.len(), "chat: fetched page");
            all_messages.extend(messages);

            if next_cursor.is_empty() {
                break;
            }
            cursor = next_cursor;
        }

        let threads_to_fetch = all_messages
            .iter()
            .filter(|m| m.reply_count > 0 && m.thread_ts.is_empty())
            .count();
        info!(
            group = %group.id,
            messages = all_messages.len(),
            threads = threads_to_fetch,
            "chat: history collected"
        );

        let mut stored = 0;
        for msg in &all_messages {
            if let Err(e) = self.store_message(group, channel_id, msg).await {
                warn!(group = %group.id, ts = %msg.ts, "chat: failed to store message: {e:#}");
                continue;
            }
            stored += 1;

            if msg.reply_count > 0 && msg.thread_ts.is_empty() {
                if let Err(e) = self
                    .fetch_and_store_thread(group, channel_id, &msg.ts, cancel)
                    .await
                {
                    warn!(group = %group.id, ts = %msg.ts, "chat: failed to fetch thread: {e:#}");
                }
            }
        }

        self.log_fetch(&group.id, channel_id, FetchStatus::Success, "", fetch_start)
            .await;
        info!(group = %group.id, stored, "chat: stored messages");
        Ok(())
    }

    /// Fetch a single page of channel history; returns the messages and the
    /// next cursor (empty when exhausted).
    async fn fetch_history_page(
        &self,
        channel_id: &str,
        oldest: &str,
        latest: &str,
        cursor: &str,
    ) -> Result<(Vec<ApiMessage>, String)> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("oldest", oldest.to_string()),
            ("latest", latest.to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }

        let resp: ApiResponse = self.api_call("conversations.history", &params).await?;
        if !resp.ok {
            bail!("chat API error: {}", resp.error);
        }

        let next_cursor = if resp.has_more {
            resp.response_metadata.next_cursor
        } else {
            String::new()
        };

        Ok((resp.messages, next_cursor))
    }

    /// Fetch a thread's replies and upsert them with the parent's timestamp.
    async fn fetch_and_store_thread(
        &self,
        group: &Group,
        channel_id: &str,
        thread_ts: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.limiter.wait(cancel).await?;

        let params = vec![
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];

        let resp: ApiResponse = self.api_call("conversations.replies", &params).await?;
        if !resp.ok {
            bail!("chat API error: {}", resp.error);
        }

        for msg in &resp.messages {
            // The parent message is echoed in its own thread; it is already
            // stored as a top-level message.
            if msg.ts == thread_ts && msg.thread_ts.is_empty() {
                continue;
            }

            let mut reply = msg.clone();
            reply.thread_ts = thread_ts.to_string();
            if let Err(e) = self.store_message(group, channel_id, &reply).await {
                warn!(group = %group.id, ts = %reply.ts, "chat: failed to store reply: {e:#}");
            }
        }

        Ok(())
    }

    async fn store_message(&self, group: &Group, channel_id: &str, msg: &ApiMessage) -> Result<()> {
        let message_date =
            parse_chat_ts(&msg.ts).context("parsing message timestamp")?;

        let user_name = if msg.username.is_empty() {
            msg.user.clone()
        } else {
            msg.username.clone()
        };

        // A parent echoed with thread_ts equal to its own ts is still a
        // top-level message.
        let thread_ts = if msg.thread_ts == msg.ts {
            String::new()
        } else {
            msg.thread_ts.clone()
        };

        self.store
            .upsert_chat_message(&ChatMessage {
                group_id: group.id.clone(),
                channel_id: channel_id.to_string(),
                message_ts: msg.ts.clone(),
                thread_ts,
                user_id: msg.user.clone(),
                user_name,
                text: msg.text.clone(),
                message_date,
                fetched_at: Utc::now(),
            })
            .await
    }

    /// GET an API method with bearer-token and cookie auth.
    async fn api_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base, method);

        let mut req = self
            .http
            .get(&url)
            .query(params)
            .header("Authorization", format!("Bearer {}", self.token));
        if !self.cookie.is_empty() {
            req = req.header("Cookie", format!("d={}", self.cookie));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("API call {}", method))?;

        if !resp.status().is_success() {
            bail!("API call {} returned HTTP {}", method, resp.status().as_u16());
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("parsing {} response", method))
    }

    async fn log_fetch(
        &self,
        group_id: &str,
        channel_id: &str,
        status: FetchStatus,
        error: &str,
        started: std::time::Instant,
    ) {
        let _ = self
            .store
            .log_fetch(&FetchLogEntry {
                source: "chat".to_string(),
                group_id: group_id.to_string(),
                url: format!("chat://channel/{}", channel_id),
                status,
                error_message: error.to_string(),
                duration_ms: started.elapsed().as_millis() as i64,
            })
            .await;
    }
}

/// Convert a source-native timestamp like `1706123456.789012` into an
/// instant. The integer part is Unix seconds; the fraction is microseconds.
pub fn parse_chat_ts(ts: &str) -> Result<DateTime<Utc>> {
    let (secs_str, frac_str) = match ts.split_once('.') {
        Some((s, f)) => (s, f),
        None => (ts, ""),
    };
    if secs_str.is_empty() {
        bail!("invalid chat timestamp: {:?}", ts);
    }

    let secs: i64 = secs_str
        .parse()
        .with_context(|| format!("invalid chat timestamp: {:?}", ts))?;
    let micros: i64 = if frac_str.is_empty() {
        0
    } else {
        frac_str.parse().unwrap_or(0)
    };

    match Utc.timestamp_opt(secs, (micros * 1000) as u32) {
        chrono::offset::LocalResult::Single(dt) => Ok(dt),
        _ => bail!("chat timestamp out of range: {:?}", ts),
    }
}
