//! Recording-transcript adapter.
//!
//! For each recording in the index, the share page is loaded in a headless
//! browser, the transcript URL is read out of the page app's runtime state,
//! and the time-coded transcript file is downloaded and flattened into
//! plain dialog text with speaker names.
//!
//! Auto-generated transcripts repeat themselves: a cue frequently restates
//! the previous cue with more words as the recognizer extends the segment.
//! The parser collapses those continuations, keeping the longest form.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::hash_content;
use crate::browser::BrowserPool;
use crate::recordings::Recording;
use crate::store::{FetchLogEntry, FetchStatus, Store, VideoTranscript};

/// Recordings shorter than this are empty or cancelled meetings; they never
/// have a transcript worth fetching.
const MIN_RECORDING_MINUTES: i64 = 2;

/// Settling delay after navigation for the share-page app to populate its
/// state.
const PAGE_LOAD_DELAY: Duration = Duration::from_secs(5);

/// Overall budget for one share-page extraction.
const BROWSER_TIMEOUT: Duration = Duration::from_secs(90);

/// Reads the mounted app's store and reports whether a transcript exists.
const EXTRACT_SCRIPT: &str = r#"
    (function() {
        try {
            var app = document.querySelector('#app');
            if (!app || !app.__vue__ || !app.__vue__.$store) {
                return JSON.stringify({error: "app store not found"});
            }
            var state = app.__vue__.$store.state;
            return JSON.stringify({
                hasTranscript: !!state.hasTranscript,
                transcriptUrl: state.transcriptUrl || "",
                topic: state.topic || "",
                duration: state.duration || 0
            });
        } catch (e) {
            return JSON.stringify({error: e.message});
        }
    })()
"#;

#[derive(Debug, Deserialize)]
struct PageState {
    #[serde(default)]
    error: String,
    #[serde(default, rename = "hasTranscript")]
    has_transcript: bool,
    #[serde(default, rename = "transcriptUrl")]
    transcript_url: String,
}

/// Extracts and stores transcripts for recordings.
pub struct TranscriptFetcher {
    store: Store,
    pool: BrowserPool,
    http: reqwest::Client,
    transcript_base: String,
    delay_between: Duration,
}

impl TranscriptFetcher {
    pub fn new(store: Store, transcript_base: &str) -> Result<Self> {
        let mut pool = BrowserPool::new(true);
        pool.set_timeout(BROWSER_TIMEOUT);
        Ok(Self {
            store,
            pool,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            transcript_base: transcript_base.trim_end_matches('/').to_string(),
            delay_between: Duration::from_secs(2),
        })
    }

    /// Override the politeness delay between consecutive share-page loads.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay_between = delay;
    }

    /// Extract, parse, and store the transcript for one recording.
    pub async fn fetch_transcript(
        &self,
        recording: &Recording,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if recording.url.is_empty() {
            bail!("recording has no share URL");
        }

        let fetch_start = std::time::Instant::now();

        if recording.duration_minutes > 0 && recording.duration_minutes < MIN_RECORDING_MINUTES {
            info!(
                group = %recording.group_id,
                minutes = recording.duration_minutes,
                "transcripts: skipping short recording"
            );
            self.log_fetch(recording, FetchStatus::Skipped, "recording too short", fetch_start)
                .await;
            return Ok(());
        }

        let state = match self.extract_page_state(&recording.url).await {
            Ok(state) => state,
            Err(e) => {
                self.log_fetch(recording, FetchStatus::Error, &format!("{e:#}"), fetch_start)
                    .await;
                return Err(e.context("extracting transcript URL"));
            }
        };

        if !state.has_transcript || state.transcript_url.is_empty() {
            info!(group = %recording.group_id, url = %recording.url, "transcripts: none available");
            self.log_fetch(recording, FetchStatus::Skipped, "no transcript available", fetch_start)
                .await;
            return Ok(());
        }

        let full_url = if state.transcript_url.starts_with("http") {
            state.transcript_url.clone()
        } else {
            format!("{}{}", self.transcript_base, state.transcript_url)
        };

        let raw = match self.download_transcript(&full_url).await {
            Ok(raw) => raw,
            Err(e) => {
                self.log_fetch(recording, FetchStatus::Error, &format!("{e:#}"), fetch_start)
                    .await;
                return Err(e);
            }
        };

        let transcript = parse_vtt(&raw);
        if transcript.is_empty() {
            info!(group = %recording.group_id, "transcripts: empty after parsing");
            self.log_fetch(recording, FetchStatus::Skipped, "empty transcript after parsing", fetch_start)
                .await;
            return Ok(());
        }

        let record = VideoTranscript {
            group_id: recording.group_id.clone(),
            recording_url: recording.url.clone(),
            recording_date: recording.start_time,
            duration_minutes: recording.duration_minutes,
            content_hash: hash_content(&transcript),
            transcript,
            transcript_source: "share_page_vtt".to_string(),
            fetched_at: Utc::now(),
        };

        if let Err(e) = self.store.upsert_transcript(&record).await {
            self.log_fetch(recording, FetchStatus::Error, &format!("{e:#}"), fetch_start)
                .await;
            return Err(e.context("storing transcript"));
        }

        self.log_fetch(recording, FetchStatus::Success, "", fetch_start)
            .await;
        info!(
            group = %recording.group_id,
            chars = record.transcript.len(),
            "transcripts: stored"
        );

        // Politeness delay between share-page loads.
        if !self.delay_between.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => bail!("cancelled"),
                _ = tokio::time::sleep(self.delay_between) => {}
            }
        }

        Ok(())
    }

    /// Load the share page and read the app state out of it.
    async fn extract_page_state(&self, share_url: &str) -> Result<PageState> {
        let session = self.pool.session().await?;

        let result = tokio::time::timeout(session.timeout(), async {
            let page = session.new_page().await?;
            page.goto(share_url).await.context("navigating to share page")?;
            tokio::time::sleep(PAGE_LOAD_DELAY).await;
            let value: String = page
                .evaluate(EXTRACT_SCRIPT)
                .await
                .context("evaluating page state script")?
                .into_value()
                .context("decoding page state result")?;
            Ok::<String, anyhow::Error>(value)
        })
        .await;

        session.close().await;

        let raw = match result {
            Ok(inner) => inner?,
            Err(_) => bail!("share page extraction timed out"),
        };

        let state: PageState =
            serde_json::from_str(&raw).context("parsing page state JSON")?;
        if !state.error.is_empty() {
            bail!("page state extraction failed: {}", state.error);
        }
        Ok(state)
    }

    async fn download_transcript(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("downloading transcript")?;
        if !resp.status().is_success() {
            bail!("transcript download returned HTTP {}", resp.status().as_u16());
        }
        resp.text().await.context("reading transcript body")
    }

    async fn log_fetch(
        &self,
        recording: &Recording,
        status: FetchStatus,
        error: &str,
        started: std::time::Instant,
    ) {
        let _ = self
            .store
            .log_fetch(&FetchLogEntry {
                source: "video_transcript".to_string(),
                group_id: recording.group_id.clone(),
                url: recording.url.clone(),
                status,
                error_message: error.to_string(),
                duration_ms: started.elapsed().as_millis() as i64,
            })
            .await;
    }
}

static CUE_TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2}:\d{2}:\d{2}\.\d{3}\s+-->\s+\d{2}:\d{2}:\d{2}\.\d{3}$").unwrap()
});

static CUE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Flatten a WebVTT transcript into plain dialog lines.
///
/// Drops the magic header, cue numbers, timestamp lines, and NOTE/STYLE
/// blocks. A dialog line with `": "` in its first 50 characters is treated
/// as "Speaker: body". Consecutive cues from the same speaker where the new
/// body starts with the previous one replace it (the recognizer emits
/// growing prefixes of the same sentence); byte-identical repeats are
/// dropped.
pub fn parse_vtt(content: &str) -> String {
    let mut dialog: Vec<String> = Vec::new();
    let mut last_speaker = String::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed == "WEBVTT" {
            continue;
        }
        if CUE_NUMBER_RE.is_match(trimmed) || CUE_TIMESTAMP_RE.is_match(trimmed) {
            continue;
        }
        if trimmed.starts_with("NOTE") || trimmed.starts_with("STYLE") {
            continue;
        }

        let (speaker, body) = split_speaker(trimmed);

        let mut replace_prev = false;
        let mut drop_line = false;
        if let Some(prev) = dialog.last() {
            if !speaker.is_empty() && last_speaker == speaker {
                let (_, prev_body) = split_speaker(prev);
                replace_prev = body.starts_with(prev_body) || body == prev_body;
            }
            drop_line = !replace_prev && trimmed == prev;
        }

        if replace_prev {
            if let Some(last) = dialog.last_mut() {
                *last = trimmed.to_string();
            }
            continue;
        }
        if drop_line {
            continue;
        }

        last_speaker = speaker.to_string();
        dialog.push(trimmed.to_string());
    }

    dialog.join("\n")
}

/// Split "Speaker: body" when the separator appears within the first 50
/// characters; otherwise the whole line is body with no speaker.
fn split_speaker(line: &str) -> (&str, &str) {
    match line.find(": ") {
        Some(idx) if idx > 0 && idx < 50 => (&line[..idx], &line[idx + 2..]),
        _ => ("", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vtt_strips_cue_machinery() {
        let vtt = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:03.000\nAlice Chen: Welcome everyone.\n\n2\n00:00:04.000 --> 00:00:06.000\nBob Park: Thanks Alice.\n";
        let out = parse_vtt(vtt);
        assert_eq!(out, "Alice Chen: Welcome everyone.\nBob Park: Thanks Alice.");
    }

    #[test]
    fn test_parse_vtt_collapses_growing_continuations() {
        let vtt = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nSpeaker A: Hello\n\n2\n00:00:02.000 --> 00:00:04.000\nSpeaker A: Hello everyone\n\n3\n00:00:05.000 --> 00:00:07.000\nSpeaker B: Thanks for joining\n";
        let out = parse_vtt(vtt);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Speaker A: Hello everyone");
        assert_eq!(lines[1], "Speaker B: Thanks for joining");
    }

    #[test]
    fn test_parse_vtt_drops_exact_duplicates() {
        let vtt = "WEBVTT\n1\n00:00:01.000 --> 00:00:02.000\nSpeaker A: Same line\n2\n00:00:02.000 --> 00:00:03.000\nSpeaker A: Same line\n";
        assert_eq!(parse_vtt(vtt), "Speaker A: Same line");
    }

    #[test]
    fn test_parse_vtt_keeps_distinct_lines_from_same_speaker() {
        let vtt = "Speaker A: First point\nSpeaker A: Second point\n";
        let out = parse_vtt(vtt);
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_parse_vtt_skips_note_and_style_blocks() {
        let vtt = "WEBVTT\nNOTE this is a comment\nSTYLE\nSpeaker A: Actual dialog\n";
        assert_eq!(parse_vtt(vtt), "Speaker A: Actual dialog");
    }

    #[test]
    fn test_parse_vtt_empty_input() {
        assert_eq!(parse_vtt("WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\n"), "");
    }

    #[test]
    fn test_split_speaker_limit() {
        let long = format!("{}: body", "x".repeat(60));
        let (speaker, body) = split_speaker(&long);
        assert_eq!(speaker, "");
        assert_eq!(body, long);
    }
}
