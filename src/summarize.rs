//! Stage 1: per-source summaries.
//!
//! Each of the three sources (notes, video, chat) gets an independent
//! summary call. The stage input is assembled deterministically from the
//! windowed records, so the memoization key is stable across retries and
//! only changes when the underlying records change.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::analysis::{
    build_cache_key, hash_content, EmptyInput, SourceSummary, STAGE_CHAT, STAGE_NOTES, STAGE_VIDEO,
};
use crate::llm::{CompletionRequest, LlmClient};
use crate::store::{AnalysisCacheEntry, ChatMessage, MeetingNote, Store, VideoTranscript};

/// Produces per-source summaries with memoization.
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    store: Store,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, store: Store) -> Self {
        Self { llm, store }
    }

    /// Summarize the group's meeting notes for the window.
    pub async fn summarize_meeting_notes(
        &self,
        group_id: &str,
        group_name: &str,
        notes: &[MeetingNote],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SourceSummary> {
        if notes.is_empty() {
            return Err(EmptyInput {
                kind: "meeting notes to summarize",
                group_id: group_id.to_string(),
            }
            .into());
        }

        let content = build_notes_input(notes);
        let system_prompt = format!(
            "You are analyzing meeting notes for the {} working group.\n\
             Summarize the key discussions, decisions, and action items from the following\n\
             meeting notes dated between {} and {}.\n\
             Focus on: technical decisions, new features, breaking changes, deprecations,\n\
             integration changes, protocol and format changes, and anything affecting\n\
             downstream consumers of the group's work.",
            group_name,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        );

        self.run_stage(group_id, group_name, STAGE_NOTES, &system_prompt, &content, start, end)
            .await
            .context("LLM completion for meeting notes")
    }

    /// Summarize the group's recording transcripts for the window.
    pub async fn summarize_transcripts(
        &self,
        group_id: &str,
        group_name: &str,
        transcripts: &[VideoTranscript],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SourceSummary> {
        if transcripts.is_empty() {
            return Err(EmptyInput {
                kind: "video transcripts to summarize",
                group_id: group_id.to_string(),
            }
            .into());
        }

        let content = build_video_input(transcripts);
        let system_prompt = format!(
            "You are analyzing meeting transcripts of the {} working group.\n\
             Summarize the key technical discussions, noting any decisions made,\n\
             controversies, and planned work. Identify speakers and their positions\n\
             where possible.",
            group_name,
        );

        self.run_stage(group_id, group_name, STAGE_VIDEO, &system_prompt, &content, start, end)
            .await
            .context("LLM completion for video transcripts")
    }

    /// Summarize the group's chat-channel activity for the window.
    pub async fn summarize_chat(
        &self,
        group_id: &str,
        group_name: &str,
        messages: &[ChatMessage],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SourceSummary> {
        if messages.is_empty() {
            return Err(EmptyInput {
                kind: "chat messages to summarize",
                group_id: group_id.to_string(),
            }
            .into());
        }

        let content = build_chat_input(messages);
        let system_prompt = format!(
            "You are analyzing chat discussions from the {} working group's channel\n\
             between {} and {}.\n\
             Identify the most significant technical discussions, questions,\n\
             and announcements. Group by topic.",
            group_name,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        );

        self.run_stage(group_id, group_name, STAGE_CHAT, &system_prompt, &content, start, end)
            .await
            .context("LLM completion for chat messages")
    }

    /// Memoized stage execution shared by the three sources.
    async fn run_stage(
        &self,
        group_id: &str,
        group_name: &str,
        stage: &str,
        system_prompt: &str,
        content: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SourceSummary> {
        let cache_key = build_cache_key(group_id, stage, start, end, &hash_content(content));

        if let Some(cached) = self.store.get_cache(&cache_key).await? {
            return Ok(SourceSummary {
                group_id: group_id.to_string(),
                group_name: group_name.to_string(),
                source: stage.to_string(),
                summary: cached.result,
                model: cached.model,
                tokens_used: cached.tokens_used,
            });
        }

        let resp = self
            .llm
            .complete(&CompletionRequest {
                system_prompt: system_prompt.to_string(),
                user_prompt: content.to_string(),
                ..CompletionRequest::default()
            })
            .await?;

        // A failed cache write costs a repeat LLM call on the next run,
        // nothing more.
        if let Err(e) = self
            .store
            .put_cache(&AnalysisCacheEntry {
                cache_key,
                group_id: group_id.to_string(),
                stage: stage.to_string(),
                window_start: start.date_naive(),
                window_end: end.date_naive(),
                prompt_hash: hash_content(system_prompt),
                result: resp.content.clone(),
                model: resp.model.clone(),
                tokens_used: resp.tokens_used,
                created_at: Utc::now(),
            })
            .await
        {
            warn!(group = group_id, stage, "failed to write analysis cache: {e:#}");
        }

        Ok(SourceSummary {
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            source: stage.to_string(),
            summary: resp.content,
            model: resp.model,
            tokens_used: resp.tokens_used,
        })
    }
}

/// Assemble the notes-stage input: one dated section per meeting, blank
/// line separated, in the order given.
pub fn build_notes_input(notes: &[MeetingNote]) -> String {
    notes
        .iter()
        .map(|n| {
            format!(
                "--- Meeting Date: {} ---\n{}",
                n.meeting_date.format("%Y-%m-%d"),
                n.raw_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the video-stage input: one dated section per transcript.
pub fn build_video_input(transcripts: &[VideoTranscript]) -> String {
    transcripts
        .iter()
        .map(|t| {
            format!(
                "--- Recording Date: {} (Duration: {} min) ---\n{}",
                t.recording_date.format("%Y-%m-%d"),
                t.duration_minutes,
                t.transcript
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the chat-stage input: one line per message, thread replies
/// marked with a prefix.
pub fn build_chat_input(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let entry = format!(
                "[{}] {}: {}",
                m.message_date.format("%Y-%m-%d %H:%M"),
                m.user_name,
                m.text
            );
            if !m.thread_ts.is_empty() && m.thread_ts != m.message_ts {
                format!("  (thread reply) {}", entry)
            } else {
                entry
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn note(date: (i32, u32, u32), text: &str) -> MeetingNote {
        MeetingNote {
            group_id: "g1".to_string(),
            doc_id: "doc".to_string(),
            meeting_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            raw_text: text.to_string(),
            content_hash: String::new(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_notes_input_format() {
        let notes = vec![note((2026, 2, 18), "newer"), note((2026, 2, 11), "older")];
        let input = build_notes_input(&notes);
        assert_eq!(
            input,
            "--- Meeting Date: 2026-02-18 ---\nnewer\n\n--- Meeting Date: 2026-02-11 ---\nolder"
        );
    }

    #[test]
    fn test_notes_input_deterministic() {
        let notes = vec![note((2026, 2, 18), "a"), note((2026, 2, 11), "b")];
        assert_eq!(build_notes_input(&notes), build_notes_input(&notes));
    }

    #[test]
    fn test_video_input_format() {
        let transcripts = vec![VideoTranscript {
            group_id: "g1".to_string(),
            recording_url: "https://recordings.example/1".to_string(),
            recording_date: Utc.with_ymd_and_hms(2026, 2, 12, 17, 0, 0).unwrap(),
            duration_minutes: 55,
            transcript: "Alice: hi".to_string(),
            transcript_source: "share_page_vtt".to_string(),
            content_hash: String::new(),
            fetched_at: Utc::now(),
        }];
        assert_eq!(
            build_video_input(&transcripts),
            "--- Recording Date: 2026-02-12 (Duration: 55 min) ---\nAlice: hi"
        );
    }

    #[test]
    fn test_chat_input_marks_thread_replies() {
        let base = ChatMessage {
            group_id: "g1".to_string(),
            channel_id: "C1".to_string(),
            message_ts: "1770000000.000100".to_string(),
            thread_ts: String::new(),
            user_id: "U1".to_string(),
            user_name: "alice".to_string(),
            text: "top level".to_string(),
            message_date: Utc.with_ymd_and_hms(2026, 2, 12, 9, 30, 0).unwrap(),
            fetched_at: Utc::now(),
        };
        let mut reply = base.clone();
        reply.message_ts = "1770000001.000200".to_string();
        reply.thread_ts = "1770000000.000100".to_string();
        reply.text = "in thread".to_string();

        let input = build_chat_input(&[base, reply]);
        let lines: Vec<&str> = input.lines().collect();
        assert_eq!(lines[0], "[2026-02-12 09:30] alice: top level");
        assert!(lines[1].starts_with("  (thread reply) "));
        assert!(lines[1].contains("in thread"));
    }
}
