//! Shared analysis types and memoization helpers.
//!
//! The analysis chain runs three stages per group — per-source summaries,
//! a cross-source synthesis, and a priority score — and every stage is
//! memoized in the store under a deterministic cache key:
//!
//! ```text
//! cache_key = sha256(group_id | stage | window_start | window_end | sha256(input))
//! ```
//!
//! Re-running a window with unchanged inputs therefore reuses every cached
//! stage; changing any record changes the input hash and forces a fresh
//! LLM call for the affected stages only.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Stage tag for meeting-notes summaries.
pub const STAGE_NOTES: &str = "notes";
/// Stage tag for recording-transcript summaries.
pub const STAGE_VIDEO: &str = "video";
/// Stage tag for chat summaries.
pub const STAGE_CHAT: &str = "chat";
/// Stage tag for the cross-source synthesis.
pub const STAGE_SYNTHESIS: &str = "synthesis";
/// Stage tag for the priority score.
pub const STAGE_RELEVANCE: &str = "relevance";

/// Raised when a stage has nothing to work on. The orchestrator treats
/// this as "mark the source missing and move on", never as a failure.
#[derive(Debug, Error)]
#[error("no {kind} for group {group_id}")]
pub struct EmptyInput {
    /// E.g. "meeting notes to summarize" or "summaries to synthesize".
    pub kind: &'static str,
    pub group_id: String,
}

/// A per-source summary produced by stage 1.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub group_id: String,
    pub group_name: String,
    /// One of [`STAGE_NOTES`], [`STAGE_VIDEO`], [`STAGE_CHAT`].
    pub source: String,
    pub summary: String,
    pub model: String,
    pub tokens_used: i64,
}

/// The unified cross-source report produced by stage 2.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub group_id: String,
    pub group_name: String,
    pub synthesis: String,
    pub model: String,
    pub tokens_used: i64,
}

/// The priority-scored report produced by stage 3, with the leveled items
/// parsed out of the full text.
#[derive(Debug, Clone)]
pub struct RelevanceReport {
    pub group_id: String,
    pub group_name: String,
    pub report: String,
    pub high_items: Vec<String>,
    pub medium_items: Vec<String>,
    pub low_items: Vec<String>,
    pub model: String,
    pub tokens_used: i64,
}

impl RelevanceReport {
    /// Total item count across all levels.
    pub fn total_items(&self) -> usize {
        self.high_items.len() + self.medium_items.len() + self.low_items.len()
    }
}

/// The combined per-group result consumed by the report emitter.
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub group_id: String,
    pub group_name: String,
    pub category: String,
    pub window_start: String,
    pub window_end: String,
    /// Sources that produced a summary.
    pub sources_used: Vec<String>,
    /// Sources that were empty or failed.
    pub sources_missing: Vec<String>,
    pub relevance: Option<RelevanceReport>,
    pub notes_link: String,
    pub recording_link: String,
    pub channel_name: String,
}

/// Resource usage for an analyze run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total_tokens_used: i64,
    pub total_llm_calls: i64,
    pub model: String,
    pub provider: String,
    pub groups_processed: usize,
    pub groups_with_data: usize,
    pub duration_seconds: f64,
    pub estimated_cost_usd: f64,
}

/// The aggregated per-window digest across all groups in scope.
#[derive(Debug, Clone, Default)]
pub struct DigestReport {
    pub window_start: String,
    pub window_end: String,
    pub group_reports: Vec<GroupReport>,
    pub cross_group_themes: String,
    pub stats: RunStats,
}

/// Hex-encoded SHA-256 of a string.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the deterministic cache key for one memoized stage.
pub fn build_cache_key(
    group_id: &str,
    stage: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    content_hash: &str,
) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}",
        group_id,
        stage,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        content_hash,
    );
    hash_content(&raw)
}
