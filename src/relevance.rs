//! Stage 3: priority scoring.
//!
//! Asks the LLM to re-cast the synthesis as exactly three leveled sections
//! (HIGH / MEDIUM / LOW relevance) of flat bullets, then parses the items
//! back out. The system prompt pins the output shape hard — three fixed
//! headers, bullets only, a literal sentinel for empty sections — and the
//! parser stays tolerant of what comes back anyway.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::analysis::{
    build_cache_key, hash_content, EmptyInput, RelevanceReport, SynthesisResult, STAGE_RELEVANCE,
};
use crate::llm::{CompletionRequest, LlmClient};
use crate::store::{AnalysisCacheEntry, Store};

/// Keyword reference handed to the model for classification. Organization
/// specifics belong in the custom-context file, not here.
const RELEVANCE_KEYWORDS: &str = "\
## High Relevance Keywords
These topics have direct impact on the telemetry pipeline and its clients:
- wire protocol changes (OTLP, HTTP and gRPC transports)
- trace context, propagation, baggage
- sampling (head and tail)
- exporters and vendor integration points
- semantic conventions (all signals)
- resource detection, resource attributes
- metrics SDK, delta vs cumulative temporality
- log bridge, log SDK
- collector pipeline, processors, receivers, exporters
- profiling signal, profile data model
- agent management (OpAMP)
- instrumentation libraries
- configuration file format

## Medium Relevance Keywords
These topics are relevant but less directly impactful:
- SDK lifecycle, provider, tracer, meter, logger
- batch processing, export retry
- gRPC and HTTP instrumentation
- Kubernetes operator, auto-instrumentation
- eBPF instrumentation
- Prometheus compatibility, remote write
";

/// Scores syntheses for organizational relevance, with memoization.
pub struct RelevanceScorer {
    llm: Arc<dyn LlmClient>,
    store: Store,
    custom_context: String,
}

impl RelevanceScorer {
    /// `custom_context` is appended to the system prompt when non-empty; it
    /// is loaded once from the configured context file.
    pub fn new(llm: Arc<dyn LlmClient>, store: Store, custom_context: String) -> Self {
        Self {
            llm,
            store,
            custom_context,
        }
    }

    /// Produce the priority-scored report for a group's synthesis.
    pub async fn score(
        &self,
        group_id: &str,
        group_name: &str,
        synthesis: &SynthesisResult,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RelevanceReport> {
        if synthesis.synthesis.is_empty() {
            return Err(EmptyInput {
                kind: "synthesis to score",
                group_id: group_id.to_string(),
            }
            .into());
        }

        let cache_key = build_cache_key(
            group_id,
            STAGE_RELEVANCE,
            start,
            end,
            &hash_content(&synthesis.synthesis),
        );

        if let Some(cached) = self.store.get_cache(&cache_key).await? {
            let (high, medium, low) = parse_priority_sections(&cached.result);
            return Ok(RelevanceReport {
                group_id: group_id.to_string(),
                group_name: group_name.to_string(),
                report: cached.result,
                high_items: high,
                medium_items: medium,
                low_items: low,
                model: cached.model,
                tokens_used: cached.tokens_used,
            });
        }

        let system_prompt = build_scoring_prompt(&self.custom_context);
        let user_prompt = format!(
            "Produce a relevance report for the {} working group based on the following \
             synthesis covering {} to {}:\n\n{}",
            group_name,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            synthesis.synthesis,
        );

        let resp = self
            .llm
            .complete(&CompletionRequest {
                system_prompt: system_prompt.clone(),
                user_prompt,
                ..CompletionRequest::default()
            })
            .await
            .context("LLM completion for relevance scoring")?;

        if let Err(e) = self
            .store
            .put_cache(&AnalysisCacheEntry {
                cache_key,
                group_id: group_id.to_string(),
                stage: STAGE_RELEVANCE.to_string(),
                window_start: start.date_naive(),
                window_end: end.date_naive(),
                prompt_hash: hash_content(&system_prompt),
                result: resp.content.clone(),
                model: resp.model.clone(),
                tokens_used: resp.tokens_used,
                created_at: Utc::now(),
            })
            .await
        {
            warn!(group = group_id, "failed to write analysis cache: {e:#}");
        }

        let (high, medium, low) = parse_priority_sections(&resp.content);
        Ok(RelevanceReport {
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            report: resp.content,
            high_items: high,
            medium_items: medium,
            low_items: low,
            model: resp.model,
            tokens_used: resp.tokens_used,
        })
    }
}

/// Build the scoring system prompt, appending the user's custom context
/// when present.
pub fn build_scoring_prompt(custom_context: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are producing a concise intelligence brief for engineering leaders.\n\
         Score each topic's relevance (HIGH/MEDIUM/LOW) based on:\n\
         - Direct impact on the telemetry ingest pipeline\n\
         - Changes to trace/metric/log formats or semantic conventions\n\
         - New instrumentation that downstream products should support\n\
         - Collector changes affecting exporters\n\
         - SDK changes affecting tracing libraries\n\
         - Changes to sampling, context propagation, or resource detection\n\
         - Agent management developments\n\
         - Profiling signal developments\n\n",
    );

    prompt.push_str("Use the following keyword reference for relevance classification:\n\n");
    prompt.push_str(RELEVANCE_KEYWORDS);

    prompt.push_str(
        "\n\nFormat your response with clear markdown sections:\n\
         #### HIGH Relevance\n\
         Each bullet: `- **Topic Name** — one-sentence what + why. Action clause if needed.`\n\
         If no items, write: `None this period.`\n\n\
         #### MEDIUM Relevance\n\
         Each bullet: `- **Topic Name** — one-sentence what + why.`\n\
         If no items, write: `None this period.`\n\n\
         #### LOW Relevance\n\
         Each bullet: `- **Topic Name** — one-sentence what + why.`\n\
         If no items, write: `None this period.`\n\n",
    );

    prompt.push_str(
        "Do NOT include any of the following in your response: \
         \"Overall Assessment\", \"Analysis Summary\", \"Note\", \"Recommendation\", \
         \"Executive Summary\", or prose paragraphs outside the bullet lists. \
         Only output the three sections above with their bullet items.\n",
    );

    if !custom_context.is_empty() {
        prompt.push_str("\n\n## Additional Context from User\n");
        prompt.push_str(custom_context);
    }

    prompt
}

/// Extract the HIGH, MEDIUM, and LOW bullet items from scored output.
///
/// A trimmed line starting with `#` or `**` whose upper-cased form contains
/// HIGH/MEDIUM/LOW switches the active section. While a section is active,
/// `- ` and `* ` bullets contribute their bodies in order; everything else
/// (including the "None this period." sentinel) is ignored.
pub fn parse_priority_sections(content: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Section {
        None,
        High,
        Medium,
        Low,
    }

    let mut current = Section::None;
    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_uppercase();
        let is_header = trimmed.starts_with('#') || trimmed.starts_with("**");

        if is_header && upper.contains("HIGH") {
            current = Section::High;
            continue;
        }
        if is_header && upper.contains("MEDIUM") {
            current = Section::Medium;
            continue;
        }
        if is_header && upper.contains("LOW") {
            current = Section::Low;
            continue;
        }

        if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
            let item = trimmed[2..].trim();
            if item.is_empty() {
                continue;
            }
            match current {
                Section::High => high.push(item.to_string()),
                Section::Medium => medium.push(item.to_string()),
                Section::Low => low.push(item.to_string()),
                Section::None => {}
            }
        }
    }

    (high, medium, low)
}
