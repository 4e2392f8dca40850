//! Stage 2: cross-source synthesis.
//!
//! Merges whatever per-source summaries stage 1 produced into one unified
//! report per group, deduplicating topics that surfaced in more than one
//! source. Memoized like every other stage.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::analysis::{
    build_cache_key, hash_content, EmptyInput, SourceSummary, SynthesisResult, STAGE_SYNTHESIS,
};
use crate::llm::{CompletionRequest, LlmClient};
use crate::store::{AnalysisCacheEntry, Store};

/// Produces the cross-source synthesis with memoization.
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    store: Store,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, store: Store) -> Self {
        Self { llm, store }
    }

    /// Merge the per-source summaries into one report for the group.
    pub async fn synthesize(
        &self,
        group_id: &str,
        group_name: &str,
        summaries: &[SourceSummary],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SynthesisResult> {
        if summaries.is_empty() {
            return Err(EmptyInput {
                kind: "summaries to synthesize",
                group_id: group_id.to_string(),
            }
            .into());
        }

        let content = build_synthesis_input(summaries);
        let cache_key = build_cache_key(group_id, STAGE_SYNTHESIS, start, end, &hash_content(&content));

        if let Some(cached) = self.store.get_cache(&cache_key).await? {
            return Ok(SynthesisResult {
                group_id: group_id.to_string(),
                group_name: group_name.to_string(),
                synthesis: cached.result,
                model: cached.model,
                tokens_used: cached.tokens_used,
            });
        }

        let system_prompt = format!(
            "Given the following summaries from meeting notes, video recordings,\n\
             and chat discussions for the {} working group, produce a unified report.\n\
             Deduplicate topics discussed across sources. Flag items where different\n\
             sources provide complementary information.",
            group_name,
        );

        let resp = self
            .llm
            .complete(&CompletionRequest {
                system_prompt: system_prompt.clone(),
                user_prompt: content,
                ..CompletionRequest::default()
            })
            .await
            .context("LLM completion for synthesis")?;

        if let Err(e) = self
            .store
            .put_cache(&AnalysisCacheEntry {
                cache_key,
                group_id: group_id.to_string(),
                stage: STAGE_SYNTHESIS.to_string(),
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

        Ok(SynthesisResult {
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            synthesis: resp.content,
            model: resp.model,
            tokens_used: resp.tokens_used,
        })
    }
}

/// Join non-empty summaries into the stage input, tagged by source.
pub fn build_synthesis_input(summaries: &[SourceSummary]) -> String {
    summaries
        .iter()
        .map(|s| format!("=== Source: {} ===\n{}", s.source, s.summary))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_input_tags_sources_in_order() {
        let summaries = vec![
            SourceSummary {
                group_id: "g1".to_string(),
                group_name: "G1".to_string(),
                source: "notes".to_string(),
                summary: "notes summary".to_string(),
                model: "m".to_string(),
                tokens_used: 1,
            },
            SourceSummary {
                group_id: "g1".to_string(),
                group_name: "G1".to_string(),
                source: "chat".to_string(),
                summary: "chat summary".to_string(),
                model: "m".to_string(),
                tokens_used: 1,
            },
        ];
        assert_eq!(
            build_synthesis_input(&summaries),
            "=== Source: notes ===\nnotes summary\n\n=== Source: chat ===\nchat summary"
        );
    }
}
