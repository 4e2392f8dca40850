//! Pipeline orchestration.
//!
//! Two independently callable phases over a shared store:
//!
//! 1. **Fetch** — refresh the group catalog, then pull every in-scope
//!    group's sources (notes, transcripts, chat) through a bounded worker
//!    pool. Each adapter failure is a warning: it marks the source missing
//!    for that group and nothing else.
//! 2. **Analyze** — run the three-stage analysis chain per group over the
//!    cached records, collect per-group reports over a channel, compute run
//!    stats, and emit the digest.
//!
//! Cancellation propagates through a token: in-flight sleeps and rate
//! waits abort promptly, and the pool stops scheduling new work. Only
//! store-open/migration failures, a panicked worker, and a failed digest
//! write are fatal.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{DigestReport, EmptyInput, GroupReport, RunStats, SourceSummary};
use crate::catalog::{self, CatalogFetcher};
use crate::chat::ChatFetcher;
use crate::chat_auth;
use crate::config::{parse_lookback, Config};
use crate::context::load_custom_context;
use crate::llm::{create_client, LlmClient};
use crate::notes::NotesFetcher;
use crate::recordings::{Recording, RecordingIndexFetcher};
use crate::relevance::RelevanceScorer;
use crate::report::{JsonGenerator, MarkdownGenerator};
use crate::store::{Group, ReportRecord, Store};
use crate::summarize::Summarizer;
use crate::synthesize::Synthesizer;
use crate::transcripts::TranscriptFetcher;

/// USD per million tokens used for the coarse cost estimate.
const COST_PER_MILLION_TOKENS: f64 = 3.0;

/// Orchestrates fetch and analyze phases. Cheap to clone into worker tasks.
pub struct Pipeline {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

struct Inner {
    config: Config,
    lookback: ChronoDuration,
    store: Store,
    catalog: CatalogFetcher,
    notes: NotesFetcher,
    recordings: RecordingIndexFetcher,
    transcripts: TranscriptFetcher,
    chat: Option<ChatFetcher>,
    summarizer: Summarizer,
    synthesizer: Synthesizer,
    scorer: RelevanceScorer,
    markdown: MarkdownGenerator,
    json: JsonGenerator,
    /// Adapter failures observed during fetch; a nonzero count with a
    /// written digest maps to the partial-failure exit code.
    failures: AtomicUsize,
    /// Tokens spent across every LLM stage this run.
    tokens_used: AtomicI64,
}

impl Pipeline {
    /// Initialize every component. Opens the store (fatal on migration
    /// failure), builds the LLM client, loads the custom context once, and
    /// loads chat credentials if present.
    pub async fn new(config: Config) -> Result<Self> {
        let llm: Arc<dyn LlmClient> = create_client(
            &config.llm.provider,
            config.api_key(),
            &config.llm.model,
        )?
        .into();
        Self::with_client(config, llm).await
    }

    /// Like [`Pipeline::new`] but with an explicit LLM client. Embedders
    /// and tests inject deterministic clients here.
    pub async fn with_client(config: Config, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let lookback = parse_lookback(&config.lookback)?;

        let store = Store::open(&config.db_path).await?;

        let custom_context =
            load_custom_context(&config.context_file).context("loading custom context")?;

        let endpoints = &config.endpoints;
        let catalog = CatalogFetcher::new(&endpoints.catalog_url)?;
        let notes = NotesFetcher::new(store.clone(), &endpoints.docs_base)?;
        let recordings =
            RecordingIndexFetcher::new(&endpoints.docs_base, &endpoints.recordings_sheet_id)?;
        let transcripts = TranscriptFetcher::new(store.clone(), &endpoints.transcript_base)?;

        let chat = if config.skip_chat {
            None
        } else {
            match chat_auth::load_credentials(&config.chat.credentials_file) {
                Ok(Some(creds)) => Some(ChatFetcher::new(
                    store.clone(),
                    &endpoints.chat_api_base,
                    &creds.token,
                    &creds.cookie,
                )?),
                Ok(None) => {
                    warn!("no chat credentials found; chat fetching will be skipped");
                    None
                }
                Err(e) => {
                    warn!("could not load chat credentials: {e:#}");
                    None
                }
            }
        };

        let summarizer = Summarizer::new(llm.clone(), store.clone());
        let synthesizer = Synthesizer::new(llm.clone(), store.clone());
        let scorer = RelevanceScorer::new(llm, store.clone(), custom_context);

        let markdown = MarkdownGenerator::new(&config.output_dir);
        let json = JsonGenerator::new(&config.output_dir);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                lookback,
                store,
                catalog,
                notes,
                recordings,
                transcripts,
                chat,
                summarizer,
                synthesizer,
                scorer,
                markdown,
                json,
                failures: AtomicUsize::new(0),
                tokens_used: AtomicI64::new(0),
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Token used to cancel in-flight work (wired to Ctrl-C by the CLI).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of adapter failures observed so far.
    pub fn failure_count(&self) -> usize {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Release pipeline resources.
    pub async fn close(&self) {
        self.inner.store.close().await;
    }

    /// Full run: fetch then analyze.
    pub async fn run(&self) -> Result<()> {
        self.fetch_only().await.context("fetch phase")?;
        self.analyze_only().await.context("analyze phase")?;
        Ok(())
    }

    /// Fetch phase: refresh the catalog and pull all sources for every
    /// in-scope group.
    pub async fn fetch_only(&self) -> Result<()> {
        let inner = &self.inner;
        let end = Utc::now();
        let start = end - inner.lookback;
        info!(
            start = %start.format("%Y-%m-%d"),
            end = %end.format("%Y-%m-%d"),
            "pipeline: starting fetch phase"
        );

        let groups = inner
            .catalog
            .fetch_and_parse()
            .await
            .context("fetching group catalog")?;
        for group in &groups {
            if let Err(e) = inner.store.upsert_group(group).await {
                warn!(group = %group.id, "failed to upsert group: {e:#}");
            }
        }
        info!(count = groups.len(), "pipeline: catalog loaded");

        let filtered = filter_groups(groups, &inner.config.groups);
        info!(count = filtered.len(), "pipeline: groups in scope");

        let recordings: Arc<Vec<Recording>> = if inner.config.skip_videos {
            Arc::new(Vec::new())
        } else {
            let ids: Vec<String> = filtered.iter().map(|g| g.id.clone()).collect();
            match inner.recordings.fetch_recordings(start, end, &ids).await {
                Ok(recordings) => {
                    info!(count = recordings.len(), "pipeline: recordings in window");
                    Arc::new(recordings)
                }
                Err(e) => {
                    warn!("failed to fetch recording index: {e:#}");
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    Arc::new(Vec::new())
                }
            }
        };

        let semaphore = Arc::new(Semaphore::new(inner.config.workers));
        let mut tasks = JoinSet::new();

        for group in filtered {
            if self.cancel.is_cancelled() {
                break;
            }
            let inner = Arc::clone(inner);
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let recordings = recordings.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                fetch_group(&inner, &group, start, end, &recordings, &cancel).await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.context("fetch worker panicked")?;
        }

        info!("pipeline: fetch phase complete");
        Ok(())
    }

    /// Analyze phase: run the analysis chain for every group with cached
    /// data and emit the digest.
    pub async fn analyze_only(&self) -> Result<()> {
        let inner = &self.inner;
        let exec_start = std::time::Instant::now();
        let end = Utc::now();
        let start = end - inner.lookback;
        let start_str = start.format("%Y-%m-%d").to_string();
        let end_str = end.format("%Y-%m-%d").to_string();

        info!("pipeline: starting analyze phase");

        let filter: Vec<String> = inner
            .config
            .groups
            .iter()
            .map(|g| catalog::normalize_group_id(g))
            .collect();
        let groups = inner.store.list_groups(&filter).await?;
        if groups.is_empty() {
            anyhow::bail!("no groups found in store (run fetch first)");
        }

        let groups = filter_groups(deduplicate_groups(groups), &inner.config.groups);
        info!(count = groups.len(), "pipeline: analyzing groups");

        let semaphore = Arc::new(Semaphore::new(inner.config.workers));
        let (tx, mut rx) = mpsc::channel::<GroupReport>(groups.len().max(1));
        let mut tasks = JoinSet::new();

        for group in groups {
            if self.cancel.is_cancelled() {
                break;
            }
            let inner = Arc::clone(inner);
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            let start_str = start_str.clone();
            let end_str = end_str.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let report =
                    analyze_group(&inner, &group, start, end, &start_str, &end_str).await;
                let _ = tx.send(report).await;
            });
        }
        drop(tx);

        // Single collector: drains the channel until every worker has sent
        // (or exited); no shared result vector.
        let mut group_reports = Vec::new();
        while let Some(report) = rx.recv().await {
            group_reports.push(report);
        }

        while let Some(result) = tasks.join_next().await {
            result.context("analyze worker panicked")?;
        }

        let groups_with_data = group_reports
            .iter()
            .filter(|r| r.relevance.is_some())
            .count();
        let total_tokens = inner.tokens_used.load(Ordering::Relaxed);
        let stats = RunStats {
            total_tokens_used: total_tokens,
            // 3 summaries + 1 synthesis + 1 score per fully-analyzed group.
            total_llm_calls: (groups_with_data * 5) as i64,
            model: inner.config.llm.model.clone(),
            provider: inner.config.llm.provider.clone(),
            groups_processed: group_reports.len(),
            groups_with_data,
            duration_seconds: exec_start.elapsed().as_secs_f64(),
            estimated_cost_usd: total_tokens as f64 / 1_000_000.0 * COST_PER_MILLION_TOKENS,
        };

        let digest = DigestReport {
            window_start: start_str.clone(),
            window_end: end_str.clone(),
            group_reports,
            cross_group_themes: String::new(),
            stats,
        };

        let path = match inner.config.format.as_str() {
            "json" => inner.json.generate_digest_report(&digest),
            _ => inner.markdown.generate_digest_report(&digest),
        }
        .context("writing digest report")?;

        if let Err(e) = inner
            .store
            .insert_report(&ReportRecord {
                report_type: "digest".to_string(),
                group_id: String::new(),
                window_start: start_str,
                window_end: end_str,
                file_path: path.display().to_string(),
                content_hash: String::new(),
            })
            .await
        {
            warn!("failed to record digest report: {e:#}");
        }

        info!(path = %path.display(), "pipeline: analyze phase complete");
        Ok(())
    }
}

/// Fetch every source for one group. Failures are warnings; each one marks
/// the run partial but aborts nothing.
async fn fetch_group(
    inner: &Inner,
    group: &Group,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    recordings: &[Recording],
    cancel: &CancellationToken,
) {
    info!(group = %group.id, "pipeline: fetching sources");

    if !inner.config.skip_notes && !group.notes_doc_id.is_empty() {
        if let Err(e) = inner.notes.fetch_meeting_notes(group, start, end).await {
            warn!(group = %group.id, "failed to fetch meeting notes: {e:#}");
            inner.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    if !inner.config.skip_videos {
        for recording in recordings.iter().filter(|r| r.group_id == group.id) {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = inner.transcripts.fetch_transcript(recording, cancel).await {
                warn!(group = %group.id, url = %recording.url, "failed to fetch transcript: {e:#}");
                inner.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if !inner.config.skip_chat && !group.channel_id.is_empty() {
        if let Some(chat) = &inner.chat {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = chat.fetch_messages(group, start, end, cancel).await {
                warn!(group = %group.id, "failed to fetch chat messages: {e:#}");
                inner.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Run the analysis chain for one group. Always returns a report; missing
/// sources and failed stages degrade it rather than erroring out.
async fn analyze_group(
    inner: &Inner,
    group: &Group,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    start_str: &str,
    end_str: &str,
) -> GroupReport {
    info!(group = %group.id, "pipeline: analyzing");

    let mut report = GroupReport {
        group_id: group.id.clone(),
        group_name: group.name.clone(),
        category: group.category.clone(),
        window_start: start_str.to_string(),
        window_end: end_str.to_string(),
        channel_name: group.channel_name.clone(),
        ..GroupReport::default()
    };
    if !group.notes_doc_id.is_empty() {
        report.notes_link = format!(
            "{}/document/d/{}",
            inner.config.endpoints.docs_base, group.notes_doc_id
        );
    }

    let mut summaries: Vec<SourceSummary> = Vec::new();

    // Notes summary.
    match inner.store.get_meeting_notes(&group.id, start, end).await {
        Ok(notes) => {
            match inner
                .summarizer
                .summarize_meeting_notes(&group.id, &group.name, &notes, start, end)
                .await
            {
                Ok(summary) => {
                    inner.tokens_used.fetch_add(summary.tokens_used, Ordering::Relaxed);
                    summaries.push(summary);
                    report.sources_used.push("notes".to_string());
                }
                Err(e) => {
                    if e.downcast_ref::<EmptyInput>().is_none() {
                        warn!(group = %group.id, "failed to summarize meeting notes: {e:#}");
                    }
                    report.sources_missing.push("notes".to_string());
                }
            }
        }
        Err(e) => {
            warn!(group = %group.id, "failed to read meeting notes: {e:#}");
            report.sources_missing.push("notes".to_string());
        }
    }

    // Video summary.
    match inner.store.get_transcripts(&group.id, start, end).await {
        Ok(transcripts) => {
            match inner
                .summarizer
                .summarize_transcripts(&group.id, &group.name, &transcripts, start, end)
                .await
            {
                Ok(summary) => {
                    inner.tokens_used.fetch_add(summary.tokens_used, Ordering::Relaxed);
                    summaries.push(summary);
                    report.sources_used.push("video".to_string());
                }
                Err(e) => {
                    if e.downcast_ref::<EmptyInput>().is_none() {
                        warn!(group = %group.id, "failed to summarize transcripts: {e:#}");
                    }
                    report.sources_missing.push("video".to_string());
                }
            }
        }
        Err(e) => {
            warn!(group = %group.id, "failed to read transcripts: {e:#}");
            report.sources_missing.push("video".to_string());
        }
    }

    // Chat summary.
    match inner.store.get_chat_messages(&group.id, start, end).await {
        Ok(messages) => {
            match inner
                .summarizer
                .summarize_chat(&group.id, &group.name, &messages, start, end)
                .await
            {
                Ok(summary) => {
                    inner.tokens_used.fetch_add(summary.tokens_used, Ordering::Relaxed);
                    summaries.push(summary);
                    report.sources_used.push("chat".to_string());
                }
                Err(e) => {
                    if e.downcast_ref::<EmptyInput>().is_none() {
                        warn!(group = %group.id, "failed to summarize chat: {e:#}");
                    }
                    report.sources_missing.push("chat".to_string());
                }
            }
        }
        Err(e) => {
            warn!(group = %group.id, "failed to read chat messages: {e:#}");
            report.sources_missing.push("chat".to_string());
        }
    }

    if summaries.is_empty() {
        info!(group = %group.id, "pipeline: no source data, skipping analysis");
        return report;
    }

    let synthesis = match inner
        .synthesizer
        .synthesize(&group.id, &group.name, &summaries, start, end)
        .await
    {
        Ok(synthesis) => {
            inner.tokens_used.fetch_add(synthesis.tokens_used, Ordering::Relaxed);
            synthesis
        }
        Err(e) => {
            warn!(group = %group.id, "failed to synthesize: {e:#}");
            return report;
        }
    };

    match inner
        .scorer
        .score(&group.id, &group.name, &synthesis, start, end)
        .await
    {
        Ok(relevance) => {
            inner.tokens_used.fetch_add(relevance.tokens_used, Ordering::Relaxed);
            report.relevance = Some(relevance);
        }
        Err(e) => {
            warn!(group = %group.id, "failed to score relevance: {e:#}");
        }
    }

    info!(group = %group.id, sources = ?report.sources_used, "pipeline: analysis complete");
    report
}

/// Apply the group filter. An empty filter keeps everything except the
/// `localization` category; a non-empty filter keeps exactly the named
/// groups (names are slugged before matching).
pub fn filter_groups(groups: Vec<Group>, filter: &[String]) -> Vec<Group> {
    if filter.is_empty() {
        return groups
            .into_iter()
            .filter(|g| g.category != "localization")
            .collect();
    }

    let wanted: std::collections::HashSet<String> = filter
        .iter()
        .map(|name| catalog::normalize_group_id(name))
        .collect();

    groups
        .into_iter()
        .filter(|g| wanted.contains(&g.id))
        .collect()
}

/// Drop duplicate groups by id, keeping the first occurrence.
pub fn deduplicate_groups(groups: Vec<Group>) -> Vec<Group> {
    let mut seen = std::collections::HashSet::new();
    groups
        .into_iter()
        .filter(|g| seen.insert(g.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, category: &str) -> Group {
        Group {
            id: id.to_string(),
            name: id.to_string(),
            category: category.to_string(),
            ..Group::default()
        }
    }

    #[test]
    fn test_filter_excludes_localization_by_default() {
        let groups = vec![
            group("collector", "implementation"),
            group("french-team", "localization"),
        ];
        let filtered = filter_groups(groups, &[]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "collector");
    }

    #[test]
    fn test_filter_explicit_names_include_localization() {
        let groups = vec![
            group("collector", "implementation"),
            group("french-team", "localization"),
        ];
        let filtered = filter_groups(groups, &["French Team".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "french-team");
    }

    #[test]
    fn test_filter_slugs_names_before_matching() {
        let groups = vec![group("cplusplus-sdk", "implementation")];
        let filtered = filter_groups(groups, &["C++ SDK".to_string()]);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence() {
        let mut first = group("collector", "implementation");
        first.name = "Collector".to_string();
        let mut second = group("collector", "implementation");
        second.name = "Collector (stale)".to_string();

        let deduped = deduplicate_groups(vec![first, second]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].name, "Collector");
    }
}
