//! Report emission.
//!
//! Renders [`DigestReport`]s (and individual [`GroupReport`]s) to markdown
//! or JSON files with deterministic names. The digest deduplicates groups
//! by normalized display name, partitions them into active and quiet,
//! surfaces the top HIGH items across the whole window, and appends
//! processing and run-info tables so partial runs are visibly partial.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::analysis::{DigestReport, GroupReport, RelevanceReport};

/// Writes markdown reports into an output directory.
pub struct MarkdownGenerator {
    output_dir: PathBuf,
}

impl MarkdownGenerator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Render one group's report; returns the file path.
    pub fn generate_group_report(&self, report: &GroupReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).context("creating output directory")?;

        let mut b = String::new();
        let range = format_date_range(&report.window_start, &report.window_end);
        let _ = writeln!(b, "# {} Report — {}\n", report.group_name, range);

        let _ = writeln!(
            b,
            "> Generated: {} | Sources: meeting notes {} video {} chat {}\n",
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
            source_status("notes", report),
            source_status("video", report),
            source_status("chat", report),
        );

        if let Some(relevance) = &report.relevance {
            write_relevance_items_flat(&mut b, relevance);
        }
        write_data_sources(&mut b, report);

        let path = self
            .output_dir
            .join(group_report_filename(&report.window_end, &report.group_id, "md"));
        std::fs::write(&path, &b).context("writing group report")?;
        Ok(path)
    }

    /// Render the weekly digest; returns the file path.
    pub fn generate_digest_report(&self, digest: &DigestReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).context("creating output directory")?;

        let deduped = deduplicate_digest_groups(&digest.group_reports);
        let (active, quiet) = partition_active(&deduped);

        let mut b = String::new();
        let range = format_date_range(&digest.window_start, &digest.window_end);
        let _ = writeln!(b, "# Weekly Digest — {}\n", range);
        let _ = writeln!(
            b,
            "> {} groups with activity | {} quiet | Generated: {}\n",
            active.len(),
            quiet.len(),
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
        );

        write_top_takeaways(&mut b, &active);

        b.push_str("## Group-by-Group Summaries\n\n");
        for report in &active {
            let _ = writeln!(b, "### {}\n", report.group_name);
            if let Some(relevance) = &report.relevance {
                write_relevance_items_flat(&mut b, relevance);
            }
            write_data_sources(&mut b, report);
        }

        if !quiet.is_empty() {
            b.push_str("## Quiet This Week\n\n");
            let names: Vec<&str> = quiet.iter().map(|r| r.group_name.as_str()).collect();
            let _ = writeln!(b, "{}\n", names.join(", "));
        }

        if !digest.cross_group_themes.is_empty() {
            b.push_str("## Cross-Group Themes\n\n");
            b.push_str(&digest.cross_group_themes);
            b.push_str("\n\n");
        }

        b.push_str("## Appendix: Processing Stats\n\n");
        b.push_str("| Group | Notes | Video | Chat | Status |\n");
        b.push_str("|-------|-------|-------|------|--------|\n");
        for report in &deduped {
            let _ = writeln!(
                b,
                "| {} | {} | {} | {} | {} |",
                report.group_name,
                source_status("notes", report),
                source_status("video", report),
                source_status("chat", report),
                group_status(report),
            );
        }
        b.push('\n');

        let stats = &digest.stats;
        b.push_str("## Appendix: Run Info\n\n");
        b.push_str("| Metric | Value |\n");
        b.push_str("|--------|-------|\n");
        let _ = writeln!(b, "| LLM Provider | {} |", stats.provider);
        let _ = writeln!(b, "| Model | `{}` |", stats.model);
        let _ = writeln!(b, "| Total Tokens Used | {} |", format_tokens(stats.total_tokens_used));
        let _ = writeln!(b, "| LLM Calls | {} |", stats.total_llm_calls);
        let _ = writeln!(b, "| Estimated Cost | ${:.2} |", stats.estimated_cost_usd);
        let _ = writeln!(b, "| Groups Processed | {} |", stats.groups_processed);
        let _ = writeln!(b, "| Groups With Data | {} |", stats.groups_with_data);
        let _ = writeln!(b, "| Duration | {:.1}s |", stats.duration_seconds);
        b.push('\n');

        let path = self
            .output_dir
            .join(digest_filename(&digest.window_end, "md"));
        std::fs::write(&path, &b).context("writing digest report")?;
        Ok(path)
    }
}

/// Writes JSON reports mirroring the report entities verbatim.
pub struct JsonGenerator {
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct JsonGroupReport<'a> {
    group_id: &'a str,
    group_name: &'a str,
    category: &'a str,
    window_start: &'a str,
    window_end: &'a str,
    sources_used: &'a [String],
    sources_missing: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    relevance: Option<JsonRelevance<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    notes_link: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    recording_link: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    channel_name: &'a str,
    generated_at: String,
}

#[derive(Serialize)]
struct JsonRelevance<'a> {
    report: &'a str,
    high_items: &'a [String],
    medium_items: &'a [String],
    low_items: &'a [String],
    model: &'a str,
    tokens_used: i64,
}

#[derive(Serialize)]
struct JsonDigest<'a> {
    window_start: &'a str,
    window_end: &'a str,
    group_count: usize,
    group_reports: Vec<JsonGroupReport<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    cross_group_themes: &'a str,
    generated_at: String,
}

impl JsonGenerator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Render one group's report as JSON; returns the file path.
    pub fn generate_group_report(&self, report: &GroupReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).context("creating output directory")?;

        let data = serde_json::to_string_pretty(&to_json_report(report))
            .context("serializing group report")?;

        let path = self
            .output_dir
            .join(group_report_filename(&report.window_end, &report.group_id, "json"));
        std::fs::write(&path, data).context("writing group report JSON")?;
        Ok(path)
    }

    /// Render the weekly digest as JSON; returns the file path.
    pub fn generate_digest_report(&self, digest: &DigestReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).context("creating output directory")?;

        let json = JsonDigest {
            window_start: &digest.window_start,
            window_end: &digest.window_end,
            group_count: digest.group_reports.len(),
            group_reports: digest.group_reports.iter().map(to_json_report).collect(),
            cross_group_themes: &digest.cross_group_themes,
            generated_at: Utc::now().to_rfc3339(),
        };

        let data = serde_json::to_string_pretty(&json).context("serializing digest report")?;

        let path = self
            .output_dir
            .join(digest_filename(&digest.window_end, "json"));
        std::fs::write(&path, data).context("writing digest report JSON")?;
        Ok(path)
    }
}

fn to_json_report<'a>(report: &'a GroupReport) -> JsonGroupReport<'a> {
    JsonGroupReport {
        group_id: &report.group_id,
        group_name: &report.group_name,
        category: &report.category,
        window_start: &report.window_start,
        window_end: &report.window_end,
        sources_used: &report.sources_used,
        sources_missing: &report.sources_missing,
        relevance: report.relevance.as_ref().map(|r| JsonRelevance {
            report: &r.report,
            high_items: &r.high_items,
            medium_items: &r.medium_items,
            low_items: &r.low_items,
            model: &r.model,
            tokens_used: r.tokens_used,
        }),
        notes_link: &report.notes_link,
        recording_link: &report.recording_link,
        channel_name: &report.channel_name,
        generated_at: Utc::now().to_rfc3339(),
    }
}

/// Collect HIGH items across active groups and write the top 10 with group
/// attribution.
fn write_top_takeaways(b: &mut String, active: &[GroupReport]) {
    let mut items: Vec<(&str, &str)> = Vec::new();
    for report in active {
        if let Some(relevance) = &report.relevance {
            for item in &relevance.high_items {
                items.push((report.group_name.as_str(), item.as_str()));
            }
        }
    }
    if items.is_empty() {
        return;
    }

    b.push_str("## Top Takeaways\n\n");
    for (group_name, item) in items.iter().take(10) {
        let _ = writeln!(b, "- [{}] {}", group_name, ensure_bold_topic(item));
    }
    b.push('\n');
}

/// Render high, medium, and low items as one flat priority-ordered bullet
/// list with no level headers.
fn write_relevance_items_flat(b: &mut String, relevance: &RelevanceReport) {
    if relevance.total_items() == 0 {
        return;
    }
    for item in relevance
        .high_items
        .iter()
        .chain(&relevance.medium_items)
        .chain(&relevance.low_items)
    {
        let _ = writeln!(b, "- {}", ensure_bold_topic(item));
    }
    b.push('\n');
}

/// Render the compact inline sources line. Writes nothing when the report
/// carries no links.
fn write_data_sources(b: &mut String, report: &GroupReport) {
    let mut parts = Vec::new();
    if !report.notes_link.is_empty() {
        parts.push(format!("[Meeting Notes]({})", report.notes_link));
    }
    if !report.recording_link.is_empty() {
        parts.push(format!("[Recording]({})", report.recording_link));
    }
    if !report.channel_name.is_empty() {
        parts.push(format!("Chat: `{}`", report.channel_name));
    }
    if parts.is_empty() {
        return;
    }
    let _ = writeln!(b, "> Sources: {}\n", parts.join(" | "));
}

/// Ensure the item starts with a `**bold topic**` prefix, bolding the text
/// before the first separator when the model forgot to.
pub fn ensure_bold_topic(item: &str) -> String {
    if item.starts_with("**") {
        return item.to_string();
    }
    for sep in [" — ", ": "] {
        if let Some(idx) = item.find(sep) {
            if idx > 0 && idx < 80 {
                return format!("**{}**{}", &item[..idx], &item[idx..]);
            }
        }
    }
    item.to_string()
}

static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F000}-\x{1FFFF}]|[\x{2600}-\x{27BF}]|[\x{FE00}-\x{FE0F}]|\x{200D}|\x{20E3}|[\x{E0020}-\x{E007F}]",
    )
    .unwrap()
});

static HTML_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&[a-zA-Z]+;|&#[0-9]+;|&#x[0-9a-fA-F]+;").unwrap());

/// Normalize a group display name for deduplication: decode common HTML
/// entities, strip the rest, strip emoji, lowercase, collapse whitespace.
/// Idempotent.
pub fn normalize_group_name(name: &str) -> String {
    let s = name
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let s = HTML_ENTITY_RE.replace_all(&s, "");
    let s = EMOJI_RE.replace_all(&s, "");
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Merge reports sharing a normalized name, keeping the one with the most
/// priority items. First-seen order is preserved.
pub fn deduplicate_digest_groups(reports: &[GroupReport]) -> Vec<GroupReport> {
    let mut best: HashMap<String, (usize, usize)> = HashMap::new(); // key -> (index, count)
    let mut order: Vec<String> = Vec::new();

    for (i, report) in reports.iter().enumerate() {
        let key = normalize_group_name(&report.group_name);
        let count = report
            .relevance
            .as_ref()
            .map(|r| r.total_items())
            .unwrap_or(0);

        match best.get(&key) {
            Some(&(_, existing)) if count <= existing => {}
            Some(_) => {
                best.insert(key, (i, count));
            }
            None => {
                best.insert(key.clone(), (i, count));
                order.push(key);
            }
        }
    }

    order
        .iter()
        .map(|key| reports[best[key].0].clone())
        .collect()
}

/// Split into (active, quiet): active groups have at least one priority
/// item.
fn partition_active(reports: &[GroupReport]) -> (Vec<GroupReport>, Vec<GroupReport>) {
    let mut active = Vec::new();
    let mut quiet = Vec::new();
    for report in reports {
        let items = report
            .relevance
            .as_ref()
            .map(|r| r.total_items())
            .unwrap_or(0);
        if items > 0 {
            active.push(report.clone());
        } else {
            quiet.push(report.clone());
        }
    }
    (active, quiet)
}

/// Tri-state marker for one source: used, missing, or never attempted.
fn source_status(source: &str, report: &GroupReport) -> &'static str {
    if report.sources_used.iter().any(|s| s == source) {
        "✓"
    } else if report.sources_missing.iter().any(|s| s == source) {
        "✗"
    } else {
        "—"
    }
}

/// Overall status for the processing-stats table.
fn group_status(report: &GroupReport) -> &'static str {
    if report.relevance.is_some() {
        "Complete"
    } else if !report.sources_used.is_empty() {
        "Partial"
    } else {
        "No data"
    }
}

fn format_date_range(start: &str, end: &str) -> String {
    if start.is_empty() && end.is_empty() {
        return "Unknown date range".to_string();
    }
    if start == end {
        return start.to_string();
    }
    format!("{} to {}", start, end)
}

/// `<yyyy-mm-dd>-<slug>-report.<ext>`; an empty end date falls back to
/// today in the local timezone.
pub fn group_report_filename(window_end: &str, group_id: &str, ext: &str) -> String {
    let date = if window_end.is_empty() {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        window_end.to_string()
    };
    let slug = group_id.to_lowercase().replace(' ', "-");
    format!("{}-{}-report.{}", date, slug, ext)
}

/// `<yyyy-mm-dd>-weekly-digest.<ext>`; same end-date fallback.
pub fn digest_filename(window_end: &str, ext: &str) -> String {
    let date = if window_end.is_empty() {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        window_end.to_string()
    };
    format!("{}-weekly-digest.{}", date, ext)
}

fn format_tokens(n: i64) -> String {
    if n < 1_000 {
        format!("{}", n)
    } else if n < 1_000_000 {
        format!("{}k", n / 1_000)
    } else {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    }
}
