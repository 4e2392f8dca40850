//! Community catalog parser.
//!
//! The catalog is a markdown document with one `###` heading per category,
//! each followed by a pipe-delimited table of working groups. Parsing is
//! deliberately forgiving: rows that don't look like group entries are
//! dropped silently, and per-cell extraction scans every cell rather than
//! assuming a column order.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

use crate::store::Group;

/// Category heading prefixes mapped to their canonical category slug. The
/// catalog's own wording for the rest of the heading ("... SIGs",
/// "... Working Groups", "... Teams") has drifted over time, so only the
/// leading category word is significant.
const CATEGORY_LABELS: &[(&str, &str)] = &[
    ("Specification", "specification"),
    ("Implementation", "implementation"),
    ("Cross-Cutting", "cross-cutting"),
    ("Localization", "localization"),
];

static DOC_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"document/d/([a-zA-Z0-9_-]+)").unwrap());

static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[#([^\]]+)\]\([^)]*/archives/([A-Z0-9]+)\)").unwrap());

static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());

/// Downloads and parses the community catalog.
pub struct CatalogFetcher {
    http: reqwest::Client,
    url: String,
}

impl CatalogFetcher {
    pub fn new(catalog_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            url: catalog_url.to_string(),
        })
    }

    /// Download the catalog document and extract group descriptors.
    pub async fn fetch_and_parse(&self) -> Result<Vec<Group>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("fetching catalog")?;

        if !resp.status().is_success() {
            bail!("fetching catalog: HTTP {}", resp.status().as_u16());
        }

        let body = resp.text().await.context("reading catalog body")?;
        Ok(parse(&body))
    }
}

/// Extract group descriptors from catalog markdown.
pub fn parse(content: &str) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current_category = "";

    for line in content.lines() {
        let line = line.trim();

        if let Some(header) = line.strip_prefix("### ") {
            if let Some((_, cat)) = CATEGORY_LABELS
                .iter()
                .find(|(prefix, _)| header.starts_with(prefix))
            {
                current_category = cat;
            }
            continue;
        }

        // Only pipe rows inside a known category section are candidates.
        if !line.starts_with('|') || current_category.is_empty() {
            continue;
        }
        if line.contains("---") {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.contains("| name") || lower.contains("|name") {
            continue;
        }

        let cells = split_table_row(line);
        if cells.len() < 2 {
            continue;
        }

        let name = clean_markdown(&cells[0]);
        if name.is_empty() {
            continue;
        }

        let mut group = Group {
            id: normalize_group_id(&name),
            name,
            category: current_category.to_string(),
            ..Group::default()
        };

        for cell in &cells {
            if group.meeting_time.is_empty()
                && (cell.contains("day") || cell.contains("PT") || cell.contains("ET") || cell.contains("UTC"))
            {
                group.meeting_time = clean_markdown(cell);
            }
            if group.notes_doc_id.is_empty() {
                if let Some(caps) = DOC_ID_RE.captures(cell) {
                    group.notes_doc_id = caps[1].to_string();
                }
            }
            if group.channel_id.is_empty() {
                if let Some(caps) = CHANNEL_RE.captures(cell) {
                    group.channel_name = format!("#{}", &caps[1]);
                    group.channel_id = caps[2].to_string();
                }
            }
        }

        groups.push(group);
    }

    groups
}

/// Normalize a group name into its identifier slug.
///
/// Lowercases, maps `+` to `plus`, drops `#` and `.`, turns `/`, `:`, and
/// whitespace into `-`, collapses runs of dashes, and trims. Idempotent:
/// slugging a slug returns it unchanged.
pub fn normalize_group_id(name: &str) -> String {
    let mut s = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            '+' => s.push_str("plus"),
            '#' | '.' => {}
            '/' | ':' => s.push('-'),
            c if c.is_whitespace() => s.push('-'),
            c => s.push(c),
        }
    }
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s.trim_matches('-').to_string()
}

/// Split a markdown table row into trimmed cells.
fn split_table_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

/// Strip markdown links and bold/italic markers from a cell.
fn clean_markdown(s: &str) -> String {
    let s = LINK_RE.replace_all(s.trim(), "$1");
    s.replace("**", "").replace('*', "").trim().to_string()
}

/// Known mappings from recording-index names to group identifiers. The
/// index is maintained by hand and its names rarely match the catalog
/// spelling, so the common ones are pinned here.
static NAME_MAPPINGS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("collector sig", "collector"),
        ("specification sig", "specification-general-plus-otel-maintainers-sync"),
        (".net sig", "net-sdk"),
        ("go sig", "golang-sdk"),
        ("javascript sig", "javascript-sdk"),
        ("java sig", "java-sdk-plus-instrumentation"),
        ("python sig", "python-sdk"),
        ("ruby sig", "ruby-sdk"),
        ("rust sig", "rust-sdk"),
        ("php sig", "php-sdk"),
        ("c++ sig", "cplusplus-sdk"),
        ("erlang/elixir sig", "erlang-elixir-sdk"),
        ("swift sig", "swift-sdk"),
        ("semantic convention sig", "semantic-conventions-general"),
        ("browser sig", "browser"),
        ("android sig", "android-sdk-plus-automatic-instrumentation"),
        ("ebpf instrumentation", "ebpf-instrumentation"),
        ("arrow sig", "arrow"),
    ])
});

/// Map a recording-index name to a group identifier.
///
/// Tries the pinned mapping first, then strips common suffixes and falls
/// back to plain slug normalization.
pub fn match_index_name(index_name: &str) -> String {
    let normalized = index_name.trim().to_lowercase();

    if let Some(id) = NAME_MAPPINGS.get(normalized.as_str()) {
        return id.to_string();
    }

    for suffix in [" sig", " sdk", " sig mtg"] {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            if let Some(id) = NAME_MAPPINGS.get(format!("{}{}", stripped, suffix).as_str()) {
                return id.to_string();
            }
            return normalize_group_id(stripped);
        }
    }

    normalize_group_id(&normalized)
}
