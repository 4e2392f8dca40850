//! Meeting-notes adapter.
//!
//! Each working group keeps one long-lived shared document with all of its
//! meeting notes, newest at the top, separated by date headings. The
//! adapter downloads the plain-text export, splits the document at every
//! recognized date heading, and upserts the meetings that fall inside the
//! requested window.
//!
//! Content is associated by document order: everything between one heading
//! and the next belongs to the earlier heading, whatever the dates say.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::hash_content;
use crate::store::{FetchLogEntry, FetchStatus, Group, MeetingNote, Store};

/// One meeting sliced out of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMeeting {
    pub date: NaiveDate,
    pub content: String,
}

/// Downloads and windows meeting-notes documents.
pub struct NotesFetcher {
    store: Store,
    http: reqwest::Client,
    docs_base: String,
}

impl NotesFetcher {
    pub fn new(store: Store, docs_base: &str) -> Result<Self> {
        Ok(Self {
            store,
            // Document exports can be large; give them a longer budget than
            // API calls.
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            docs_base: docs_base.trim_end_matches('/').to_string(),
        })
    }

    /// Download the group's notes document and store every meeting dated
    /// within `[start, end]`.
    pub async fn fetch_meeting_notes(
        &self,
        group: &Group,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        if group.notes_doc_id.is_empty() {
            bail!("group {:?} has no notes doc id", group.id);
        }

        let url = format!(
            "{}/document/d/{}/export?format=txt",
            self.docs_base, group.notes_doc_id
        );
        let fetch_start = std::time::Instant::now();

        let resp = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.log_fetch(&group.id, &url, FetchStatus::Error, &e.to_string(), fetch_start)
                    .await;
                return Err(e).context("fetching notes document");
            }
        };

        if !resp.status().is_success() {
            let msg = format!("HTTP {}", resp.status().as_u16());
            self.log_fetch(&group.id, &url, FetchStatus::Error, &msg, fetch_start)
                .await;
            bail!("fetching notes document: {}", msg);
        }

        let content = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                self.log_fetch(&group.id, &url, FetchStatus::Error, &e.to_string(), fetch_start)
                    .await;
                return Err(e).context("reading notes document body");
            }
        };

        let meetings = parse_meeting_dates(&content, start, end);

        let mut stored = 0;
        for meeting in &meetings {
            let note = MeetingNote {
                group_id: group.id.clone(),
                doc_id: group.notes_doc_id.clone(),
                meeting_date: meeting.date,
                content_hash: hash_content(&meeting.content),
                raw_text: meeting.content.clone(),
                fetched_at: Utc::now(),
            };
            if let Err(e) = self.store.upsert_meeting_note(&note).await {
                warn!(group = %group.id, date = %meeting.date, "failed to store meeting note: {e:#}");
                continue;
            }
            stored += 1;
        }

        let status = if stored == 0 && !meetings.is_empty() {
            FetchStatus::Error
        } else {
            FetchStatus::Success
        };
        self.log_fetch(&group.id, &url, status, "", fetch_start).await;

        info!(
            group = %group.id,
            found = meetings.len(),
            stored,
            "notes: parsed meetings in range"
        );
        Ok(())
    }

    async fn log_fetch(
        &self,
        group_id: &str,
        url: &str,
        status: FetchStatus,
        error: &str,
        started: std::time::Instant,
    ) {
        let _ = self
            .store
            .log_fetch(&FetchLogEntry {
                source: "meeting_notes".to_string(),
                group_id: group_id.to_string(),
                url: url.to_string(),
                status,
                error_message: error.to_string(),
                duration_ms: started.elapsed().as_millis() as i64,
            })
            .await;
    }
}

/// Split document content into meetings by date heading and filter to the
/// window `[start-of-day(start), end-of-day(end)]`.
///
/// Heading order is not assumed ascending or descending; each heading's
/// content runs from its own line (inclusive) to the next heading's line
/// (exclusive). Empty slices are dropped.
pub fn parse_meeting_dates(
    content: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<ParsedMeeting> {
    let lines: Vec<&str> = content.split('\n').collect();

    let mut positions: Vec<(NaiveDate, usize)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(date) = try_parse_date(trimmed) {
            positions.push((date, i));
        }
    }

    if positions.is_empty() {
        return Vec::new();
    }

    let start_day = start.date_naive();
    let end_day = end.date_naive();

    let mut meetings = Vec::new();
    for (i, &(date, line_idx)) in positions.iter().enumerate() {
        if date < start_day || date > end_day {
            continue;
        }

        let end_line = positions
            .get(i + 1)
            .map(|&(_, idx)| idx)
            .unwrap_or(lines.len());

        let section = lines[line_idx..end_line].join("\n");
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        meetings.push(ParsedMeeting {
            date,
            content: section.to_string(),
        });
    }

    meetings
}

const WEEKDAYS: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Date layouts tried in order against the cleaned heading text.
const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%Y-%m-%d",
    "%m/%d/%Y",
];

static MONTH_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^(?:\#*\s*)?(?:Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday)?[,\s]*?
        ((?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|
        Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s+\d{1,2},?\s+\d{4})\s*$",
    )
    .unwrap()
});

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:#*\s*)?(\d{4}-\d{2}-\d{2})\s*$").unwrap());

static SLASH_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:#*\s*)?(\d{1,2}/\d{1,2}/\d{4})\s*$").unwrap());

/// Try to read a line as a date heading.
///
/// Accepts "<Month> <day>, <year>", "yyyy-mm-dd", and "m/d/yyyy", with
/// optional leading `#` markers, an optional leading weekday, and an
/// optional trailing colon. Returns `None` for anything else.
pub fn try_parse_date(line: &str) -> Option<NaiveDate> {
    let mut cleaned = line.trim_start_matches('#').trim();
    cleaned = cleaned.trim_end_matches(':').trim_end();

    for day in WEEKDAYS {
        if let Some(rest) = cleaned.strip_prefix(day) {
            cleaned = rest.trim_start_matches(|c: char| c == ',' || c == ' ');
            break;
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }

    // Regex extraction handles headings with residual markers around the
    // date text.
    for re in [&*MONTH_DATE_RE, &*ISO_DATE_RE, &*SLASH_DATE_RE] {
        if let Some(caps) = re.captures(line) {
            let date_str = &caps[1];
            for format in DATE_FORMATS {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
                    return Some(date);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_try_parse_date_accepts_common_headings() {
        assert_eq!(try_parse_date("Feb 18, 2026"), Some(d(2026, 2, 18)));
        assert_eq!(try_parse_date("February 18, 2026"), Some(d(2026, 2, 18)));
        assert_eq!(try_parse_date("Feb 4 2026"), Some(d(2026, 2, 4)));
        assert_eq!(try_parse_date("2026-02-18"), Some(d(2026, 2, 18)));
        assert_eq!(try_parse_date("2/18/2026"), Some(d(2026, 2, 18)));
        assert_eq!(try_parse_date("02/18/2026"), Some(d(2026, 2, 18)));
    }

    #[test]
    fn test_try_parse_date_accepts_decorated_headings() {
        assert_eq!(try_parse_date("## Feb 18, 2026"), Some(d(2026, 2, 18)));
        assert_eq!(try_parse_date("Feb 18, 2026:"), Some(d(2026, 2, 18)));
        assert_eq!(
            try_parse_date("Wednesday, Feb 18, 2026"),
            Some(d(2026, 2, 18))
        );
        assert_eq!(try_parse_date("# 2026-02-18:"), Some(d(2026, 2, 18)));
    }

    #[test]
    fn test_try_parse_date_rejects_non_dates() {
        assert_eq!(try_parse_date("Agenda"), None);
        assert_eq!(try_parse_date("Attendees: 12"), None);
        assert_eq!(try_parse_date("Release 1.2.3"), None);
        assert_eq!(try_parse_date("Meeting on Feb 18"), None);
        assert_eq!(try_parse_date("18/2026"), None);
    }

    fn window(start: (i32, u32, u32), end: (i32, u32, u32)) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(start.0, start.1, start.2, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(end.0, end.1, end.2, 12, 0, 0).unwrap(),
        )
    }

    const DOC: &str = "Feb 18, 2026\nDiscussed the new exporter.\nAction: review PR.\n\nFeb 11, 2026\nTriage session.\n\nFeb 4, 2026\nPlanning.\n";

    #[test]
    fn test_parse_meeting_dates_windows_and_slices() {
        let (start, end) = window((2026, 2, 11), (2026, 2, 18));
        let meetings = parse_meeting_dates(DOC, start, end);
        assert_eq!(meetings.len(), 2);

        assert_eq!(meetings[0].date, d(2026, 2, 18));
        assert!(meetings[0].content.contains("new exporter"));
        assert!(meetings[0].content.contains("review PR"));
        assert!(!meetings[0].content.contains("Triage"));

        assert_eq!(meetings[1].date, d(2026, 2, 11));
        assert!(meetings[1].content.contains("Triage session"));
        assert!(!meetings[1].content.contains("Planning"));
    }

    #[test]
    fn test_parse_meeting_dates_window_is_inclusive() {
        let (start, end) = window((2026, 2, 4), (2026, 2, 4));
        let meetings = parse_meeting_dates(DOC, start, end);
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].date, d(2026, 2, 4));
    }

    #[test]
    fn test_parse_meeting_dates_no_headings() {
        let (start, end) = window((2026, 2, 1), (2026, 2, 28));
        assert!(parse_meeting_dates("just prose\nno dates here\n", start, end).is_empty());
    }

    #[test]
    fn test_parse_meeting_dates_ascending_document_order() {
        // Oldest-first documents slice the same way: content follows its
        // own heading.
        let doc = "Feb 4, 2026\nold content\n\nFeb 18, 2026\nnew content\n";
        let (start, end) = window((2026, 2, 1), (2026, 2, 28));
        let meetings = parse_meeting_dates(doc, start, end);
        assert_eq!(meetings.len(), 2);
        assert_eq!(meetings[0].date, d(2026, 2, 4));
        assert!(meetings[0].content.contains("old content"));
        assert!(!meetings[0].content.contains("new content"));
    }
}
