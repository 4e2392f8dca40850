//! Recording-index adapter.
//!
//! The community publishes a spreadsheet of meeting recordings. The adapter
//! downloads its CSV export, locates the required columns by header name,
//! filters rows to the requested window, and maps each recording name onto
//! a catalog group identifier.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::catalog;

/// One recording row from the index, resolved to a group.
#[derive(Debug, Clone)]
pub struct Recording {
    pub index_name: String,
    pub group_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub url: String,
}

/// Downloads and filters the public recording index.
pub struct RecordingIndexFetcher {
    http: reqwest::Client,
    docs_base: String,
    sheet_id: String,
}

impl RecordingIndexFetcher {
    pub fn new(docs_base: &str, sheet_id: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            docs_base: docs_base.trim_end_matches('/').to_string(),
            sheet_id: sheet_id.to_string(),
        })
    }

    /// Download the index CSV and return recordings within `[start, end]`,
    /// optionally restricted to a set of group ids.
    pub async fn fetch_recordings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_ids: &[String],
    ) -> Result<Vec<Recording>> {
        let url = format!(
            "{}/spreadsheets/d/{}/export?format=csv",
            self.docs_base, self.sheet_id
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("fetching recording index")?;

        if !resp.status().is_success() {
            bail!("fetching recording index: HTTP {}", resp.status().as_u16());
        }

        let body = resp.text().await.context("reading recording index body")?;
        parse_csv(&body, start, end, group_ids)
    }
}

/// Parse the index CSV. Expected columns (located case-insensitively from
/// the header row): name, start time, duration, url/link. A missing column
/// is a structural error; a malformed row is skipped.
pub fn parse_csv(
    content: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    group_ids: &[String],
) -> Result<Vec<Recording>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("parsing CSV header")?.clone();

    let mut name_col = None;
    let mut start_col = None;
    let mut duration_col = None;
    let mut url_col = None;
    for (i, col) in headers.iter().enumerate() {
        let lower = col.trim().to_lowercase();
        if lower.contains("name") && name_col.is_none() {
            name_col = Some(i);
        } else if lower.contains("start") && start_col.is_none() {
            start_col = Some(i);
        } else if lower.contains("duration") && duration_col.is_none() {
            duration_col = Some(i);
        } else if (lower.contains("url") || lower.contains("link")) && url_col.is_none() {
            url_col = Some(i);
        }
    }

    let (Some(name_col), Some(start_col), Some(duration_col), Some(url_col)) =
        (name_col, start_col, duration_col, url_col)
    else {
        bail!("recording index CSV is missing a required column (name/start/duration/url)");
    };

    let id_set: HashSet<&str> = group_ids.iter().map(String::as_str).collect();
    let start_day = start.date_naive();
    let end_day = end.date_naive();

    let mut recordings = Vec::new();
    let mut total_rows = 0;

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(_) => continue,
        };
        total_rows += 1;

        let name = row.get(name_col).unwrap_or("").trim();
        let start_str = row.get(start_col).unwrap_or("").trim();
        let url = row.get(url_col).unwrap_or("").trim();
        if name.is_empty() || start_str.is_empty() || url.is_empty() {
            continue;
        }

        let Some(start_time) = parse_recording_time(start_str) else {
            warn!(value = start_str, "recordings: skipping row with unparseable start time");
            continue;
        };

        let day = start_time.date_naive();
        if day < start_day || day > end_day {
            continue;
        }

        let group_id = catalog::match_index_name(name);
        if !id_set.is_empty() && !id_set.contains(group_id.as_str()) {
            continue;
        }

        let duration_minutes = row
            .get(duration_col)
            .unwrap_or("")
            .trim()
            .parse::<i64>()
            .unwrap_or(0);

        recordings.push(Recording {
            index_name: name.to_string(),
            group_id,
            start_time,
            duration_minutes,
            url: url.to_string(),
        });
    }

    info!(
        in_range = recordings.len(),
        total_rows, "recordings: parsed index"
    );
    Ok(recordings)
}

/// Start-time layouts tried in order; the sheet is hand-maintained and the
/// format drifts.
const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a recording start time, interpreting it as UTC.
pub fn parse_recording_time(s: &str) -> Option<DateTime<Utc>> {
    for format in TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    // Date-only rows count as midnight.
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).unwrap(),
        )
    }

    const CSV: &str = "\
Name,Start time,Duration,URL
Collector SIG,2026-02-12 17:00:00,55,https://recordings.example/rec/1
Go SIG,2026-02-13 9:00:00,42,https://recordings.example/rec/2
Collector SIG,2026-02-01 17:00:00,60,https://recordings.example/rec/3
Mystery SIG,not-a-time,30,https://recordings.example/rec/4
,2026-02-12 17:00:00,10,https://recordings.example/rec/5
";

    #[test]
    fn test_parse_csv_filters_window_and_maps_names() {
        let (start, end) = window();
        let recs = parse_csv(CSV, start, end, &[]).unwrap();
        assert_eq!(recs.len(), 2);

        assert_eq!(recs[0].group_id, "collector");
        assert_eq!(recs[0].duration_minutes, 55);
        assert_eq!(recs[1].group_id, "golang-sdk");
    }

    #[test]
    fn test_parse_csv_group_filter() {
        let (start, end) = window();
        let filter = vec!["collector".to_string()];
        let recs = parse_csv(CSV, start, end, &filter).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].group_id, "collector");
    }

    #[test]
    fn test_parse_csv_missing_column_is_fatal() {
        let (start, end) = window();
        let bad = "Name,Duration\nCollector SIG,55\n";
        assert!(parse_csv(bad, start, end, &[]).is_err());
    }

    #[test]
    fn test_parse_recording_time_layouts() {
        assert!(parse_recording_time("2026-02-12 17:00:00").is_some());
        assert!(parse_recording_time("2026-02-12 9:05:00").is_some());
        assert!(parse_recording_time("2026-02-12 17:00").is_some());
        assert!(parse_recording_time("2026-02-12").is_some());
        assert!(parse_recording_time("2/12/2026 17:00:00").is_some());
        assert!(parse_recording_time("noon").is_none());
    }
}
