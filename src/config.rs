use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration.
///
/// Loaded from an optional TOML file, then overlaid with environment
/// variables (API keys) and CLI flags. See [`load_config`] for the
/// validation rules.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Lookback window expression: `7d`, `2w`, `1m`, or an `h/m/s`-style
    /// duration such as `36h`. Empty means 7 days.
    pub lookback: String,
    /// Group identifiers to process. Empty means all groups except the
    /// `localization` category.
    pub groups: Vec<String>,
    pub output_dir: PathBuf,
    /// Report format: `markdown` or `json`.
    pub format: String,
    /// SQLite database path; `:memory:` for an ephemeral store.
    pub db_path: String,
    /// Bounded concurrency for the fetch and analyze worker pools.
    pub workers: usize,
    pub skip_notes: bool,
    pub skip_videos: bool,
    pub skip_chat: bool,
    /// Analyze cached data only; no fetching.
    pub offline: bool,
    /// Path to an optional custom-context file appended to the scoring prompt.
    pub context_file: PathBuf,
    pub verbose: bool,

    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub endpoints: EndpointsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider: `anthropic` or `openai`.
    pub provider: String,
    pub model: String,
    #[serde(skip)]
    pub anthropic_key: String,
    #[serde(skip)]
    pub openai_key: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// JSON credentials file written by `wgr chat-login`.
    pub credentials_file: PathBuf,
}

/// Service endpoints. The defaults point at the public services the tool
/// targets; tests and forks override them per-field.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointsConfig {
    /// URL of the community catalog markdown.
    pub catalog_url: String,
    /// Base URL for notes-document and spreadsheet exports.
    pub docs_base: String,
    /// Spreadsheet id of the public recording index.
    pub recordings_sheet_id: String,
    /// Base URL of the chat web API.
    pub chat_api_base: String,
    /// Workspace URL used by the interactive chat login.
    pub chat_workspace_url: String,
    /// Host prefixed to relative transcript URLs.
    pub transcript_base: String,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir();
        Self {
            lookback: "7d".to_string(),
            groups: Vec::new(),
            output_dir: PathBuf::from("./reports"),
            format: "markdown".to_string(),
            db_path: "./wg-radar.db".to_string(),
            workers: 4,
            skip_notes: false,
            skip_videos: false,
            skip_chat: false,
            offline: false,
            context_file: config_dir.join("custom-context.md"),
            verbose: false,
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            anthropic_key: String::new(),
            openai_key: String::new(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_config_dir().join("chat-credentials.json"),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            catalog_url: "https://raw.githubusercontent.com/open-telemetry/community/main/README.md"
                .to_string(),
            docs_base: "https://docs.google.com".to_string(),
            recordings_sheet_id: "1SYKfjYhZdm2Wh2Cl6KVQalKg_m4NhTPZqq-8SzEVO6s".to_string(),
            chat_api_base: "https://slack.com/api".to_string(),
            chat_workspace_url: "https://cloud-native.slack.com".to_string(),
            transcript_base: "https://zoom.us".to_string(),
        }
    }
}

/// Directory for user-level state: `~/.config/wg-radar`.
fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("wg-radar")
}

/// Load configuration from an optional TOML file and the environment.
///
/// A missing file is only an error when the path was given explicitly.
/// API keys are read from `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`; they are
/// never read from the config file.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("reading config file {}", p.display()))?;
            toml::from_str(&content).with_context(|| "parsing config file")?
        }
        None => {
            let default_path = Path::new("./wg-radar.toml");
            if default_path.exists() {
                let content = std::fs::read_to_string(default_path)
                    .with_context(|| "reading ./wg-radar.toml")?;
                toml::from_str(&content).with_context(|| "parsing config file")?
            } else {
                Config::default()
            }
        }
    };

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        config.llm.anthropic_key = key;
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        config.llm.openai_key = key;
    }

    Ok(config)
}

impl Config {
    /// Validate the configuration. Failures map to exit code 3.
    pub fn validate(&self) -> Result<()> {
        if self.workers < 1 {
            bail!("workers must be >= 1, got {}", self.workers);
        }
        match self.format.as_str() {
            "markdown" | "json" => {}
            other => bail!("format must be 'markdown' or 'json', got {:?}", other),
        }
        match self.llm.provider.as_str() {
            "anthropic" => {
                if !self.offline && self.llm.anthropic_key.is_empty() {
                    bail!("ANTHROPIC_API_KEY is required when using the anthropic provider");
                }
            }
            "openai" => {
                if !self.offline && self.llm.openai_key.is_empty() {
                    bail!("OPENAI_API_KEY is required when using the openai provider");
                }
            }
            other => bail!("llm provider must be 'anthropic' or 'openai', got {:?}", other),
        }
        Ok(())
    }

    /// The API key for the configured provider.
    pub fn api_key(&self) -> &str {
        match self.llm.provider.as_str() {
            "openai" => &self.llm.openai_key,
            _ => &self.llm.anthropic_key,
        }
    }
}

/// Parse a lookback expression into a duration.
///
/// Recognizes `<N>d` (days), `<N>w` (weeks), `<N>m` (months of 30 days),
/// or a plain `h/m/s`-style duration such as `36h` or `2h30m`. The custom
/// day/week/month suffixes win over the plain parse, so `30m` means 30
/// months, not 30 minutes. Empty input defaults to 7 days.
pub fn parse_lookback(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Ok(Duration::days(7));
    }
    if s.len() < 2 {
        bail!("invalid lookback format: {:?}", s);
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    if let Ok(n) = num_str.parse::<i64>() {
        match unit {
            "d" => return Ok(Duration::days(n)),
            "w" => return Ok(Duration::weeks(n)),
            "m" => return Ok(Duration::days(n * 30)),
            _ => {}
        }
    }

    if let Some(d) = parse_plain_duration(&s) {
        return Ok(d);
    }

    bail!("invalid lookback format: {:?} (use Nd, Nw, Nm, or a duration like 36h)", s)
}

/// Parse a concatenated `h/m/s` duration string such as `2h30m` or `90s`.
fn parse_plain_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut num = String::new();
    let mut matched = false;

    for c in s.chars() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        let n: i64 = num.parse().ok()?;
        num.clear();
        total = total
            + match c {
                'h' => Duration::hours(n),
                'm' => Duration::minutes(n),
                's' => Duration::seconds(n),
                _ => return None,
            };
        matched = true;
    }

    if !num.is_empty() || !matched {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookback_days() {
        assert_eq!(parse_lookback("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_lookback("1d").unwrap(), Duration::days(1));
    }

    #[test]
    fn test_lookback_weeks_and_months() {
        assert_eq!(parse_lookback("2w").unwrap(), Duration::days(14));
        assert_eq!(parse_lookback("1m").unwrap(), Duration::days(30));
    }

    #[test]
    fn test_lookback_empty_defaults_to_week() {
        assert_eq!(parse_lookback("").unwrap(), Duration::days(7));
    }

    #[test]
    fn test_lookback_plain_durations() {
        assert_eq!(parse_lookback("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_lookback("2h30m").unwrap(), Duration::minutes(150));
        assert_eq!(parse_lookback("90s").unwrap(), Duration::seconds(90));
    }

    #[test]
    fn test_lookback_month_suffix_wins_over_minutes() {
        // `30m` is 30 months, not 30 minutes.
        assert_eq!(parse_lookback("30m").unwrap(), Duration::days(30 * 30));
    }

    #[test]
    fn test_lookback_invalid() {
        assert!(parse_lookback("abc").is_err());
        assert!(parse_lookback("d").is_err());
        assert!(parse_lookback("12x").is_err());
    }

    #[test]
    fn test_validate_workers() {
        let mut cfg = Config {
            offline: true,
            ..Config::default()
        };
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
        cfg.workers = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_format_and_provider() {
        let mut cfg = Config {
            offline: true,
            ..Config::default()
        };
        cfg.format = "yaml".to_string();
        assert!(cfg.validate().is_err());
        cfg.format = "json".to_string();
        assert!(cfg.validate().is_ok());

        cfg.llm.provider = "cohere".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_key_when_online() {
        let mut cfg = Config::default();
        cfg.llm.anthropic_key = String::new();
        cfg.offline = false;
        assert!(cfg.validate().is_err());
        cfg.llm.anthropic_key = "sk-test".to_string();
        assert!(cfg.validate().is_ok());
    }
}
