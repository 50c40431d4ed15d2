//! Configuration loader and validator for the source list.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Polling more often than this risks upstream rate limits.
pub const MIN_INTERVAL_SECONDS: u64 = 30;

/// Upper bound for `rss.initial_max_age_minutes`: 100 years.
pub const MAX_LOOKBACK_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Twitter handles and Facebook page names are spliced into API paths.
static ACCOUNT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("account name regex"));

/// Dedup namespaces used by the social adapters.
const RESERVED_FEED_NAMES: [&str; 3] = ["twitter", "facebook", "truth"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub interval_seconds: u64,
    pub data_dir: String,
    pub request_timeout_seconds: u64,
    pub twitter: TwitterCfg,
    pub facebook: FacebookCfg,
    pub truth_social: TruthSocialCfg,
    pub rss: RssCfg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: 120,
            data_dir: "./data".into(),
            request_timeout_seconds: 20,
            twitter: TwitterCfg::default(),
            facebook: FacebookCfg::default(),
            truth_social: TruthSocialCfg::default(),
            rss: RssCfg::default(),
        }
    }
}

/// Twitter/X accounts polled through the v2 timeline API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TwitterCfg {
    pub enabled: bool,
    pub users: Vec<String>,
    pub max_per_user: u32,
}

impl Default for TwitterCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            users: Vec::new(),
            max_per_user: 5,
        }
    }
}

/// Facebook pages polled through the Graph API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FacebookCfg {
    pub enabled: bool,
    pub pages: Vec<String>,
    pub max_per_page: u32,
}

impl Default for FacebookCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            pages: Vec::new(),
            max_per_page: 5,
        }
    }
}

/// Truth Social accounts, polled through the Mastodon-compatible API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TruthSocialCfg {
    pub enabled: bool,
    pub users: Vec<String>,
    pub max_per_user: u32,
}

impl Default for TruthSocialCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            users: Vec::new(),
            max_per_user: 5,
        }
    }
}

/// A single RSS/Atom feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RssFeed {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub include_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RssCfg {
    pub enabled: bool,
    pub feeds: Vec<RssFeed>,
    pub max_per_feed: u32,
    pub initial_max_age_minutes: i64,
}

impl Default for RssCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            feeds: Vec::new(),
            max_per_feed: 10,
            initial_max_age_minutes: 1440,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.data_dir)
    }

    /// Effective sleep between cycles, never below [`MIN_INTERVAL_SECONDS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(MIN_INTERVAL_SECONDS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Default SQLite location inside `data_dir`.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/feedwatch.db",
            self.data_dir.trim_end_matches('/')
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `sources.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("sources.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate configuration from a YAML string.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    if cfg.interval_seconds < MIN_INTERVAL_SECONDS {
        tracing::warn!(
            configured = cfg.interval_seconds,
            floor = MIN_INTERVAL_SECONDS,
            "interval_seconds below floor; clamping"
        );
    }
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("data_dir must be non-empty".into()));
    }
    if cfg.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "request_timeout_seconds must be > 0".into(),
        ));
    }

    if cfg.twitter.max_per_user == 0 {
        return Err(ConfigError::Invalid("twitter.max_per_user must be > 0".into()));
    }
    if cfg.twitter.users.iter().any(|u| u.trim().is_empty()) {
        return Err(ConfigError::Invalid("twitter.users must be non-empty".into()));
    }
    check_account_names("twitter.users", &cfg.twitter.users)?;

    if cfg.facebook.max_per_page == 0 {
        return Err(ConfigError::Invalid("facebook.max_per_page must be > 0".into()));
    }
    if cfg.facebook.pages.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Invalid("facebook.pages must be non-empty".into()));
    }
    check_account_names("facebook.pages", &cfg.facebook.pages)?;

    if cfg.truth_social.max_per_user == 0 {
        return Err(ConfigError::Invalid(
            "truth_social.max_per_user must be > 0".into(),
        ));
    }
    if cfg.truth_social.users.iter().any(|u| u.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "truth_social.users must be non-empty".into(),
        ));
    }

    if cfg.rss.max_per_feed == 0 {
        return Err(ConfigError::Invalid("rss.max_per_feed must be > 0".into()));
    }
    if !(0..=MAX_LOOKBACK_MINUTES).contains(&cfg.rss.initial_max_age_minutes) {
        return Err(ConfigError::Invalid(format!(
            "rss.initial_max_age_minutes must be between 0 and {MAX_LOOKBACK_MINUTES}"
        )));
    }
    // Feed names double as dedup namespaces and cursor keys.
    let mut names = HashSet::new();
    for feed in &cfg.rss.feeds {
        if feed.name.trim().is_empty() {
            return Err(ConfigError::Invalid("rss.feeds[].name must be non-empty".into()));
        }
        if feed.url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "rss.feeds[{}].url must be non-empty",
                feed.name
            )));
        }
        if RESERVED_FEED_NAMES.contains(&feed.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "rss.feeds[].name is reserved: {}",
                feed.name
            )));
        }
        if !names.insert(feed.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "rss.feeds[].name must be unique: {}",
                feed.name
            )));
        }
    }

    Ok(())
}

fn check_account_names(field: &str, names: &[String]) -> Result<(), ConfigError> {
    match names.iter().find(|n| !ACCOUNT_NAME.is_match(n)) {
        Some(bad) => Err(ConfigError::Invalid(format!(
            "{field} may only contain letters, digits, '_' and '.': {bad}"
        ))),
        None => Ok(()),
    }
}

/// Returns an example YAML config covering every source kind.
pub fn example() -> &'static str {
    r#"interval_seconds: 120
data_dir: "./data"
request_timeout_seconds: 20

twitter:
  enabled: false
  users:
    - nasa
  max_per_user: 5

facebook:
  enabled: false
  pages:
    - NASA
  max_per_page: 5

truth_social:
  enabled: false
  users:
    - someone
  max_per_user: 5

rss:
  enabled: true
  max_per_feed: 10
  initial_max_age_minutes: 1440
  feeds:
    - name: "NASA Breaking News"
      url: "https://www.nasa.gov/rss/dyn/breaking_news.rss"
    - name: "ESA Missions"
      url: "https://www.esa.int/rssfeed/Our_Activities/Space_Science"
      include_keywords:
        - mission
        - launch
"#
}
