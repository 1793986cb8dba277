//! Run configuration
//!
//! Read once at run start and immutable afterwards. Everything has a
//! default; only the watchlist file and the automation endpoint can make
//! loading fail.

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use snapshot_browser::{MAX_SESSION_TIMEOUT, SessionParams};
use snapshot_core::{SourceName, Ticker, parse_watchlist};
use snapshot_utils::env::{parse_flag, parse_string, parse_value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Watchlist used when no watchlist file exists
pub const DEFAULT_WATCHLIST: [&str; 2] = ["AAPL", "GOOGL"];

/// Retry budget for one operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay)
    }
}

/// News search limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsSettings {
    /// Stories kept per ticker
    pub max_stories: usize,
    /// Only stories from the last N days
    pub max_days: u32,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            max_stories: 5,
            max_days: 2,
        }
    }
}

/// Login for the knowledge-base site
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Knowledge-base report settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    /// How many days of reports to read
    pub days_back: u32,
    /// Offset of the site's local time (US Eastern) from UTC, in hours
    pub et_offset_hours: i32,
    /// Local hour the per-ticker report window starts at, `days_back` days ago
    pub ticker_window_hour: u32,
    /// Local hour the macro report window starts at, `days_back` days ago
    pub macro_window_hour: u32,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            days_back: 2,
            et_offset_hours: -5,
            ticker_window_hour: 12,
            macro_window_hour: 16,
            username: None,
            password: None,
        }
    }
}

impl KnowledgeSettings {
    /// Both halves of the login, if configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Remote automation service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationSettings {
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    /// Inspector link template, `{id}` is replaced by the session id
    pub inspector_template: Option<String>,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            api_key: None,
            inspector_template: Some("https://www.browserbase.com/sessions/{id}".to_string()),
        }
    }
}

/// Configuration for one snapshot run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Tickers to fetch, in report order
    pub watchlist: Vec<Ticker>,
    /// Sources that run
    pub enabled_sources: BTreeSet<SourceName>,
    /// Browser sessions open at once
    pub max_concurrency: usize,
    pub navigation_retry: RetrySettings,
    pub extraction_retry: RetrySettings,
    /// Session parameters passed to the provider
    pub session: SessionParams,
    /// Optional cap on sessions opened per minute
    pub sessions_per_minute: Option<u32>,
    /// Optional supervisory timeout for the whole run
    pub run_timeout: Option<Duration>,
    /// Record page-state checkpoints after navigation
    pub guardrails: bool,
    pub news: NewsSettings,
    pub knowledge: KnowledgeSettings,
    pub selector_cache_path: PathBuf,
    pub selector_cache_ttl: Option<Duration>,
    /// Root for snapshots, metrics and error logs
    pub data_dir: PathBuf,
    pub automation: AutomationSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            watchlist: DEFAULT_WATCHLIST
                .iter()
                .filter_map(|s| Ticker::new(s).ok())
                .collect(),
            enabled_sources: SourceName::ALL
                .into_iter()
                .filter(|s| s.enabled_by_default())
                .collect(),
            max_concurrency: 2,
            navigation_retry: RetrySettings {
                max_retries: 2,
                base_delay: Duration::from_secs(1),
            },
            extraction_retry: RetrySettings {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
            },
            session: SessionParams::default(),
            sessions_per_minute: None,
            run_timeout: None,
            guardrails: true,
            news: NewsSettings::default(),
            knowledge: KnowledgeSettings::default(),
            selector_cache_path: PathBuf::from("data/cache/selectors.json"),
            selector_cache_ttl: None,
            data_dir: PathBuf::from("data"),
            automation: AutomationSettings::default(),
        }
    }
}

impl RunConfig {
    /// Create a new configuration builder
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, map in tests).
    ///
    /// Unparsable numbers and flags fall back to their defaults with a
    /// warning. The watchlist file is the only hard failure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| parse_string(lookup(key).as_deref());
        let number = |key: &str| -> Option<u64> {
            let raw = get(key)?;
            let parsed = parse_value(Some(&raw));
            if parsed.is_none() {
                warn!(variable = key, value = %raw, "Ignoring unparsable number");
            }
            parsed
        };
        let flag = |key: &str, default: bool| -> bool {
            match get(key) {
                None => default,
                Some(raw) => parse_flag(Some(&raw)).unwrap_or_else(|| {
                    warn!(
                        variable = key,
                        value = %raw,
                        default,
                        "Unrecognised boolean, using default"
                    );
                    default
                }),
            }
        };

        let enabled_sources = SourceName::ALL
            .into_iter()
            .filter(|s| flag(s.env_flag(), s.enabled_by_default()))
            .collect();

        let watchlist_path = get("WATCHLIST_PATH").map_or_else(
            || PathBuf::from("config/watchlist.json"),
            PathBuf::from,
        );
        let watchlist = load_watchlist(&watchlist_path)?;

        let base_delay = number("RETRY_BASE_DELAY_MS")
            .map_or(defaults.navigation_retry.base_delay, Duration::from_millis);

        let session = SessionParams {
            region: get("BROWSERBASE_REGION").unwrap_or(defaults.session.region),
            keep_alive: flag("BROWSERBASE_KEEP_ALIVE", defaults.session.keep_alive),
            timeout: number("BROWSERBASE_TIMEOUT")
                .map_or(defaults.session.timeout, Duration::from_secs),
        }
        .clamped();

        let config = Self {
            watchlist,
            enabled_sources,
            max_concurrency: number("MAX_CONCURRENT_BROWSERS")
                .map_or(defaults.max_concurrency, |n| (n as usize).max(1)),
            navigation_retry: RetrySettings {
                max_retries: number("NAV_MAX_RETRIES")
                    .map_or(defaults.navigation_retry.max_retries, |n| n as u32),
                base_delay,
            },
            extraction_retry: RetrySettings {
                max_retries: number("EXTRACT_MAX_RETRIES")
                    .map_or(defaults.extraction_retry.max_retries, |n| n as u32),
                base_delay,
            },
            session,
            sessions_per_minute: number("SESSIONS_PER_MINUTE")
                .map(|n| n as u32)
                .filter(|n| *n > 0),
            run_timeout: number("RUN_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs),
            guardrails: flag("ENABLE_GUARDRAILS", defaults.guardrails),
            news: defaults.news,
            knowledge: KnowledgeSettings {
                days_back: number("VITAL_DAYS_BACK")
                    .map_or(defaults.knowledge.days_back, |n| n as u32),
                username: get("VITAL_LOGIN"),
                password: get("VITAL_PASSWORD"),
                ..defaults.knowledge
            },
            selector_cache_path: get("SELECTOR_CACHE_PATH")
                .map_or(defaults.selector_cache_path, PathBuf::from),
            selector_cache_ttl: number("SELECTOR_CACHE_TTL_SECS").map(Duration::from_secs),
            data_dir: get("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            automation: AutomationSettings {
                base_url: get("AUTOMATION_BASE_URL").unwrap_or(defaults.automation.base_url),
                api_key: get("AUTOMATION_API_KEY"),
                inspector_template: get("SESSION_INSPECTOR_URL")
                    .or(defaults.automation.inspector_template),
            },
        };

        config.validate()?;
        info!(
            tickers = config.watchlist.len(),
            sources = config.enabled_sources.len(),
            max_concurrency = config.max_concurrency,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.watchlist.is_empty() {
            return Err(EngineError::Configuration("watchlist is empty".to_string()));
        }

        if self.max_concurrency == 0 {
            return Err(EngineError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.session.timeout.is_zero() || self.session.timeout > MAX_SESSION_TIMEOUT {
            return Err(EngineError::Configuration(format!(
                "session timeout must be between 1 and {} seconds",
                MAX_SESSION_TIMEOUT.as_secs()
            )));
        }

        if self.knowledge.days_back == 0 {
            return Err(EngineError::Configuration(
                "knowledge days_back must be at least 1".to_string(),
            ));
        }

        if self.knowledge.ticker_window_hour > 23 || self.knowledge.macro_window_hour > 23 {
            return Err(EngineError::Configuration(
                "report window hours must be between 0 and 23".to_string(),
            ));
        }

        if self.automation.base_url.trim().is_empty() {
            return Err(EngineError::Configuration(
                "automation base URL is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a source runs in this configuration
    pub fn is_enabled(&self, source: SourceName) -> bool {
        self.enabled_sources.contains(&source)
    }

    pub fn navigation_policy(&self) -> RetryPolicy {
        self.navigation_retry.policy()
    }

    pub fn extraction_policy(&self) -> RetryPolicy {
        self.extraction_retry.policy()
    }
}

/// Read a watchlist file: a JSON array of symbols.
///
/// A missing file yields the default watchlist. An unreadable or malformed
/// file, an empty list or an invalid symbol is a configuration error.
pub fn load_watchlist(path: &Path) -> Result<Vec<Ticker>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Watchlist file not found, using default watchlist");
            return Ok(parse_watchlist(DEFAULT_WATCHLIST)?);
        }
        Err(e) => {
            return Err(EngineError::Configuration(format!(
                "cannot read watchlist {}: {e}",
                path.display()
            )));
        }
    };

    let symbols: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
        EngineError::Configuration(format!(
            "watchlist {} is not a JSON array of symbols: {e}",
            path.display()
        ))
    })?;

    let tickers = parse_watchlist(&symbols)
        .map_err(|e| EngineError::Configuration(format!("watchlist {}: {e}", path.display())))?;

    if tickers.is_empty() {
        return Err(EngineError::Configuration(format!(
            "watchlist {} is empty",
            path.display()
        )));
    }
    Ok(tickers)
}

/// Builder for RunConfig
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    watchlist: Option<Vec<Ticker>>,
    enabled_sources: Option<BTreeSet<SourceName>>,
    max_concurrency: Option<usize>,
    navigation_retry: Option<RetrySettings>,
    extraction_retry: Option<RetrySettings>,
    session: Option<SessionParams>,
    sessions_per_minute: Option<u32>,
    run_timeout: Option<Duration>,
    guardrails: Option<bool>,
    news: Option<NewsSettings>,
    knowledge: Option<KnowledgeSettings>,
    data_dir: Option<PathBuf>,
    automation: Option<AutomationSettings>,
}

impl RunConfigBuilder {
    /// Set the watchlist
    pub fn watchlist(mut self, watchlist: Vec<Ticker>) -> Self {
        self.watchlist = Some(watchlist);
        self
    }

    /// Run exactly these sources
    pub fn sources(mut self, sources: impl IntoIterator<Item = SourceName>) -> Self {
        self.enabled_sources = Some(sources.into_iter().collect());
        self
    }

    /// Set the number of concurrent sessions
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Set the navigation retry budget
    pub fn navigation_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.navigation_retry = Some(RetrySettings {
            max_retries,
            base_delay,
        });
        self
    }

    /// Set the extraction retry budget
    pub fn extraction_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.extraction_retry = Some(RetrySettings {
            max_retries,
            base_delay,
        });
        self
    }

    /// Set session parameters
    pub fn session(mut self, session: SessionParams) -> Self {
        self.session = Some(session);
        self
    }

    /// Cap session creation per minute
    pub fn sessions_per_minute(mut self, n: u32) -> Self {
        self.sessions_per_minute = Some(n);
        self
    }

    /// Set a supervisory run timeout
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Toggle page-state checkpoints
    pub fn guardrails(mut self, enabled: bool) -> Self {
        self.guardrails = Some(enabled);
        self
    }

    /// Set news search limits
    pub fn news(mut self, news: NewsSettings) -> Self {
        self.news = Some(news);
        self
    }

    /// Set knowledge-base settings
    pub fn knowledge(mut self, knowledge: KnowledgeSettings) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Set the artifact directory
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the automation endpoint
    pub fn automation(mut self, automation: AutomationSettings) -> Self {
        self.automation = Some(automation);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RunConfig> {
        let defaults = RunConfig::default();
        let config = RunConfig {
            watchlist: self.watchlist.unwrap_or(defaults.watchlist),
            enabled_sources: self.enabled_sources.unwrap_or(defaults.enabled_sources),
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            navigation_retry: self.navigation_retry.unwrap_or(defaults.navigation_retry),
            extraction_retry: self.extraction_retry.unwrap_or(defaults.extraction_retry),
            session: self.session.unwrap_or(defaults.session),
            sessions_per_minute: self.sessions_per_minute.or(defaults.sessions_per_minute),
            run_timeout: self.run_timeout.or(defaults.run_timeout),
            guardrails: self.guardrails.unwrap_or(defaults.guardrails),
            news: self.news.unwrap_or(defaults.news),
            knowledge: self.knowledge.unwrap_or(defaults.knowledge),
            selector_cache_path: defaults.selector_cache_path,
            selector_cache_ttl: defaults.selector_cache_ttl,
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            automation: self.automation.unwrap_or(defaults.automation),
        };
        config.validate()?;
        Ok(config)
    }
}
