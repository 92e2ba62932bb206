use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const DAILY_TIME_FORMAT: &str = "%H:%M";

/// Upper bound for cache thresholds: one year.
pub const MAX_CACHE_MINUTES: i64 = 365 * 24 * 60;

/// Upper bound for retention and warning windows: one hundred years.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,

    /// Age beyond which cached content is flagged as expired when served.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,

    /// Cache slot file; defaults to the user cache directory.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Direct,
    Proxy,
    FrontPage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub base_url: String,

    /// Proxy URL template containing `{url}`, for `kind = "proxy"`.
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_source_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "default_refresh_interval_minutes")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_ephemeral_days")]
    pub ephemeral_days: i64,

    #[serde(default = "default_durable_days")]
    pub durable_days: i64,

    #[serde(default = "default_ephemeral_warning_days")]
    pub ephemeral_warning_days: i64,

    #[serde(default = "default_durable_warning_days")]
    pub durable_warning_days: i64,

    /// Daily cleanup time, `HH:MM` in server local time.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,

    /// Saved-records file; defaults to the user data directory.
    #[serde(default)]
    pub records_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::NotFound(path.as_ref().display().to_string()))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_minutes <= 0 {
            return Err(ConfigError::Config("Cache TTL must be greater than 0".to_string()));
        }

        if self.cache.stale_after_minutes > MAX_CACHE_MINUTES {
            return Err(ConfigError::Config(format!(
                "stale_after_minutes must not exceed {}",
                MAX_CACHE_MINUTES
            )));
        }

        if self.cache.stale_after_minutes < self.cache.ttl_minutes {
            return Err(ConfigError::Config(
                "stale_after_minutes must not be shorter than ttl_minutes".to_string(),
            ));
        }

        crate::storage::CachePolicy::new(self.cache.ttl()?, self.cache.stale_after()?)?;

        if self.fetch.max_items == 0 {
            return Err(ConfigError::Config("max_items must be greater than 0".to_string()));
        }

        if self.fetch.batch_size == 0 {
            return Err(ConfigError::Config("batch_size must be greater than 0".to_string()));
        }

        if self.sources.is_empty() {
            return Err(ConfigError::Config("At least one source must be configured".to_string()));
        }

        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ConfigError::Config("Source name cannot be empty".to_string()));
            }

            url::Url::parse(&source.base_url)
                .map_err(|_| ConfigError::InvalidUrl(source.base_url.clone()))?;

            if source.timeout_secs == 0 {
                return Err(ConfigError::Config(format!(
                    "Source '{}' timeout must be greater than 0",
                    source.name
                )));
            }

            if source.kind == SourceKind::Proxy && source.proxy.is_none() {
                return Err(ConfigError::Config(format!(
                    "Source '{}' is a proxy but has no proxy template",
                    source.name
                )));
            }
        }

        if self.refresh.interval_minutes == 0 {
            return Err(ConfigError::Config("Refresh interval must be greater than 0".to_string()));
        }

        self.retention.daily_time()?;
        crate::retention::RetentionPolicy::from_settings(&self.retention)?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("NEWS_SHELF_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(ttl) = std::env::var("NEWS_SHELF_TTL_MINUTES") {
            if let Ok(val) = ttl.parse() {
                self.cache.ttl_minutes = val;
            }
        }

        if let Ok(interval) = std::env::var("NEWS_SHELF_REFRESH_MINUTES") {
            if let Ok(val) = interval.parse() {
                self.refresh.interval_minutes = val;
            }
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("news-shelf"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("news-shelf"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine data directory".to_string()))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join("news-shelf"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine cache directory".to_string()))
    }

    pub fn cache_file(&self) -> Result<PathBuf> {
        match &self.cache.file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::cache_dir()?.join("items_cache.json")),
        }
    }

    pub fn records_file(&self) -> Result<PathBuf> {
        match &self.retention.records_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("saved_items.json")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            sources: default_sources(),
            refresh: RefreshSettings::default(),
            retention: RetentionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Result<chrono::Duration> {
        cache_minutes("ttl_minutes", self.ttl_minutes)
    }

    pub fn stale_after(&self) -> Result<chrono::Duration> {
        cache_minutes("stale_after_minutes", self.stale_after_minutes)
    }
}

fn cache_minutes(field: &str, minutes: i64) -> Result<chrono::Duration> {
    if !(0..=MAX_CACHE_MINUTES).contains(&minutes) {
        return Err(ConfigError::Config(format!(
            "{} must be between 0 and {}, got {}",
            field, MAX_CACHE_MINUTES, minutes
        )));
    }
    chrono::Duration::try_minutes(minutes)
        .ok_or_else(|| ConfigError::Config(format!("{} is out of range: {}", field, minutes)))
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl RetentionSettings {
    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_at, DAILY_TIME_FORMAT).map_err(|e| {
            ConfigError::Config(format!("Invalid daily_at '{}' (expected HH:MM): {}", self.daily_at, e))
        })
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            stale_after_minutes: default_stale_after_minutes(),
            file: None,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            batch_size: default_batch_size(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_refresh_interval_minutes(),
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            ephemeral_days: default_ephemeral_days(),
            durable_days: default_durable_days(),
            ephemeral_warning_days: default_ephemeral_warning_days(),
            durable_warning_days: default_durable_warning_days(),
            daily_at: default_daily_at(),
            records_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
            json_format: false,
        }
    }
}

pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "hacker-news".to_string(),
            kind: SourceKind::Direct,
            base_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            proxy: None,
            timeout_secs: 10,
            attempts: 3,
            backoff_secs: 2,
        },
        SourceConfig {
            name: "algolia-front-page".to_string(),
            kind: SourceKind::FrontPage,
            base_url: "https://hn.algolia.com/api/v1".to_string(),
            proxy: None,
            timeout_secs: 15,
            attempts: 1,
            backoff_secs: 0,
        },
        SourceConfig {
            name: "allorigins".to_string(),
            kind: SourceKind::Proxy,
            base_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            proxy: Some("https://api.allorigins.win/raw?url={url}".to_string()),
            timeout_secs: 20,
            attempts: 1,
            backoff_secs: 0,
        },
    ]
}

fn default_ttl_minutes() -> i64 { 30 }
fn default_stale_after_minutes() -> i64 { 120 }
fn default_max_items() -> usize { 30 }
fn default_batch_size() -> usize { 5 }
fn default_user_agent() -> String {
    format!("news-shelf/{}", env!("CARGO_PKG_VERSION"))
}
fn default_source_timeout() -> u64 { 10 }
fn default_source_attempts() -> u32 { 1 }
fn default_refresh_interval_minutes() -> u64 { 30 }

fn default_ephemeral_days() -> i64 { 15 }
fn default_durable_days() -> i64 { 365 }
fn default_ephemeral_warning_days() -> i64 { 3 }
fn default_durable_warning_days() -> i64 { 7 }
fn default_daily_at() -> String { "02:00".to_string() }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "logs/news-shelf.log".to_string() }
