use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::{CacheConfig, MergePolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<FeedSource>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One configured RSS source and the region its articles belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub url: String,
    pub region: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Category for items that don't carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Publisher name override; derived from the URL host otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_concurrent_fetches")]
    pub concurrent_fetches: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u64,

    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: f64,

    #[serde(default = "default_digest_limit")]
    pub digest_limit: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
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

impl FeedSource {
    pub fn new(url: impl Into<String>, region: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            region: region.into(),
            language: language.into(),
            category: None,
            name: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| crate::feed::source_name(&self.url))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(path.as_ref().display().to_string()))?;

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
            .map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for source in &self.sources {
            if source.region.trim().is_empty() {
                return Err(Error::Config(format!("Source {} has an empty region", source.url)));
            }

            let url = url::Url::parse(&source.url)
                .map_err(|_| Error::InvalidUrl(source.url.clone()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidUrl(source.url.clone()));
            }
        }

        if self.settings.concurrent_fetches == 0 {
            return Err(Error::Config("Concurrent fetches must be greater than 0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.cache.reset_threshold) {
            return Err(Error::Config(format!(
                "Reset threshold must be between 0 and 1, got {}",
                self.cache.reset_threshold
            )));
        }

        if self.cache.expiry_hours == 0 {
            return Err(Error::Config("Cache expiry must be at least one hour".to_string()));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("REGIONAL_NEWS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(dir) = std::env::var("REGIONAL_NEWS_CACHE_DIR") {
            self.cache.cache_dir = Some(PathBuf::from(dir));
        }

        if let Ok(hours) = std::env::var("REGIONAL_NEWS_EXPIRY_HOURS") {
            if let Ok(val) = hours.parse() {
                self.cache.expiry_hours = val;
            }
        }
    }

    /// Sorted, deduplicated list of configured regions.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.sources.iter().map(|s| s.region.clone()).collect();
        regions.sort();
        regions.dedup();
        regions
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            expiry_interval: Duration::from_secs(self.cache.expiry_hours * 60 * 60),
            merge_policy: MergePolicy {
                reset_threshold: self.cache.reset_threshold,
            },
            ..CacheConfig::default()
        }
    }

    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::cache_dir(),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("regional-news"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join("regional-news"))
            .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            settings: Settings::default(),
            cache: CacheSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrent_fetches: default_concurrent_fetches(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
            reset_threshold: default_reset_threshold(),
            digest_limit: default_digest_limit(),
            cache_dir: None,
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

fn default_sources() -> Vec<FeedSource> {
    vec![
        FeedSource::new("https://news.err.ee/rss", "Estonia", "en"),
        FeedSource::new("https://eng.lsm.lv/rss/", "Latvia", "en"),
        FeedSource::new("https://www.lrt.lt/en/news-in-english?rss", "Lithuania", "en"),
        FeedSource::new("https://yle.fi/rss/uutiset/tuoreimmat", "Finland", "fi"),
    ]
}

fn default_language() -> String { "en".to_string() }
fn default_concurrent_fetches() -> usize { 5 }
fn default_user_agent() -> String {
    format!("regional-news/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout() -> u64 { 30 }

fn default_expiry_hours() -> u64 { 6 }
fn default_reset_threshold() -> f64 { MergePolicy::DEFAULT_RESET_THRESHOLD }
fn default_digest_limit() -> usize { 5 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "logs/regional-news.log".to_string() }
