//! Configuration management for Gleaner.
//!
//! Configuration is read from `~/.config/gleaner/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use crate::entitlements::EntitlementsConfig;
use crate::fetcher::FetchConfig;
use crate::harvest::SchedulerConfig;
use crate::render::RenderConfig;
use crate::scrape::ReadabilityOptions;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub readability: ReadabilityOptions,
    pub scheduler: SchedulerConfig,
    pub entitlements: EntitlementsConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Like [`Config::load`], for an explicit path.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/gleaner/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("gleaner").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Gleaner Configuration
#
# Every key is optional; removed keys fall back to the values shown here.

[fetch]
# Timeout of a plain HTTP fetch when no owner limit applies (milliseconds)
timeout_ms = 30000

# Responses larger than this are rejected (bytes)
max_bytes = 5242880

# Content-type prefixes accepted for static scrapes
allowed_content_types = [
    "text/",
    "application/xml",
    "application/json",
    "application/rss",
    "application/atom",
    "application/rdf",
]

# Status code a static scrape must answer with
expected_status = 200

# Maximum number of redirects to follow
redirect_limit = 5

# How long identical GETs are served from memory, 0 disables (seconds)
cache_ttl_secs = 30

[render]
# Run browser in headless mode (no visible window)
headless = true

# Wait time after page load for dynamic content (milliseconds)
wait_after_load_ms = 1000

# Quiet period that counts as network idle (milliseconds)
network_idle_ms = 500

# Maximum concurrent browser pages
max_concurrency = 3

[render.default_viewport]
width = 1280
height = 800
is_mobile = false

[readability]
# Characters of text a content candidate needs
min_content_length = 100

# CSS selectors to try for article content extraction (in priority order)
content_selectors = [
    "article",
    "[role=\"main\"]",
    "main",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".content",
    "#content",
    ".post",
    ".article",
    ".blog-post",
]

# Elements to remove before extraction (ads, navigation, etc.)
remove_selectors = [
    "nav",
    "header",
    "footer",
    "aside",
    "form",
    ".sidebar",
    ".advertisement",
    ".ad",
    ".ads",
    ".social-share",
    ".comments",
    ".related-posts",
    "script",
    "style",
    "noscript",
    "iframe",
]

[scheduler]
# Pause between the end of one tick and the next (milliseconds)
tick_delay_ms = 10000

# Due repositories picked up per tick
batch_size = 10

# Repository harvests in flight at once
concurrency = 3

# Failure backoff: base * 2^(failures - 1), capped (seconds)
backoff_base_secs = 60
backoff_max_secs = 21600

# Pagination pages followed per source
max_pages = 5

# Refresh expression for new repositories: "30m", "1h", "1d" or a
# six-field cron expression such as "0 0 */6 * * *"
default_refresh = "1h"

[entitlements]
# Hard timeout of a single fetch or render (milliseconds)
timeout_ms = 30000

# Sources an owner may have across all active repositories
max_active_sources = 100

# Sources a single repository or scrape call may name
max_sources_per_repository = 10

# Per-owner overrides:
# [entitlements.owners.someone]
# timeout_ms = 60000
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.fetch.timeout_ms, 30_000);
        assert_eq!(config.render.default_viewport.width, 1280);
        assert_eq!(config.scheduler.concurrency, 3);
        assert_eq!(config.entitlements.max_sources_per_repository, 10);
        assert_eq!(
            config.readability.content_selectors,
            ReadabilityOptions::default().content_selectors
        );
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[scheduler]
batch_size = 4

[entitlements.owners.alice]
timeout_ms = 5000
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.scheduler.batch_size, 4);
        assert_eq!(config.scheduler.concurrency, 3);
        assert_eq!(config.entitlements.owners["alice"].timeout_ms, Some(5000));
        assert_eq!(config.fetch.expected_status, 200);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.scheduler.default_refresh, "1h");
        assert!(config.render.headless);
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scheduler.batch_size, 10);

        fs::write(&path, "[scheduler]\nconcurrency = 7\n").unwrap();
        assert_eq!(Config::load_from(&path).unwrap().scheduler.concurrency, 7);

        fs::write(&path, "[scheduler\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
