use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the plain HTTP fetch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Used when no owner-specific timeout applies (default: 30000)
    pub timeout_ms: u64,

    /// Responses larger than this are rejected (default: 5 MiB)
    pub max_bytes: u64,

    /// Content-type prefixes accepted for static scrapes
    pub allowed_content_types: Vec<String>,

    /// Status code a static scrape must answer with (default: 200)
    pub expected_status: u16,

    /// Maximum number of redirects to follow (default: 5)
    pub redirect_limit: usize,

    /// How long identical GETs are served from memory; 0 disables the cache (default: 30)
    pub cache_ttl_secs: u64,

    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: default_allowed_content_types(),
            expected_status: 200,
            redirect_limit: 5,
            cache_ttl_secs: 30,
            user_agent: format!("gleaner/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub fn default_allowed_content_types() -> Vec<String> {
    [
        "text/",
        "application/xml",
        "application/json",
        "application/rss",
        "application/atom",
        "application/rdf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.expected_status, 200);
        assert_eq!(config.allowed_content_types.len(), 6);
        assert!(config.allowed_content_types.contains(&"text/".to_string()));
        assert!(config.user_agent.starts_with("gleaner/"));
    }
}
