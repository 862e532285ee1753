use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Viewport;

/// Configuration for the headless browser render engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Whether to run the browser in headless mode (default: true)
    pub headless: bool,

    /// Wait time after page load for dynamic content in milliseconds (default: 1000)
    pub wait_after_load_ms: u64,

    /// Quiet period that counts as network idle in milliseconds (default: 500)
    pub network_idle_ms: u64,

    /// Viewport used when a request does not name one
    pub default_viewport: Viewport,

    /// Maximum concurrent browser pages (default: 3)
    pub max_concurrency: usize,

    /// User agent string to use
    pub user_agent: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            headless: true,
            wait_after_load_ms: 1000,
            network_idle_ms: 500,
            default_viewport: Viewport::default(),
            max_concurrency: 3,
            user_agent: Some(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        }
    }
}

impl RenderConfig {
    pub fn wait_after_load(&self) -> Duration {
        Duration::from_millis(self.wait_after_load_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = RenderConfig::default();
        assert!(config.headless);
        assert_eq!(config.wait_after_load(), Duration::from_millis(1000));
        assert_eq!(config.network_idle(), Duration::from_millis(500));
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.default_viewport.width, 1280);
        assert!(config.user_agent.is_some());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RenderConfig = toml::from_str("headless = false\nmax_concurrency = 1").unwrap();
        assert!(!config.headless);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.wait_after_load_ms, 1000);
    }
}
