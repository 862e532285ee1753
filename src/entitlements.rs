//! Per-owner limits applied before any network call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub trait Entitlements: Send + Sync {
    /// Hard timeout of a single fetch or render.
    fn timeout_ms_for(&self, owner: Option<&str>) -> u64;

    fn max_active_sources_for(&self, owner: Option<&str>) -> usize;

    fn max_sources_per_repository_for(&self, owner: Option<&str>) -> usize;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementLimits {
    pub timeout_ms: Option<u64>,
    pub max_active_sources: Option<usize>,
    pub max_sources_per_repository: Option<usize>,
}

/// Static limits from the config file, with optional per-owner overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementsConfig {
    /// Timeout of a fetch or render in milliseconds (default: 30000)
    pub timeout_ms: u64,

    /// Sources an owner may have across all active repositories (default: 100)
    pub max_active_sources: usize,

    /// Sources a single repository or scrape call may name (default: 10)
    pub max_sources_per_repository: usize,

    /// Overrides keyed by owner id
    pub owners: HashMap<String, EntitlementLimits>,
}

impl Default for EntitlementsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_active_sources: 100,
            max_sources_per_repository: 10,
            owners: HashMap::new(),
        }
    }
}

impl EntitlementsConfig {
    fn limits(&self, owner: Option<&str>) -> Option<&EntitlementLimits> {
        owner.and_then(|id| self.owners.get(id))
    }
}

impl Entitlements for EntitlementsConfig {
    fn timeout_ms_for(&self, owner: Option<&str>) -> u64 {
        self.limits(owner)
            .and_then(|l| l.timeout_ms)
            .unwrap_or(self.timeout_ms)
    }

    fn max_active_sources_for(&self, owner: Option<&str>) -> usize {
        self.limits(owner)
            .and_then(|l| l.max_active_sources)
            .unwrap_or(self.max_active_sources)
    }

    fn max_sources_per_repository_for(&self, owner: Option<&str>) -> usize {
        self.limits(owner)
            .and_then(|l| l.max_sources_per_repository)
            .unwrap_or(self.max_sources_per_repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_owner() {
        let config = EntitlementsConfig::default();
        assert_eq!(config.timeout_ms_for(None), 30_000);
        assert_eq!(config.max_sources_per_repository_for(Some("unknown")), 10);
    }

    #[test]
    fn test_owner_override() {
        let config: EntitlementsConfig = toml::from_str(
            r#"
timeout_ms = 10000

[owners.pro]
timeout_ms = 60000
max_sources_per_repository = 50
"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms_for(None), 10_000);
        assert_eq!(config.timeout_ms_for(Some("pro")), 60_000);
        assert_eq!(config.max_sources_per_repository_for(Some("pro")), 50);
        assert_eq!(config.max_active_sources_for(Some("pro")), 100);
    }
}
