use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::harvest::Backoff;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between the end of one tick and the start of the next (default: 10000)
    pub tick_delay_ms: u64,

    /// Due repositories picked up per tick (default: 10)
    pub batch_size: usize,

    /// Repository harvests in flight at once (default: 3)
    pub concurrency: usize,

    /// Delay after the first consecutive failure (default: 60)
    pub backoff_base_secs: u64,

    /// Upper bound for the failure delay (default: 21600)
    pub backoff_max_secs: u64,

    /// Pagination pages followed per source (default: 5)
    pub max_pages: usize,

    /// Used for new repositories and when a stored expression cannot be parsed
    pub default_refresh: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_delay_ms: 10_000,
            batch_size: 10,
            concurrency: 3,
            backoff_base_secs: 60,
            backoff_max_secs: 6 * 3600,
            max_pages: 5,
            default_refresh: "1h".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_delay_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base_secs, self.backoff_max_secs)
    }
}
