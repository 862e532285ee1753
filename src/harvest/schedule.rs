use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use crate::app::{GleanerError, Result};

/// When a repository is harvested next.
///
/// Either an interval shorthand (`90s`, `30m`, `6h`, `1d` or raw seconds) or a
/// seconds-first cron expression (`0 */15 * * * *`).
#[derive(Debug, Clone)]
pub enum RefreshExpression {
    Interval(Duration),
    Cron(Box<Schedule>),
}

impl RefreshExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(GleanerError::Config("refresh expression is empty".into()));
        }

        if !expression.contains(char::is_whitespace) {
            let secs = parse_interval(expression).map_err(GleanerError::Config)?;
            if secs == 0 {
                return Err(GleanerError::Config("refresh interval must be positive".into()));
            }
            let every = i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .filter(|every| Utc::now().checked_add_signed(*every).is_some())
                .ok_or_else(|| GleanerError::Config(format!("refresh interval '{}' is out of range", expression)))?;
            return Ok(Self::Interval(every));
        }

        Schedule::from_str(expression)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|e| GleanerError::Config(format!("invalid cron expression '{}': {}", expression, e)))
    }

    /// First run strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(every) => now.checked_add_signed(*every),
            Self::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

/// Parse interval string like "1h", "30m", "6h", "1d"
pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().to_lowercase();

    let (digits, factor) = if let Some(days) = s.strip_suffix('d') {
        (days, 86_400)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600)
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s.as_str(), 1)
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(factor))
        .ok_or_else(|| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
}

/// Format interval for display
pub fn format_interval(secs: u64) -> String {
    if secs >= 86_400 && secs.is_multiple_of(86_400) {
        format!("{}d", secs / 86_400)
    } else if secs >= 3_600 && secs.is_multiple_of(3_600) {
        format!("{}h", secs / 3_600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Longest delay a backoff will produce.
const MAX_BACKOFF_SECS: u64 = 366 * 86_400;

/// Capped exponential delay after consecutive failures: `base * 2^(n-1)`, at most `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Backoff {
    pub fn new(base_secs: u64, max_secs: u64) -> Self {
        let base_secs = base_secs.clamp(1, MAX_BACKOFF_SECS);
        Self {
            base_secs,
            max_secs: max_secs.clamp(base_secs, MAX_BACKOFF_SECS),
        }
    }

    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63);
        let secs = self
            .base_secs
            .checked_mul(1u64 << exponent)
            .unwrap_or(u64::MAX)
            .min(self.max_secs)
            .min(MAX_BACKOFF_SECS);
        Duration::try_seconds(secs as i64).unwrap_or(Duration::days(366))
    }
}
