//! Scheduled harvesting of repositories.
//!
//! A [`HarvestScheduler`] ticks with a fixed delay, claims due repositories and runs a
//! [`Harvest`] for each of them behind a semaphore. [`RepositoryHarvester`] is the real
//! harvest routine; [`RetentionManager`] trims stored documents afterwards.

pub mod config;
mod harvester;
mod retention;
mod schedule;
mod scheduler;

pub use config::SchedulerConfig;
pub use harvester::{Harvest, HarvestReport, RepositoryHarvester, DEFAULT_MAX_PAGES};
pub use retention::RetentionManager;
pub use schedule::{format_interval, parse_interval, Backoff, RefreshExpression};
pub use scheduler::{HarvestScheduler, TickSummary};
