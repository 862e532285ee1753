use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::app::{child_corr_id, new_corr_id, GleanerError, Result};
use crate::domain::Repository;
use crate::harvest::{Backoff, Harvest, HarvestReport, RefreshExpression, SchedulerConfig};
use crate::store::{ScheduleUpdate, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Periodically harvests due repositories, at most `concurrency` at a time.
pub struct HarvestScheduler {
    store: Arc<dyn Store>,
    harvester: Arc<dyn Harvest>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
}

impl HarvestScheduler {
    pub fn new(store: Arc<dyn Store>, harvester: Arc<dyn Harvest>, config: SchedulerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            store,
            harvester,
            config,
        }
    }

    /// Ticks until `shutdown` turns true. The delay runs from the end of each tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let released = self.store.reset_running_repositories()?;
        if released > 0 {
            warn!(released, "Released repositories left running by a previous process");
        }
        info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            "Scheduler started"
        );

        while !*shutdown.borrow() {
            if let Err(e) = self.tick().await {
                error!("Tick failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_delay()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn tick(&self) -> Result<TickSummary> {
        self.tick_at(Utc::now()).await
    }

    /// One batch: due query, claim, harvest concurrently, reschedule. Awaits every harvest.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let corr_id = new_corr_id();
        let due = self.store.find_due_repositories(now, self.config.batch_size)?;
        let mut summary = TickSummary {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!(corr_id = %corr_id, "Nothing due");
            return Ok(summary);
        }
        info!(corr_id = %corr_id, due = due.len(), "Tick");

        let mut handles = Vec::new();
        for repository in due {
            if !self.store.claim_repository(&repository.id)? {
                debug!(corr_id = %corr_id, repository = %repository.id, "Already running, skipped");
                continue;
            }
            summary.claimed += 1;

            let repo_corr = child_corr_id(&corr_id);
            let semaphore = self.semaphore.clone();
            let harvester = self.harvester.clone();
            let store = self.store.clone();
            let backoff = self.config.backoff();
            let default_refresh = self.config.default_refresh.clone();

            handles.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => run_isolated(harvester, &repo_corr, repository.clone()).await,
                    Err(e) => Err(GleanerError::HarvestFailed(e.to_string())),
                };
                let succeeded = result.is_ok();
                if let Err(e) = reschedule(&*store, &repo_corr, &repository, result, backoff, &default_refresh) {
                    error!(corr_id = %repo_corr, repository = %repository.id, "Failed to reschedule: {}", e);
                }
                succeeded
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(corr_id = %corr_id, "Task join error: {}", e);
                }
            }
        }

        info!(
            corr_id = %corr_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Tick complete"
        );
        Ok(summary)
    }
}

/// Runs the harvest on its own task so a panic becomes an ordinary failure.
async fn run_isolated(harvester: Arc<dyn Harvest>, corr_id: &str, repository: Repository) -> Result<HarvestReport> {
    let corr = corr_id.to_string();
    let task = tokio::spawn(async move { harvester.harvest(&corr, &repository).await });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(GleanerError::HarvestFailed(format!("harvest task aborted: {}", e))),
    }
}

fn reschedule(
    store: &dyn Store,
    corr_id: &str,
    repository: &Repository,
    result: Result<HarvestReport>,
    backoff: Backoff,
    default_refresh: &str,
) -> Result<()> {
    let now = Utc::now();
    let update = match result {
        Ok(report) => {
            let next = RefreshExpression::parse(&repository.refresh_expression)
                .or_else(|e| {
                    warn!(corr_id, repository = %repository.id, "{}; using '{}'", e, default_refresh);
                    RefreshExpression::parse(default_refresh)
                })
                .map_err(|e| warn!(corr_id, repository = %repository.id, "{}; backing off", e))
                .ok()
                .and_then(|expression| expression.next_after(now));
            ScheduleUpdate {
                next_harvest_at: next.unwrap_or_else(|| later(now, backoff.delay(u32::MAX))),
                failure_count: 0,
                last_updated_at: (report.inserted > 0).then_some(now),
            }
        }
        Err(e) => {
            let failure_count = repository.failure_count.saturating_add(1);
            let delay = backoff.delay(failure_count);
            warn!(
                corr_id,
                repository = %repository.id,
                failure_count,
                retry_in_secs = delay.num_seconds(),
                "Harvest failed: {}",
                e
            );
            ScheduleUpdate {
                next_harvest_at: later(now, delay),
                failure_count,
                last_updated_at: None,
            }
        }
    };
    store.update_schedule(&repository.id, &update)
}

fn later(now: DateTime<Utc>, delay: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
