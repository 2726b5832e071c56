//! Per-PR recheck workers.
//!
//! Opening a PR persists a `RecheckTask` and starts (at most) one worker for
//! its key. The worker re-reads its task before every check, so removing the
//! task from the store is enough to stop it, and restarting the task (a new
//! `started_at`) moves it back to the start of the schedule.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::context::MonitorContext;
use crate::error::Result;
use crate::recheck::registry::{WorkerGuard, WorkerRegistry};
use crate::recheck::schedule::RecheckSchedule;
use crate::refresh::evaluate_pull;
use crate::store::{PrKey, RecheckTask};

/// Result of a single recheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Still needs attention, or the check could not complete
    Continue,
    /// Ignored, closed, untracked or resolved
    Finished,
}

/// What `resume_rechecks` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeStats {
    /// Workers started for tasks still inside their schedule
    pub resumed: usize,
    /// Tasks past their schedule: checked once and removed
    pub expired: usize,
}

/// Starts and tracks recheck workers.
#[derive(Clone)]
pub struct RecheckScheduler {
    ctx: Arc<MonitorContext>,
    schedule: Arc<RecheckSchedule>,
    registry: WorkerRegistry,
}

impl RecheckScheduler {
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self::with_schedule(ctx, RecheckSchedule::standard())
    }

    pub fn with_schedule(ctx: Arc<MonitorContext>, schedule: RecheckSchedule) -> Self {
        Self {
            ctx,
            schedule: Arc::new(schedule),
            registry: WorkerRegistry::new(),
        }
    }

    pub fn schedule(&self) -> &RecheckSchedule {
        &self.schedule
    }

    /// Number of live workers.
    pub fn active_workers(&self) -> usize {
        self.registry.len()
    }

    /// Persist a task starting now and make sure a worker runs for it.
    ///
    /// Returns whether a new worker was started; a running worker picks up
    /// the new start time on its next wake-up.
    pub fn schedule_recheck(&self, key: &PrKey) -> Result<bool> {
        self.ctx.store.add_recheck_task(&RecheckTask::new(key, Utc::now()))?;
        info!("Scheduled rechecks for {}", key);
        Ok(self.spawn_worker(key.clone()))
    }

    /// Pick up persisted tasks after a restart.
    ///
    /// Tasks older than the whole schedule get one final check and are
    /// removed; the rest resume with their original start time.
    pub async fn resume_rechecks(&self) -> Result<ResumeStats> {
        let mut stats = ResumeStats::default();
        let now = Utc::now();

        for task in self.ctx.store.list_recheck_tasks()? {
            let key = task.key();
            if task.elapsed(now) >= self.schedule.total_span() {
                debug!("Recheck for {} expired while stopped", key);
                self.recheck_once(&key).await;
                if let Err(e) = self.ctx.store.complete_recheck_task(&task) {
                    warn!("Failed to remove recheck task {}: {}", key, e);
                }
                stats.expired += 1;
            } else if self.spawn_worker(key) {
                stats.resumed += 1;
            }
        }

        if stats.resumed + stats.expired > 0 {
            info!(
                "Resumed {} rechecks, finished {} expired",
                stats.resumed, stats.expired
            );
        }
        Ok(stats)
    }

    /// Re-evaluate one PR now.
    pub async fn recheck_once(&self, key: &PrKey) -> CheckOutcome {
        let ctx = &self.ctx;

        match ctx.store.is_ignored(key) {
            Ok(true) => return CheckOutcome::Finished,
            Ok(false) => {}
            Err(e) => warn!("Failed to read ignore flag for {}: {}", key, e),
        }

        let client = match ctx.client_for_repo(&key.repo) {
            Ok(client) => client,
            Err(e) => {
                warn!("Recheck of {} skipped: {}", key, e);
                return CheckOutcome::Continue;
            }
        };

        let pr = match client.get_pull(&key.repo, key.number).await {
            Ok(pr) => pr,
            Err(e) => {
                warn!("Recheck of {} failed: {}", key, e);
                return CheckOutcome::Continue;
            }
        };

        let outcome = match evaluate_pull(ctx, client.as_ref(), &key.repo, &pr).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to store recheck of {}: {}", key, e);
                return CheckOutcome::Continue;
            }
        };

        ctx.reload_cache();
        debug!("Recheck of {}: {:?}", key, outcome);
        if outcome.is_terminal() {
            CheckOutcome::Finished
        } else {
            CheckOutcome::Continue
        }
    }

    fn spawn_worker(&self, key: PrKey) -> bool {
        let Some(guard) = self.registry.try_register(&key) else {
            debug!("Recheck worker for {} already running", key);
            return false;
        };

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_worker(guard).await });
        true
    }

    async fn run_worker(self, guard: WorkerGuard) {
        let key = guard.key().clone();
        let finished = self.drive(&key).await;
        drop(guard);

        // A task restarted while this worker was finishing needs a worker of
        // its own; the guard is released, so registration cannot race it. A
        // row left behind by a failed delete is picked up on the next resume.
        if let Ok(Some(current)) = self.ctx.store.get_recheck_task(&key) {
            let restarted = finished.is_none_or(|task| task.started_at != current.started_at);
            if restarted {
                self.spawn_worker(key);
            }
        }
    }

    /// Walk the schedule for `key` until it finishes or the task goes away.
    ///
    /// Returns the task this worker last finished, if any.
    async fn drive(&self, key: &PrKey) -> Option<RecheckTask> {
        let mut task = self.load_task(key)?;

        let plan = self.schedule.plan(task.elapsed(Utc::now()));
        if plan.catch_up && self.recheck_once(key).await == CheckOutcome::Finished {
            self.finish(&task, "resolved");
            return Some(task);
        }
        let mut remaining: VecDeque<Duration> = plan.remaining.into();

        loop {
            let Some(offset) = remaining.pop_front() else {
                if self.finish(&task, "schedule complete") {
                    return Some(task);
                }
                // restarted after the last check
                task = self.load_task(key)?;
                remaining = self.schedule.plan(task.elapsed(Utc::now())).remaining.into();
                continue;
            };

            let due = task.started_at
                + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
            let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let Some(current) = self.load_task(key) else {
                debug!("Recheck task for {} removed, stopping", key);
                return None;
            };
            if current.started_at != task.started_at {
                debug!("Recheck task for {} restarted", key);
                task = current;
                remaining = self.schedule.plan(task.elapsed(Utc::now())).remaining.into();
                continue;
            }

            if self.recheck_once(key).await == CheckOutcome::Finished {
                self.finish(&task, "resolved");
                return Some(task);
            }
        }
    }

    fn load_task(&self, key: &PrKey) -> Option<RecheckTask> {
        match self.ctx.store.get_recheck_task(key) {
            Ok(task) => task,
            Err(e) => {
                warn!("Failed to read recheck task {}: {}", key, e);
                None
            }
        }
    }

    /// Remove the task unless it was restarted. Returns false only when a
    /// newer task replaced it; a failed delete abandons this run.
    fn finish(&self, task: &RecheckTask, reason: &str) -> bool {
        match self.ctx.store.complete_recheck_task(task) {
            Ok(removed) => {
                if removed {
                    info!("Rechecks for {} done: {}", task.key(), reason);
                }
                removed
            }
            Err(e) => {
                warn!("Failed to remove recheck task {}: {}", task.key(), e);
                true
            }
        }
    }
}
