//! The orchestrator: wires the store, clients and scheduling strategy together
//! and exposes the operations a front end needs.
//!
//! # Example
//!
//! ```ignore
//! use pr_monitor::monitor::{Monitor, MonitorSettings};
//!
//! let monitor = Monitor::open(settings, clients)?;
//! let mode = monitor.start().await?;
//! let mut changes = monitor.subscribe();
//! while changes.changed().await.is_ok() {
//!     render(&monitor.active_prs());
//! }
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::context::{MonitorContext, Tracking};
use crate::error::Result;
use crate::github::ClientPool;
use crate::recheck::{RecheckSchedule, RecheckScheduler, ResumeStats};
use crate::refresh::{SweepReport, refresh_repos};
use crate::scheduler::{
    DEFAULT_FULL_REFRESH_INTERVAL, FlatInterval, NotificationDriven, NotificationPoller, OperatingMode,
    PriorityTiered, RepoPriorityConfig, SCHEDULER_TICK, SchedulingStrategy, probe_notifications,
};
use crate::store::{LEGACY_IGNORED_FILE, PrKey, PrStore, PullRequestRecord};

/// Everything the orchestrator needs besides credentials.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Home of the database and the legacy ignored list
    pub data_dir: PathBuf,
    /// Tracked user; resolved via `GET /user` when absent
    pub username: Option<String>,
    pub authors: Vec<String>,
    /// Repositories in high → medium → low order
    pub repos: Vec<RepoPriorityConfig>,
    /// Repos were configured by tier; selects the fallback strategy
    pub tiered: bool,
    pub max_age_days: u32,
    pub full_refresh_interval: Duration,
    /// Overrides the stored/default notification interval
    pub notification_interval: Option<Duration>,
    pub scheduler_tick: Duration,
    pub recheck_schedule: RecheckSchedule,
}

impl MonitorSettings {
    pub fn new(data_dir: impl Into<PathBuf>, authors: Vec<String>, repos: Vec<RepoPriorityConfig>) -> Self {
        Self {
            data_dir: data_dir.into(),
            username: None,
            authors,
            repos,
            tiered: false,
            max_age_days: 3,
            full_refresh_interval: DEFAULT_FULL_REFRESH_INTERVAL,
            notification_interval: None,
            scheduler_tick: SCHEDULER_TICK,
            recheck_schedule: RecheckSchedule::standard(),
        }
    }

    pub fn repo_names(&self) -> Vec<String> {
        self.repos.iter().map(|r| r.repo.clone()).collect()
    }
}

/// Long-lived monitor. Cheap reads come from the in-memory cache; every write
/// goes through the store first.
pub struct Monitor {
    ctx: Arc<MonitorContext>,
    settings: MonitorSettings,
    rechecks: RecheckScheduler,
    strategy: Mutex<Option<Arc<dyn SchedulingStrategy>>>,
}

impl Monitor {
    /// Open the store under `settings.data_dir`.
    pub fn open(settings: MonitorSettings, clients: ClientPool) -> Result<Self> {
        let store = Arc::new(PrStore::open(&settings.data_dir)?);
        info!("Using store at {}", store.path().display());
        Ok(Self::with_store(store, clients, settings))
    }

    pub fn with_store(store: Arc<PrStore>, clients: ClientPool, settings: MonitorSettings) -> Self {
        let mut tracking = Tracking::new(settings.repo_names(), &settings.authors, settings.max_age_days);
        if let Some(user) = &settings.username {
            tracking = tracking.with_user(user.clone());
        }

        let ctx = Arc::new(MonitorContext::new(store, clients, tracking));
        let rechecks = RecheckScheduler::with_schedule(ctx.clone(), settings.recheck_schedule.clone());
        ctx.reload_cache();

        Self {
            ctx,
            settings,
            rechecks,
            strategy: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<MonitorContext> {
        &self.ctx
    }

    pub fn rechecks(&self) -> &RecheckScheduler {
        &self.rechecks
    }

    /// Bring the monitor up and return the operating mode it settled on.
    ///
    /// Calling `start` on a running monitor returns its current mode.
    pub async fn start(&self) -> Result<OperatingMode> {
        if let Some(mode) = self.mode() {
            return Ok(mode);
        }

        self.import_legacy_ignored();
        self.resolve_user().await;

        let mode = self.select_mode().await;
        info!("Operating mode: {}", mode);

        match self.rechecks.resume_rechecks().await {
            Ok(ResumeStats { resumed, expired }) => {
                debug!("Rechecks: {} resumed, {} expired", resumed, expired)
            }
            Err(e) => error!("Failed to resume rechecks: {}", e),
        }

        let strategy = self.build_strategy(mode);
        strategy.start();
        *self.lock_strategy() = Some(strategy);
        Ok(mode)
    }

    /// Stop the scheduling strategy. Recheck workers run until they finish.
    pub fn stop(&self) {
        if let Some(strategy) = self.lock_strategy().take() {
            info!("Stopping {}", strategy.name());
            strategy.stop();
        }
    }

    pub fn mode(&self) -> Option<OperatingMode> {
        self.lock_strategy().as_ref().map(|s| s.mode())
    }

    /// Active PRs, ordered by (repo, number).
    pub fn active_prs(&self) -> Vec<PullRequestRecord> {
        self.ctx.cache.snapshot()
    }

    pub fn ignored_count(&self) -> Result<usize> {
        self.ctx.store.count_ignored()
    }

    pub fn muted_count(&self) -> Result<usize> {
        self.ctx.store.count_muted()
    }

    /// Change notifications; the value is a generation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.ctx.cache.subscribe()
    }

    /// Sweep every repository now.
    pub async fn refresh_now(&self) -> SweepReport {
        let strategy = self.lock_strategy().clone();
        match strategy {
            Some(strategy) => strategy.force_refresh().await,
            None => refresh_repos(&self.ctx, self.ctx.tracking.repos()).await,
        }
    }

    /// Hide a PR for good and stop any recheck running for it.
    pub fn ignore(&self, key: &PrKey) -> Result<()> {
        self.ctx.store.set_ignored(key, true)?;
        self.ctx.store.remove_recheck_task(key)?;
        info!("Ignored {}", key);
        self.ctx.reload_cache();
        Ok(())
    }

    /// Hide a PR until review is re-requested from the tracked user.
    pub fn mute(&self, key: &PrKey) -> Result<()> {
        self.ctx.store.set_muted(key, true)?;
        info!("Muted {}", key);
        self.ctx.reload_cache();
        Ok(())
    }

    /// Forget every ignore flag, then sweep so still-relevant PRs return.
    pub async fn clear_ignored(&self) -> Result<usize> {
        let cleared = self.ctx.store.clear_ignored()?;
        info!("Cleared {} ignored PRs", cleared);
        self.refresh_now().await;
        Ok(cleared)
    }

    /// Forget every mute flag, then sweep so still-relevant PRs return.
    pub async fn clear_muted(&self) -> Result<usize> {
        let cleared = self.ctx.store.clear_muted()?;
        info!("Cleared {} muted PRs", cleared);
        self.refresh_now().await;
        Ok(cleared)
    }

    /// The user opened `record`: recheck it on the escalating schedule.
    pub fn opened_pr(&self, record: &PullRequestRecord) -> Result<bool> {
        self.recheck(&record.key())
    }

    pub fn recheck(&self, key: &PrKey) -> Result<bool> {
        self.rechecks.schedule_recheck(key)
    }

    fn lock_strategy(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn SchedulingStrategy>>> {
        self.strategy.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn import_legacy_ignored(&self) {
        let path = self.settings.data_dir.join(LEGACY_IGNORED_FILE);
        match self.ctx.store.import_legacy_ignored(&path) {
            Ok(0) => {}
            Ok(_) => {
                self.ctx.reload_cache();
            }
            Err(e) => warn!("Failed to import {}: {}", path.display(), e),
        }
    }

    async fn resolve_user(&self) {
        if self.ctx.tracking.user().is_some() {
            return;
        }
        let client = match self.ctx.notification_client() {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot resolve tracked user: {}", e);
                return;
            }
        };
        match client.authenticated_user().await {
            Ok(login) => {
                info!("Tracking reviews requested from {}", login);
                self.ctx.tracking.set_user(login);
            }
            Err(e) => warn!("Failed to resolve tracked user: {}", e),
        }
    }

    async fn select_mode(&self) -> OperatingMode {
        let fallback = if self.settings.tiered {
            OperatingMode::PriorityTiered
        } else {
            OperatingMode::FlatInterval
        };

        match probe_notifications(&self.ctx).await {
            Ok(()) => OperatingMode::NotificationDriven,
            Err(e) if e.is_auth_failure() => {
                warn!("Notifications not permitted for this token ({}); using {}", e, fallback);
                fallback
            }
            Err(e) => {
                warn!("Notification probe failed ({}); using {}", e, fallback);
                fallback
            }
        }
    }

    fn build_strategy(&self, mode: OperatingMode) -> Arc<dyn SchedulingStrategy> {
        let ctx = self.ctx.clone();
        match mode {
            OperatingMode::NotificationDriven => {
                let mut poller = NotificationPoller::new(ctx.clone());
                if let Some(interval) = self.settings.notification_interval {
                    poller = poller.with_interval(interval);
                }
                Arc::new(NotificationDriven::with_poller(
                    ctx,
                    Arc::new(poller),
                    self.settings.full_refresh_interval,
                ))
            }
            OperatingMode::PriorityTiered => Arc::new(
                PriorityTiered::new(ctx, &self.settings.repos).with_tick(self.settings.scheduler_tick),
            ),
            OperatingMode::FlatInterval => {
                Arc::new(FlatInterval::new(ctx, self.settings.full_refresh_interval))
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
