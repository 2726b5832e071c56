//! Notification-driven updates.
//!
//! The poller issues a conditional `GET /notifications` each tick, carrying
//! the last `Last-Modified` as `If-Modified-Since`. A 304 costs nothing and
//! changes nothing. A modified response updates the stored cursor and the
//! server-suggested interval, then every notification is turned into a
//! targeted PR re-evaluation and its thread is marked read.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use crate::context::MonitorContext;
use crate::error::Result;
use crate::github::{GitHubApi, Notification, NotificationPage, NotificationQuery};
use crate::refresh::{SweepReport, evaluate_pull, refresh_repos};
use crate::scheduler::flat::full_refresh_loop;
use crate::scheduler::{OperatingMode, SchedulingStrategy, TaskSet};
use crate::store::{PrKey, state_keys};

/// Poll interval used until the server suggests one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

const PAGE_SIZE: u32 = 50;

/// Result of one conditional poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 304: nothing read, nothing written
    NotModified,
    Processed {
        notifications: usize,
        /// Some PR record was written or removed
        updated: bool,
    },
}

/// Minimal notification request to find out whether the token may read
/// notifications. Persists a server-suggested poll interval on success.
pub async fn probe_notifications(ctx: &MonitorContext) -> Result<()> {
    let client = ctx.notification_client()?;
    let query = NotificationQuery {
        per_page: 1,
        ..Default::default()
    };

    if let NotificationPage::Modified(batch) = client.list_notifications(&query).await? {
        if let Some(interval) = batch.poll_interval {
            store_poll_interval(ctx, interval);
        }
    }
    Ok(())
}

/// Mark every pre-existing notification read, at most once ever.
///
/// Returns whether the cleanup ran. A listing failure leaves the flag unset
/// so the next start retries; a failed mark-all is logged and still counts.
pub async fn initial_cleanup(ctx: &MonitorContext) -> Result<bool> {
    if ctx.store.state_flag(state_keys::INITIAL_CLEANUP_DONE)? {
        return Ok(false);
    }

    let client = ctx.notification_client()?;
    info!("Running initial notification cleanup");

    let mut all = Vec::new();
    let mut page = None;
    loop {
        let query = NotificationQuery {
            all: true,
            page,
            per_page: PAGE_SIZE,
            ..Default::default()
        };
        match client.list_notifications(&query).await? {
            NotificationPage::NotModified => break,
            NotificationPage::Modified(batch) => {
                all.extend(batch.notifications);
                match batch.next_page {
                    Some(next) if page.is_none_or(|current| next > current) => page = Some(next),
                    _ => break,
                }
            }
        }
    }

    let pr_count = all
        .iter()
        .filter(|n| n.is_pull_request() && ctx.tracking.is_tracked_repo(n.repo()))
        .count();
    info!(
        "Found {} notifications, {} for pull requests in tracked repos",
        all.len(),
        pr_count
    );

    match client.mark_all_notifications_read(Utc::now()).await {
        Ok(()) => info!("Marked all notifications as read"),
        Err(e) => warn!("Failed to mark all notifications as read: {}", e),
    }

    ctx.store.set_state(state_keys::INITIAL_CLEANUP_DONE, "true")?;
    Ok(true)
}

fn store_poll_interval(ctx: &MonitorContext, interval: Duration) {
    let secs = interval.as_secs().to_string();
    if let Err(e) = ctx.store.set_state(state_keys::NOTIFICATIONS_POLL_INTERVAL, &secs) {
        warn!("Failed to store notification poll interval: {}", e);
    }
}

/// Conditional notification poller.
pub struct NotificationPoller {
    ctx: Arc<MonitorContext>,
    interval: Mutex<Duration>,
}

impl NotificationPoller {
    /// Starts from the stored server-suggested interval, else the default.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        let interval = match ctx.store.get_state(state_keys::NOTIFICATIONS_POLL_INTERVAL) {
            Ok(Some(secs)) => secs
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            Ok(None) => DEFAULT_POLL_INTERVAL,
            Err(e) => {
                warn!("Failed to read notification poll interval: {}", e);
                DEFAULT_POLL_INTERVAL
            }
        };

        Self {
            ctx,
            interval: Mutex::new(interval),
        }
    }

    /// Override the tick interval (tests, config).
    pub fn with_interval(self, interval: Duration) -> Self {
        self.set_interval(interval);
        self
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_interval(&self, interval: Duration) {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner()) = interval;
    }

    /// One conditional request, plus processing if anything changed.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let ctx = &self.ctx;
        let client = ctx.notification_client()?;
        let last_modified = ctx.store.get_state(state_keys::NOTIFICATIONS_LAST_MODIFIED)?;

        let batch = match client
            .list_notifications(&NotificationQuery::conditional(last_modified))
            .await?
        {
            NotificationPage::NotModified => return Ok(PollOutcome::NotModified),
            NotificationPage::Modified(batch) => batch,
        };

        if let Some(last_modified) = &batch.last_modified {
            if let Err(e) = ctx.store.set_state(state_keys::NOTIFICATIONS_LAST_MODIFIED, last_modified) {
                warn!("Failed to store notification Last-Modified: {}", e);
            }
        }

        if let Some(interval) = batch.poll_interval {
            store_poll_interval(ctx, interval);
            if interval != self.interval() {
                info!("Notification poll interval is now {:?}", interval);
                self.set_interval(interval);
            }
        }

        let mut notifications = batch.notifications;
        if let Some(next) = batch.next_page {
            notifications.extend(fetch_remaining_pages(client.as_ref(), next).await);
        }

        let count = notifications.len();
        let updated = process_notifications(ctx, client.as_ref(), &notifications).await;
        Ok(PollOutcome::Processed {
            notifications: count,
            updated,
        })
    }

    /// Cleanup, an immediate full sweep, then poll forever.
    pub async fn run(self: Arc<Self>) {
        match initial_cleanup(&self.ctx).await {
            Ok(true) => {}
            Ok(false) => debug!("Initial notification cleanup already done"),
            Err(e) => warn!("Initial notification cleanup failed: {}", e),
        }

        refresh_repos(&self.ctx, self.ctx.tracking.repos()).await;

        loop {
            tokio::time::sleep(self.interval()).await;
            match self.poll_once().await {
                Ok(PollOutcome::NotModified) => debug!("Notifications not modified"),
                Ok(PollOutcome::Processed { notifications, updated }) => {
                    debug!("Processed {} notifications (updated: {})", notifications, updated)
                }
                Err(e) => warn!("Notification poll failed: {}", e),
            }
        }
    }
}

/// Unconditional pages after the first. A failure keeps what was fetched.
async fn fetch_remaining_pages(client: &dyn GitHubApi, start: u32) -> Vec<Notification> {
    let mut all = Vec::new();
    let mut page = start;

    loop {
        match client.list_notifications(&NotificationQuery::page(page)).await {
            Ok(NotificationPage::Modified(batch)) => {
                all.extend(batch.notifications);
                match batch.next_page {
                    Some(next) if next > page => page = next,
                    _ => break,
                }
            }
            Ok(NotificationPage::NotModified) => break,
            Err(e) => {
                warn!("Failed to fetch notification page {}: {}", page, e);
                break;
            }
        }
    }

    all
}

/// Apply each notification to the store and mark its thread read.
///
/// Returns whether any PR record changed; the cache is reloaded if so.
pub async fn process_notifications(
    ctx: &MonitorContext,
    client: &dyn GitHubApi,
    notifications: &[Notification],
) -> bool {
    let mut updated = false;

    for notification in notifications {
        if process_notification(ctx, notification).await {
            updated = true;
        }

        if let Err(e) = client.mark_thread_read(&notification.id).await {
            warn!("Failed to mark thread {} as read: {}", notification.id, e);
        }
    }

    if updated {
        ctx.reload_cache();
    }
    updated
}

/// Returns whether the store was written.
async fn process_notification(ctx: &MonitorContext, notification: &Notification) -> bool {
    let repo = notification.repo();
    if !notification.is_pull_request() || !ctx.tracking.is_tracked_repo(repo) {
        return false;
    }

    let number = match notification.pr_number() {
        Ok(number) => number,
        Err(e) => {
            warn!("Skipping notification {}: {}", notification.id, e);
            return false;
        }
    };
    let key = PrKey::new(repo, number);

    match ctx.store.is_ignored(&key) {
        Ok(true) => return false,
        Ok(false) => {}
        Err(e) => warn!("Failed to read ignore flag for {}: {}", key, e),
    }

    let client = match ctx.client_for_repo(repo) {
        Ok(client) => client,
        Err(e) => {
            warn!("Skipping {}: {}", key, e);
            return false;
        }
    };

    let pr = match client.get_pull(repo, number).await {
        Ok(pr) => pr,
        Err(e) => {
            warn!("Failed to fetch {}: {}", key, e);
            return false;
        }
    };

    let muted = ctx.store.is_muted(&key).unwrap_or_else(|e| {
        warn!("Failed to read mute flag for {}: {}", key, e);
        false
    });
    if muted {
        let rerequested = ctx
            .tracking
            .user()
            .is_some_and(|login| pr.review_requested_from(login));
        if !rerequested {
            return false;
        }
        info!("Un-muting {}: review re-requested", key);
        if let Err(e) = ctx.store.set_muted(&key, false) {
            warn!("Failed to un-mute {}: {}", key, e);
            return false;
        }
    }

    match evaluate_pull(ctx, client.as_ref(), repo, &pr).await {
        Ok(outcome) => {
            debug!("{} -> {:?}", key, outcome);
            true
        }
        Err(e) => {
            warn!("Failed to store {}: {}", key, e);
            // the un-mute above was still written
            muted
        }
    }
}

/// Strategy: notification poller plus a flat full-refresh safety net.
pub struct NotificationDriven {
    ctx: Arc<MonitorContext>,
    poller: Arc<NotificationPoller>,
    full_refresh_interval: Duration,
    tasks: TaskSet,
}

impl NotificationDriven {
    pub fn new(ctx: Arc<MonitorContext>, full_refresh_interval: Duration) -> Self {
        let poller = Arc::new(NotificationPoller::new(ctx.clone()));
        Self::with_poller(ctx, poller, full_refresh_interval)
    }

    pub fn with_poller(ctx: Arc<MonitorContext>, poller: Arc<NotificationPoller>, full_refresh_interval: Duration) -> Self {
        Self {
            ctx,
            poller,
            full_refresh_interval,
            tasks: TaskSet::default(),
        }
    }

    pub fn poller(&self) -> &Arc<NotificationPoller> {
        &self.poller
    }
}

#[async_trait]
impl SchedulingStrategy for NotificationDriven {
    fn mode(&self) -> OperatingMode {
        OperatingMode::NotificationDriven
    }

    fn start(&self) {
        if self.tasks.is_running() {
            return;
        }
        info!(
            "Starting notification polling every {:?} with full refresh every {:?}",
            self.poller.interval(),
            self.full_refresh_interval
        );
        self.tasks.spawn(self.poller.clone().run());
        self.tasks
            .spawn(full_refresh_loop(self.ctx.clone(), self.full_refresh_interval, false));
    }

    fn stop(&self) {
        self.tasks.abort_all();
    }

    fn is_running(&self) -> bool {
        self.tasks.is_running()
    }

    async fn force_refresh(&self) -> SweepReport {
        refresh_repos(&self.ctx, self.ctx.tracking.repos()).await
    }
}
