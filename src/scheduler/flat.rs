//! Fixed-interval full sweeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use tokio::time::MissedTickBehavior;

use crate::context::MonitorContext;
use crate::refresh::{SweepReport, refresh_repos};
use crate::scheduler::{OperatingMode, SchedulingStrategy, TaskSet};

pub const DEFAULT_FULL_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Sweep every tracked repository each `interval`, optionally once first.
pub(crate) async fn full_refresh_loop(ctx: Arc<MonitorContext>, interval: Duration, sweep_first: bool) {
    if sweep_first {
        refresh_repos(&ctx, ctx.tracking.repos()).await;
    }

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        info!("Full refresh of {} repos", ctx.tracking.repos().len());
        refresh_repos(&ctx, ctx.tracking.repos()).await;
    }
}

/// Strategy: every repository on one fixed interval.
pub struct FlatInterval {
    ctx: Arc<MonitorContext>,
    interval: Duration,
    tasks: TaskSet,
}

impl FlatInterval {
    pub fn new(ctx: Arc<MonitorContext>, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            tasks: TaskSet::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl SchedulingStrategy for FlatInterval {
    fn mode(&self) -> OperatingMode {
        OperatingMode::FlatInterval
    }

    fn start(&self) {
        if self.tasks.is_running() {
            return;
        }
        info!("Starting flat polling every {:?}", self.interval);
        self.tasks.spawn(full_refresh_loop(self.ctx.clone(), self.interval, true));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Tracking;
    use crate::github::mock::pull_request;
    use crate::github::{ClientPool, MockCall, MockGitHub};
    use crate::store::PrStore;
    use tempfile::TempDir;

    fn create_context(mock: Arc<MockGitHub>) -> (Arc<MonitorContext>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(PrStore::open(temp.path()).unwrap());
        let tracking = Tracking::new(vec!["acme/a".to_string()], &["dev".to_string()], 3);
        let ctx = MonitorContext::new(store, ClientPool::with_default(mock), tracking);
        (Arc::new(ctx), temp)
    }

    #[tokio::test]
    async fn test_start_sweeps_immediately_and_repeats() {
        let mock = Arc::new(MockGitHub::new());
        mock.add_pull("acme/a", pull_request(1, "dev"));
        let (ctx, _temp) = create_context(mock.clone());

        let strategy = FlatInterval::new(ctx.clone(), Duration::from_millis(50));
        strategy.start();
        strategy.start();
        assert!(strategy.is_running());

        tokio::time::sleep(Duration::from_millis(180)).await;
        strategy.stop();

        let sweeps = mock.count_calls(|c| matches!(c, MockCall::ListOpenPulls(_)));
        assert!(sweeps >= 2, "expected repeated sweeps, got {}", sweeps);
        assert_eq!(ctx.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let mock = Arc::new(MockGitHub::new());
        let (ctx, _temp) = create_context(mock.clone());

        let strategy = FlatInterval::new(ctx, Duration::from_millis(20));
        strategy.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        strategy.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let after_stop = mock.count_calls(|c| matches!(c, MockCall::ListOpenPulls(_)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mock.count_calls(|c| matches!(c, MockCall::ListOpenPulls(_))), after_stop);
        assert!(!strategy.is_running());
    }

    #[tokio::test]
    async fn test_force_refresh_sweeps_all() {
        let mock = Arc::new(MockGitHub::new());
        mock.add_pull("acme/a", pull_request(4, "dev"));
        let (ctx, _temp) = create_context(mock);

        let strategy = FlatInterval::new(ctx, DEFAULT_FULL_REFRESH_INTERVAL);
        let report = strategy.force_refresh().await;
        assert_eq!(report.refreshed, vec!["acme/a"]);
        assert_eq!(report.needing_attention, 1);
    }
}
