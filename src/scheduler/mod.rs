//! Scheduling strategies: decide when to sweep which repositories.
//!
//! Three mutually exclusive modes are chosen once at startup:
//! - **NotificationDriven**: conditional notification polling plus a flat
//!   full-refresh safety net
//! - **PriorityTiered**: per-repo jittered deadlines checked on a slow tick
//! - **FlatInterval**: every repo swept on one fixed interval
//!
//! All three implement `SchedulingStrategy`, so the orchestrator wires them
//! the same way.
//!
//! # Example
//!
//! ```ignore
//! use pr_monitor::scheduler::{FlatInterval, SchedulingStrategy};
//!
//! let strategy = FlatInterval::new(ctx.clone(), Duration::from_secs(1800));
//! strategy.start();
//! strategy.force_refresh().await;
//! strategy.stop();
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::refresh::SweepReport;

mod flat;
mod jitter;
mod notifications;
mod priority;

pub use flat::{DEFAULT_FULL_REFRESH_INTERVAL, FlatInterval};
pub use jitter::{JITTER_FRACTION, add_jitter, jitter_with, stagger_offset};
pub use notifications::{
    DEFAULT_POLL_INTERVAL, NotificationDriven, NotificationPoller, PollOutcome, initial_cleanup,
    probe_notifications,
};
pub use priority::{Priority, PrioritySchedule, PriorityTiered, RepoPriorityConfig, SCHEDULER_TICK};

/// Operating mode selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    NotificationDriven,
    PriorityTiered,
    FlatInterval,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::NotificationDriven => "notification-driven",
            OperatingMode::PriorityTiered => "priority-tiered",
            OperatingMode::FlatInterval => "flat-interval",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of keeping the store fresh.
#[async_trait]
pub trait SchedulingStrategy: Send + Sync {
    fn mode(&self) -> OperatingMode;

    fn name(&self) -> &'static str {
        self.mode().as_str()
    }

    /// Spawn the background workers. A second call while running is a no-op.
    fn start(&self);

    /// Abort the background workers.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Sweep every repository now and reset any per-repo deadlines.
    async fn force_refresh(&self) -> SweepReport;
}

/// Background tasks owned by a strategy.
#[derive(Debug, Default)]
pub(crate) struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    pub(crate) fn abort_all(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|h| !h.is_finished())
    }
}
