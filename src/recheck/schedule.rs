//! Escalating recheck schedule as data.

use std::time::Duration;

/// `count` checks spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecheckTier {
    pub count: u32,
    pub interval: Duration,
}

impl RecheckTier {
    pub const fn new(count: u32, interval: Duration) -> Self {
        Self { count, interval }
    }
}

/// Ordered tiers; offsets accumulate across them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecheckSchedule {
    tiers: Vec<RecheckTier>,
}

/// Where a worker stands relative to its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecheckPlan {
    /// At least one offset already passed: check once before waiting
    pub catch_up: bool,
    /// Offsets from the task start still ahead, ascending
    pub remaining: Vec<Duration>,
}

impl RecheckPlan {
    /// No scheduled check lies ahead.
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }
}

impl Default for RecheckSchedule {
    fn default() -> Self {
        Self::standard()
    }
}

impl RecheckSchedule {
    pub fn new(tiers: Vec<RecheckTier>) -> Self {
        Self { tiers }
    }

    /// 10 × 1 min, 10 × 2 min, 6 × 5 min: 26 checks over an hour.
    pub fn standard() -> Self {
        const MINUTE: Duration = Duration::from_secs(60);
        Self::new(vec![
            RecheckTier::new(10, MINUTE),
            RecheckTier::new(10, MINUTE.saturating_mul(2)),
            RecheckTier::new(6, MINUTE.saturating_mul(5)),
        ])
    }

    pub fn tiers(&self) -> &[RecheckTier] {
        &self.tiers
    }

    /// Cumulative offset of every check from the task start.
    pub fn offsets(&self) -> Vec<Duration> {
        let mut offsets = Vec::with_capacity(self.total_checks());
        let mut at = Duration::ZERO;
        for tier in &self.tiers {
            for _ in 0..tier.count {
                at += tier.interval;
                offsets.push(at);
            }
        }
        offsets
    }

    pub fn total_checks(&self) -> usize {
        self.tiers.iter().map(|t| t.count as usize).sum()
    }

    pub fn total_span(&self) -> Duration {
        self.tiers.iter().map(|t| t.interval.saturating_mul(t.count)).sum()
    }

    /// Split the schedule at `elapsed`. Any number of missed offsets
    /// collapses into a single catch-up check.
    pub fn plan(&self, elapsed: Duration) -> RecheckPlan {
        let (passed, remaining): (Vec<Duration>, Vec<Duration>) =
            self.offsets().into_iter().partition(|offset| *offset <= elapsed);

        RecheckPlan {
            catch_up: !passed.is_empty(),
            remaining,
        }
    }
}
