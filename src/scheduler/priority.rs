//! Priority-tiered repository polling.
//!
//! Each repository carries a next-poll deadline. A slow tick collects the
//! repositories past due, sweeps them, and pushes each deadline out by its
//! tier interval ± 20% jitter. Deadlines are staggered within a tier so the
//! polls after the start-up sweep spread over one interval.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::context::MonitorContext;
use crate::refresh::{SweepReport, refresh_repos};
use crate::scheduler::jitter::{add_jitter, stagger_offset};
use crate::scheduler::{OperatingMode, SchedulingStrategy, TaskSet};

/// How often past-due repositories are collected.
pub const SCHEDULER_TICK: Duration = Duration::from_secs(30);

/// Repository priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository with its tier and base poll interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPriorityConfig {
    pub repo: String,
    pub priority: Priority,
    pub interval: Duration,
}

impl RepoPriorityConfig {
    pub fn new(repo: impl Into<String>, priority: Priority, interval: Duration) -> Self {
        Self {
            repo: repo.into(),
            priority,
            interval,
        }
    }
}

#[derive(Debug, Clone)]
struct RepoDeadline {
    config: RepoPriorityConfig,
    stagger: Duration,
    next_poll: Instant,
    last_polled: Option<Instant>,
}

impl RepoDeadline {
    fn reschedule(&mut self, now: Instant) {
        self.last_polled = Some(now);
        self.next_poll = now + add_jitter(self.config.interval);
    }
}

/// Next-poll deadlines for every configured repository.
#[derive(Debug, Clone)]
pub struct PrioritySchedule {
    repos: Vec<RepoDeadline>,
}

impl PrioritySchedule {
    /// Deadlines staggered within each tier: the `i`-th of `n` repos in a
    /// tier first polls at `now + i × interval / (n + 1)`.
    pub fn new(configs: &[RepoPriorityConfig], now: Instant) -> Self {
        let mut repos = Vec::with_capacity(configs.len());

        for priority in Priority::ALL {
            let tier: Vec<&RepoPriorityConfig> = configs.iter().filter(|c| c.priority == priority).collect();
            let count = tier.len();

            for (i, config) in tier.into_iter().enumerate() {
                let stagger = stagger_offset(i, count, config.interval);
                repos.push(RepoDeadline {
                    config: config.clone(),
                    stagger,
                    next_poll: now + stagger,
                    last_polled: None,
                });
            }
        }

        Self { repos }
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Repository names, high tier first.
    pub fn repos(&self) -> Vec<String> {
        self.repos.iter().map(|r| r.config.repo.clone()).collect()
    }

    pub fn next_poll(&self, repo: &str) -> Option<Instant> {
        self.repos.iter().find(|r| r.config.repo == repo).map(|r| r.next_poll)
    }

    pub fn last_polled(&self, repo: &str) -> Option<Instant> {
        self.repos
            .iter()
            .find(|r| r.config.repo == repo)
            .and_then(|r| r.last_polled)
    }

    /// Repositories whose deadline has passed, rescheduled from `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for entry in self.repos.iter_mut().filter(|r| r.next_poll <= now) {
            entry.reschedule(now);
            due.push(entry.config.repo.clone());
        }
        due
    }

    /// Every repository was swept at `now`: keep the stagger, one interval out.
    pub fn mark_swept(&mut self, now: Instant) -> Vec<String> {
        for entry in self.repos.iter_mut() {
            entry.last_polled = Some(now);
            entry.next_poll = now + entry.config.interval + entry.stagger;
        }
        self.repos()
    }

    /// Every repository, all rescheduled from `now`.
    pub fn reset_all(&mut self, now: Instant) -> Vec<String> {
        for entry in self.repos.iter_mut() {
            entry.reschedule(now);
        }
        self.repos()
    }
}

/// Strategy: sweep repositories as their tiered deadlines fall due.
pub struct PriorityTiered {
    ctx: Arc<MonitorContext>,
    schedule: Arc<Mutex<PrioritySchedule>>,
    tick: Duration,
    tasks: TaskSet,
}

impl PriorityTiered {
    pub fn new(ctx: Arc<MonitorContext>, configs: &[RepoPriorityConfig]) -> Self {
        Self {
            ctx,
            schedule: Arc::new(Mutex::new(PrioritySchedule::new(configs, Instant::now()))),
            tick: SCHEDULER_TICK,
            tasks: TaskSet::default(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Copy of the current deadlines.
    pub fn schedule(&self) -> PrioritySchedule {
        lock(&self.schedule).clone()
    }
}

fn lock(schedule: &Mutex<PrioritySchedule>) -> MutexGuard<'_, PrioritySchedule> {
    schedule.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl SchedulingStrategy for PriorityTiered {
    fn mode(&self) -> OperatingMode {
        OperatingMode::PriorityTiered
    }

    fn start(&self) {
        if self.tasks.is_running() {
            return;
        }

        let ctx = self.ctx.clone();
        let schedule = self.schedule.clone();
        let tick = self.tick;
        info!(
            "Starting priority-tiered polling for {} repos (tick {:?})",
            lock(&schedule).len(),
            tick
        );

        self.tasks.spawn(async move {
            let all = lock(&schedule).mark_swept(Instant::now());
            refresh_repos(&ctx, &all).await;

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let due = lock(&schedule).take_due(Instant::now());
                if due.is_empty() {
                    continue;
                }
                debug!("Polling {} due repos: {:?}", due.len(), due);
                refresh_repos(&ctx, &due).await;
            }
        });
    }

    fn stop(&self) {
        self.tasks.abort_all();
    }

    fn is_running(&self) -> bool {
        self.tasks.is_running()
    }

    async fn force_refresh(&self) -> SweepReport {
        let all = lock(&self.schedule).reset_all(Instant::now());
        refresh_repos(&self.ctx, &all).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> Vec<RepoPriorityConfig> {
        let high = Duration::from_secs(120);
        let low = Duration::from_secs(7200);
        vec![
            RepoPriorityConfig::new("acme/low", Priority::Low, low),
            RepoPriorityConfig::new("acme/h1", Priority::High, high),
            RepoPriorityConfig::new("acme/h2", Priority::High, high),
            RepoPriorityConfig::new("acme/h3", Priority::High, high),
        ]
    }

    #[test]
    fn test_initial_deadlines_are_staggered_per_tier() {
        let now = Instant::now();
        let schedule = PrioritySchedule::new(&configs(), now);

        assert_eq!(schedule.repos(), vec!["acme/h1", "acme/h2", "acme/h3", "acme/low"]);
        assert_eq!(schedule.next_poll("acme/h1"), Some(now));
        assert_eq!(schedule.next_poll("acme/h2"), Some(now + Duration::from_secs(30)));
        assert_eq!(schedule.next_poll("acme/h3"), Some(now + Duration::from_secs(60)));
        assert_eq!(schedule.next_poll("acme/low"), Some(now));
    }

    #[test]
    fn test_take_due_collects_only_past_deadlines() {
        let now = Instant::now();
        let mut schedule = PrioritySchedule::new(&configs(), now);

        let due = schedule.take_due(now + Duration::from_secs(35));
        assert_eq!(due, vec!["acme/h1", "acme/h2", "acme/low"]);

        let due = schedule.take_due(now + Duration::from_secs(40));
        assert!(due.is_empty());
    }

    #[test]
    fn test_rescheduled_deadline_within_jitter_bounds() {
        let start = Instant::now();
        let mut schedule = PrioritySchedule::new(&configs(), start);
        let interval = Duration::from_secs(120);

        let now = start + Duration::from_secs(1);
        schedule.take_due(now);

        let next = schedule.next_poll("acme/h1").unwrap();
        assert!(next >= now + interval.mul_f64(0.8));
        assert!(next <= now + interval.mul_f64(1.2));
        assert_eq!(schedule.last_polled("acme/h1"), Some(now));
        assert_eq!(schedule.last_polled("acme/h3"), None);
    }

    #[test]
    fn test_reset_all_reschedules_everything() {
        let start = Instant::now();
        let mut schedule = PrioritySchedule::new(&configs(), start);

        let now = start + Duration::from_secs(5);
        let all = schedule.reset_all(now);
        assert_eq!(all.len(), 4);

        assert!(schedule.take_due(now).is_empty());
        let low = schedule.next_poll("acme/low").unwrap();
        assert!(low >= now + Duration::from_secs(5760));
    }

    #[test]
    fn test_mark_swept_shifts_stagger_by_one_interval() {
        let start = Instant::now();
        let mut schedule = PrioritySchedule::new(&configs(), start);

        let now = start + Duration::from_secs(2);
        assert_eq!(schedule.mark_swept(now).len(), 4);

        // nothing swept at start-up is due again before its interval
        assert!(schedule.take_due(now + Duration::from_secs(119)).is_empty());
        assert_eq!(schedule.next_poll("acme/h1"), Some(now + Duration::from_secs(120)));
        assert_eq!(schedule.next_poll("acme/h2"), Some(now + Duration::from_secs(150)));
        assert_eq!(schedule.next_poll("acme/low"), Some(now + Duration::from_secs(7200)));
        assert_eq!(schedule.last_polled("acme/h3"), Some(now));
    }
}
