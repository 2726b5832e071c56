//! Escalating, restart-safe rechecks of PRs the user just opened.
//!
//! After the user opens a PR it is re-polled on a tightening-then-relaxing
//! schedule (every minute, then every two, then every five) for an hour, or
//! until it no longer needs attention. Tasks live in the store so a restart
//! resumes them where they left off.

mod registry;
mod schedule;
mod worker;

pub use registry::{WorkerGuard, WorkerRegistry};
pub use schedule::{RecheckPlan, RecheckSchedule, RecheckTier};
pub use worker::{CheckOutcome, RecheckScheduler, ResumeStats};
