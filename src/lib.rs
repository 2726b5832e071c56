//! pr-monitor - keeps a list of pull requests waiting on your review
//!
//! GitHub notifications drive targeted updates; periodic sweeps of the
//! configured repositories act as a safety net (or as the only mechanism when
//! the token cannot read notifications). Results live in a local SQLite store
//! so the list is available instantly at startup.

pub mod cache;
pub mod context;
pub mod error;
pub mod github;
pub mod monitor;
pub mod recheck;
pub mod refresh;
pub mod review;
pub mod scheduler;
pub mod store;

pub use error::{MonitorError, Result};
