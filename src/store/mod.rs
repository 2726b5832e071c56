//! Persistence for pr-monitor.
//!
//! A single SQLite database holds three things:
//! - **prs**: classified pull requests plus the user's ignore/mute flags
//! - **state**: opaque scalar values (notification cursor, poll interval, one-time flags)
//! - **rechecks**: in-flight escalating rechecks, so they resume after a restart
//!
//! # Example
//!
//! ```ignore
//! use pr_monitor::store::{PrStore, PrKey};
//!
//! let store = PrStore::open(Path::new("/home/me/.config/pr-monitor"))?;
//! store.set_ignored(&PrKey::new("acme/widgets", 42), true)?;
//! let active = store.load_active_prs()?;
//! ```

mod pr_store;
mod records;

pub use pr_store::{DB_FILE_NAME, LEGACY_IGNORED_FILE, PrStore};
pub use records::{PrKey, PullRequestRecord, RecheckTask, state_keys};
