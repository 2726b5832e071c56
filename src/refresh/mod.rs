//! Fetching and classifying pull requests into the store.
//!
//! - `fetch_repo_prs`: one repository, filtered and classified
//! - `refresh_repos`: a batch sweep merged into the store
//! - `evaluate_pull`: one already-fetched PR, written or removed

mod evaluate;
mod fetcher;
mod sweep;

pub use evaluate::{PullOutcome, evaluate_pull};
pub use fetcher::fetch_repo_prs;
pub use sweep::{SweepReport, refresh_repos};
