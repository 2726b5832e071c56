//! Record types persisted by the PR store.
//!
//! `PullRequestRecord` rows are keyed by `PrKey` (repository + number);
//! `RecheckTask` rows share the same key space.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::github::PullRequest;
use crate::review::ReviewState;

/// Well-known keys of the scalar `state` table.
pub mod state_keys {
    /// `Last-Modified` of the last modified notification response
    pub const NOTIFICATIONS_LAST_MODIFIED: &str = "notifications_last_modified";
    /// Server-suggested notification poll interval, in seconds
    pub const NOTIFICATIONS_POLL_INTERVAL: &str = "notifications_poll_interval";
    /// Set once every pre-existing notification has been marked read
    pub const INITIAL_CLEANUP_DONE: &str = "initial_cleanup_done";
    /// Set once the legacy ignored.json list has been imported
    pub const IGNORED_JSON_IMPORTED: &str = "ignored_json_imported";
}

/// Identity of a pull request: `owner/repo#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrKey {
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }

    /// Organization (or user) that owns the repository.
    pub fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or("")
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

impl FromStr for PrKey {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let (repo, number) = s
            .rsplit_once('#')
            .ok_or_else(|| MonitorError::InvalidPrKey(s.to_string()))?;

        let number: u64 = number
            .trim()
            .parse()
            .map_err(|_| MonitorError::InvalidPrKey(s.to_string()))?;

        if repo.is_empty() || number == 0 {
            return Err(MonitorError::InvalidPrKey(s.to_string()));
        }

        Ok(Self::new(repo, number))
    }
}

/// A pull request that was classified as needing attention, or carries a
/// user flag (ignored / muted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub needs_review: bool,
    pub needs_reapproval: bool,
    pub ignored: bool,
    pub muted: bool,
    pub last_checked: DateTime<Utc>,
}

impl PullRequestRecord {
    /// Build a record from a fetched pull request and its classification.
    pub fn from_pull(repo: &str, pr: &PullRequest, state: ReviewState) -> Self {
        Self {
            repo: repo.to_string(),
            number: pr.number,
            title: pr.title.clone(),
            author: pr.author().to_string(),
            url: pr.html_url.clone(),
            needs_review: state.needs_review,
            needs_reapproval: state.needs_reapproval,
            ignored: false,
            muted: false,
            last_checked: Utc::now(),
        }
    }

    pub fn key(&self) -> PrKey {
        PrKey::new(self.repo.clone(), self.number)
    }

    /// Neither ignored nor muted.
    pub fn is_active(&self) -> bool {
        !self.ignored && !self.muted
    }

    pub fn needs_attention(&self) -> bool {
        self.needs_review || self.needs_reapproval
    }

    /// Equal in everything a listing shows; `last_checked` is ignored.
    pub fn same_listing(&self, other: &Self) -> bool {
        self.repo == other.repo
            && self.number == other.number
            && self.title == other.title
            && self.author == other.author
            && self.url == other.url
            && self.needs_review == other.needs_review
            && self.needs_reapproval == other.needs_reapproval
            && self.ignored == other.ignored
            && self.muted == other.muted
    }

    /// Short label for menus and CLI listings.
    pub fn status_label(&self) -> &'static str {
        if self.needs_reapproval {
            "needs re-approval"
        } else {
            "needs review"
        }
    }
}

/// A persisted escalating recheck for one PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckTask {
    pub repo: String,
    pub number: u64,
    pub started_at: DateTime<Utc>,
}

impl RecheckTask {
    pub fn new(key: &PrKey, started_at: DateTime<Utc>) -> Self {
        Self {
            repo: key.repo.clone(),
            number: key.number,
            started_at,
        }
    }

    pub fn key(&self) -> PrKey {
        PrKey::new(self.repo.clone(), self.number)
    }

    /// Time since the task started, clamped at zero for clock skew.
    pub fn elapsed(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}
