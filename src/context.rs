//! Shared state handed to every worker.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use log::error;

use crate::cache::ActivePrCache;
use crate::error::{MonitorError, Result};
use crate::github::{ClientPool, GitHubApi, PullRequest};
use crate::store::PrStore;

/// Which repositories and authors the monitor cares about.
#[derive(Debug)]
pub struct Tracking {
    repos: Vec<String>,
    repo_set: HashSet<String>,
    authors: HashSet<String>,
    max_age: Duration,
    user: OnceLock<String>,
}

impl Tracking {
    /// `repos` keeps its order (high → medium → low); authors compare
    /// case-insensitively, as GitHub logins do.
    pub fn new(repos: Vec<String>, authors: &[String], max_age_days: u32) -> Self {
        let repo_set = repos.iter().cloned().collect();
        let authors = authors.iter().map(|a| a.to_lowercase()).collect();

        Self {
            repos,
            repo_set,
            authors,
            max_age: Duration::days(i64::from(max_age_days)),
            user: OnceLock::new(),
        }
    }

    /// Set the tracked user's login up front.
    pub fn with_user(self, login: impl Into<String>) -> Self {
        let _ = self.user.set(login.into());
        self
    }

    pub fn repos(&self) -> &[String] {
        &self.repos
    }

    pub fn is_tracked_repo(&self, repo: &str) -> bool {
        self.repo_set.contains(repo)
    }

    pub fn is_tracked_author(&self, login: &str) -> bool {
        self.authors.contains(&login.to_lowercase())
    }

    /// Open, not a draft, and written by a tracked author.
    pub fn is_tracked_pull(&self, pr: &PullRequest) -> bool {
        pr.is_open() && !pr.draft && self.is_tracked_author(pr.author())
    }

    /// PRs created strictly before this instant are too old to list.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }

    /// Login of the user running the monitor, once known.
    pub fn user(&self) -> Option<&str> {
        self.user.get().map(String::as_str)
    }

    /// Record the login; the first value wins.
    pub fn set_user(&self, login: impl Into<String>) {
        let _ = self.user.set(login.into());
    }
}

/// Store, clients, tracking rules and the presentation cache.
#[derive(Debug)]
pub struct MonitorContext {
    pub store: Arc<PrStore>,
    pub clients: ClientPool,
    pub tracking: Tracking,
    pub cache: ActivePrCache,
}

impl MonitorContext {
    pub fn new(store: Arc<PrStore>, clients: ClientPool, tracking: Tracking) -> Self {
        Self {
            store,
            clients,
            tracking,
            cache: ActivePrCache::new(),
        }
    }

    /// Client for the organization owning `repo`.
    pub fn client_for_repo(&self, repo: &str) -> Result<Arc<dyn GitHubApi>> {
        self.clients
            .for_repo(repo)
            .ok_or_else(|| MonitorError::NoClient(repo.to_string()))
    }

    /// Client used for account-wide notification calls.
    pub fn notification_client(&self) -> Result<Arc<dyn GitHubApi>> {
        self.clients
            .default_client()
            .ok_or_else(|| MonitorError::NoClient("notifications".to_string()))
    }

    /// Re-read active PRs from the store into the cache. Returns whether the
    /// active set changed; a failed read keeps the previous view.
    pub fn reload_cache(&self) -> bool {
        match self.cache.reload_from(&self.store) {
            Ok(changed) => changed,
            Err(e) => {
                error!("Failed to reload active PRs: {}", e);
                false
            }
        }
    }
}
