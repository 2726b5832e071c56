//! GitHub client trait and per-organization client selection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::github::types::{Commit, NotificationPage, NotificationQuery, PullRequest, Review, split_repo};

/// The slice of the GitHub REST API the monitor consumes.
///
/// Implementations handle authentication and pagination; list calls return
/// every page.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// `GET /notifications`, honouring `If-Modified-Since` when set.
    async fn list_notifications(&self, query: &NotificationQuery) -> Result<NotificationPage>;

    /// `PATCH /notifications/threads/{id}`
    async fn mark_thread_read(&self, thread_id: &str) -> Result<()>;

    /// `PUT /notifications` with `last_read_at`
    async fn mark_all_notifications_read(&self, last_read_at: DateTime<Utc>) -> Result<()>;

    /// `GET /repos/{repo}/pulls?state=open`
    async fn list_open_pulls(&self, repo: &str) -> Result<Vec<PullRequest>>;

    /// `GET /repos/{repo}/pulls/{number}`
    async fn get_pull(&self, repo: &str, number: u64) -> Result<PullRequest>;

    /// `GET /repos/{repo}/pulls/{number}/reviews`
    async fn list_reviews(&self, repo: &str, number: u64) -> Result<Vec<Review>>;

    /// `GET /repos/{repo}/pulls/{number}/commits`
    async fn list_commits(&self, repo: &str, number: u64) -> Result<Vec<Commit>>;

    /// `GET /user`: login of the token owner
    async fn authenticated_user(&self) -> Result<String>;
}

/// Clients keyed by organization, with a default fallback credential.
#[derive(Clone, Default)]
pub struct ClientPool {
    default: Option<Arc<dyn GitHubApi>>,
    orgs: HashMap<String, Arc<dyn GitHubApi>>,
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("has_default", &self.default.is_some())
            .field("orgs", &self.orgs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with only a default client.
    pub fn with_default(client: Arc<dyn GitHubApi>) -> Self {
        Self {
            default: Some(client),
            orgs: HashMap::new(),
        }
    }

    pub fn set_default(&mut self, client: Arc<dyn GitHubApi>) {
        self.default = Some(client);
    }

    pub fn add_org(&mut self, org: impl Into<String>, client: Arc<dyn GitHubApi>) {
        self.orgs.insert(org.into(), client);
    }

    /// Client used for notification calls.
    pub fn default_client(&self) -> Option<Arc<dyn GitHubApi>> {
        self.default.clone()
    }

    /// Org-specific client, falling back to the default one.
    pub fn for_org(&self, org: &str) -> Option<Arc<dyn GitHubApi>> {
        self.orgs.get(org).cloned().or_else(|| self.default.clone())
    }

    /// Client for the organization owning `owner/name`.
    pub fn for_repo(&self, repo: &str) -> Option<Arc<dyn GitHubApi>> {
        let owner = split_repo(repo).map(|(owner, _)| owner).unwrap_or_default();
        self.for_org(owner)
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.orgs.is_empty()
    }
}
