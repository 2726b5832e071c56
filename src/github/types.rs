//! GitHub REST payloads consumed by the monitor.
//!
//! Only the fields the scheduler and classifier read are modelled; everything
//! else in the API responses is ignored by serde.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Subject type GitHub uses for pull-request notifications.
pub const PULL_REQUEST_SUBJECT: &str = "PullRequest";

/// Review state that counts as an approval.
pub const REVIEW_APPROVED: &str = "APPROVED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

impl User {
    pub fn new(login: impl Into<String>) -> Self {
        Self { login: login.into() }
    }
}

/// A pull request as returned by `GET /repos/{repo}/pulls[/{n}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    pub user: User,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }

    pub fn author(&self) -> &str {
        &self.user.login
    }

    /// Whether a review is currently requested from `login`.
    pub fn review_requested_from(&self, login: &str) -> bool {
        self.requested_reviewers
            .iter()
            .any(|u| u.login.eq_ignore_ascii_case(login))
    }
}

/// One submitted (or pending) review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Null for reviews left by deleted accounts
    pub user: Option<User>,
    pub state: String,
    /// Null for pending reviews
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn reviewer(&self) -> &str {
        self.user.as_ref().map(|u| u.login.as_str()).unwrap_or("")
    }

    pub fn is_approval(&self) -> bool {
        self.state == REVIEW_APPROVED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitActor {
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub committer: Option<GitActor>,
}

/// An entry of `GET /repos/{repo}/pulls/{n}/commits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetail,
}

impl Commit {
    /// Committer timestamp (not author timestamp: rebases move it forward).
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.commit.committer.as_ref().and_then(|c| c.date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSubject {
    pub title: String,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRepository {
    pub full_name: String,
}

/// A notification thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub subject: NotificationSubject,
    pub repository: NotificationRepository,
    #[serde(default)]
    pub unread: bool,
}

impl Notification {
    pub fn is_pull_request(&self) -> bool {
        self.subject.kind == PULL_REQUEST_SUBJECT
    }

    pub fn repo(&self) -> &str {
        &self.repository.full_name
    }

    /// PR number from the subject's API URL.
    pub fn pr_number(&self) -> Result<u64> {
        let url = self.subject.url.as_deref().unwrap_or("");
        pr_number_from_subject_url(url)
    }
}

/// Parameters for `GET /notifications`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationQuery {
    /// Value for the `If-Modified-Since` header
    pub if_modified_since: Option<String>,
    /// Include already-read notifications
    pub all: bool,
    pub page: Option<u32>,
    pub per_page: u32,
}

impl NotificationQuery {
    pub fn conditional(last_modified: Option<String>) -> Self {
        Self {
            if_modified_since: last_modified,
            per_page: 50,
            ..Default::default()
        }
    }

    pub fn page(page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: 50,
            ..Default::default()
        }
    }
}

/// One page of notifications plus the polling hints that came with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
    /// `Last-Modified` response header
    pub last_modified: Option<String>,
    /// `X-Poll-Interval` response header
    pub poll_interval: Option<Duration>,
    pub next_page: Option<u32>,
}

/// Result of a (possibly conditional) notification request.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPage {
    /// 304: nothing changed since `If-Modified-Since`
    NotModified,
    Modified(NotificationBatch),
}

/// Extract the PR number from a subject URL such as
/// `https://api.github.com/repos/owner/repo/pulls/123`.
pub fn pr_number_from_subject_url(url: &str) -> Result<u64> {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && *s != url)
        .ok_or_else(|| MonitorError::InvalidSubjectUrl(url.to_string()))?;

    last.parse::<u64>()
        .map_err(|_| MonitorError::InvalidSubjectUrl(url.to_string()))
}

/// Split `owner/name` into its two halves.
pub fn split_repo(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok((owner, name)),
        _ => Err(MonitorError::InvalidRepo(full_name.to_string())),
    }
}
