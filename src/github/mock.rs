//! Scripted in-memory `GitHubApi` for tests.
//!
//! Pull requests, reviews and commits are seeded per key; notification
//! responses are queued and consumed in order. Every call is recorded so
//! tests can assert on side effects (threads marked read, PRs fetched).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{MonitorError, Result};
use crate::github::client::GitHubApi;
use crate::github::types::{
    Commit, CommitDetail, GitActor, Notification, NotificationBatch, NotificationPage, NotificationQuery,
    NotificationRepository, NotificationSubject, PULL_REQUEST_SUBJECT, PullRequest, Review, User,
};

/// A recorded call against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListNotifications { if_modified_since: Option<String>, page: Option<u32>, all: bool },
    MarkThreadRead(String),
    MarkAllRead,
    ListOpenPulls(String),
    GetPull(String, u64),
    ListReviews(String, u64),
    ListCommits(String, u64),
    AuthenticatedUser,
}

/// Queued response for `list_notifications`
#[derive(Debug, Clone)]
enum NotificationResponse {
    Page(NotificationPage),
    Status(u16),
}

#[derive(Debug, Default)]
struct MockState {
    pulls: BTreeMap<(String, u64), PullRequest>,
    reviews: HashMap<(String, u64), Vec<Review>>,
    commits: HashMap<(String, u64), Vec<Commit>>,
    notifications: VecDeque<NotificationResponse>,
    notifications_status: Option<u16>,
    failing_repos: HashSet<String>,
    failing_pulls: HashSet<(String, u64)>,
    failing_reviews: HashSet<(String, u64)>,
    failing_commits: HashSet<(String, u64)>,
    login: String,
    calls: Vec<MockCall>,
}

/// In-memory GitHub double
#[derive(Debug)]
pub struct MockGitHub {
    state: Mutex<MockState>,
}

impl Default for MockGitHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGitHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                login: "reviewer".to_string(),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn server_error(message: &str) -> MonitorError {
        MonitorError::Api {
            status: 502,
            message: message.to_string(),
        }
    }

    // --- seeding -------------------------------------------------------

    pub fn set_login(&self, login: &str) {
        self.state().login = login.to_string();
    }

    /// Add or replace a pull request.
    pub fn add_pull(&self, repo: &str, pr: PullRequest) {
        self.state().pulls.insert((repo.to_string(), pr.number), pr);
    }

    pub fn remove_pull(&self, repo: &str, number: u64) {
        self.state().pulls.remove(&(repo.to_string(), number));
    }

    pub fn set_reviews(&self, repo: &str, number: u64, reviews: Vec<Review>) {
        self.state().reviews.insert((repo.to_string(), number), reviews);
    }

    pub fn set_commits(&self, repo: &str, number: u64, commits: Vec<Commit>) {
        self.state().commits.insert((repo.to_string(), number), commits);
    }

    /// Queue a notification page for the next `list_notifications` call.
    pub fn push_notifications(&self, page: NotificationPage) {
        self.state().notifications.push_back(NotificationResponse::Page(page));
    }

    /// Queue an error status for the next `list_notifications` call.
    pub fn push_notification_error(&self, status: u16) {
        self.state().notifications.push_back(NotificationResponse::Status(status));
    }

    /// Every `list_notifications` call fails with `status` (e.g. 403).
    pub fn deny_notifications(&self, status: u16) {
        self.state().notifications_status = Some(status);
    }

    pub fn fail_repo(&self, repo: &str) {
        self.state().failing_repos.insert(repo.to_string());
    }

    pub fn fail_pull(&self, repo: &str, number: u64) {
        self.state().failing_pulls.insert((repo.to_string(), number));
    }

    pub fn fail_reviews(&self, repo: &str, number: u64) {
        self.state().failing_reviews.insert((repo.to_string(), number));
    }

    pub fn fail_commits(&self, repo: &str, number: u64) {
        self.state().failing_commits.insert((repo.to_string(), number));
    }

    // --- inspection ----------------------------------------------------

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn marked_read(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::MarkThreadRead(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn get_pull_calls(&self, repo: &str, number: u64) -> usize {
        self.count_calls(|c| matches!(c, MockCall::GetPull(r, n) if r == repo && *n == number))
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl GitHubApi for MockGitHub {
    async fn list_notifications(&self, query: &NotificationQuery) -> Result<NotificationPage> {
        self.record(MockCall::ListNotifications {
            if_modified_since: query.if_modified_since.clone(),
            page: query.page,
            all: query.all,
        });

        let mut state = self.state();
        if let Some(status) = state.notifications_status {
            return Err(MonitorError::Api {
                status,
                message: "notifications denied".to_string(),
            });
        }
        match state.notifications.pop_front() {
            Some(NotificationResponse::Page(page)) => Ok(page),
            Some(NotificationResponse::Status(status)) => Err(MonitorError::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Ok(NotificationPage::NotModified),
        }
    }

    async fn mark_thread_read(&self, thread_id: &str) -> Result<()> {
        self.record(MockCall::MarkThreadRead(thread_id.to_string()));
        Ok(())
    }

    async fn mark_all_notifications_read(&self, _last_read_at: DateTime<Utc>) -> Result<()> {
        self.record(MockCall::MarkAllRead);
        Ok(())
    }

    async fn list_open_pulls(&self, repo: &str) -> Result<Vec<PullRequest>> {
        self.record(MockCall::ListOpenPulls(repo.to_string()));

        let state = self.state();
        if state.failing_repos.contains(repo) {
            return Err(Self::server_error("list pulls failed"));
        }
        Ok(state
            .pulls
            .iter()
            .filter(|((r, _), pr)| r == repo && pr.is_open())
            .map(|(_, pr)| pr.clone())
            .collect())
    }

    async fn get_pull(&self, repo: &str, number: u64) -> Result<PullRequest> {
        self.record(MockCall::GetPull(repo.to_string(), number));

        let state = self.state();
        let key = (repo.to_string(), number);
        if state.failing_pulls.contains(&key) {
            return Err(Self::server_error("get pull failed"));
        }
        state.pulls.get(&key).cloned().ok_or_else(|| MonitorError::Api {
            status: 404,
            message: "Not Found".to_string(),
        })
    }

    async fn list_reviews(&self, repo: &str, number: u64) -> Result<Vec<Review>> {
        self.record(MockCall::ListReviews(repo.to_string(), number));

        let state = self.state();
        let key = (repo.to_string(), number);
        if state.failing_reviews.contains(&key) {
            return Err(Self::server_error("list reviews failed"));
        }
        Ok(state.reviews.get(&key).cloned().unwrap_or_default())
    }

    async fn list_commits(&self, repo: &str, number: u64) -> Result<Vec<Commit>> {
        self.record(MockCall::ListCommits(repo.to_string(), number));

        let state = self.state();
        let key = (repo.to_string(), number);
        if state.failing_commits.contains(&key) {
            return Err(Self::server_error("list commits failed"));
        }
        Ok(state.commits.get(&key).cloned().unwrap_or_default())
    }

    async fn authenticated_user(&self) -> Result<String> {
        self.record(MockCall::AuthenticatedUser);
        Ok(self.state().login.clone())
    }
}

// --- fixtures ----------------------------------------------------------

/// An open, non-draft PR created an hour ago.
pub fn pull_request(number: u64, author: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("Change #{}", number),
        state: "open".to_string(),
        draft: false,
        user: User::new(author),
        html_url: format!("https://github.com/example/pull/{}", number),
        created_at: Utc::now() - chrono::Duration::hours(1),
        requested_reviewers: Vec::new(),
    }
}

pub fn review(reviewer: &str, state: &str, submitted_at: DateTime<Utc>) -> Review {
    Review {
        user: Some(User::new(reviewer)),
        state: state.to_string(),
        submitted_at: Some(submitted_at),
    }
}

pub fn commit(sha: &str, committed_at: DateTime<Utc>) -> Commit {
    Commit {
        sha: sha.to_string(),
        commit: CommitDetail {
            committer: Some(GitActor {
                date: Some(committed_at),
            }),
        },
    }
}

/// A PR notification for `repo#number`.
pub fn pr_notification(id: &str, repo: &str, number: u64) -> Notification {
    Notification {
        id: id.to_string(),
        subject: NotificationSubject {
            title: format!("Change #{}", number),
            url: Some(format!("https://api.github.com/repos/{}/pulls/{}", repo, number)),
            kind: PULL_REQUEST_SUBJECT.to_string(),
        },
        repository: NotificationRepository {
            full_name: repo.to_string(),
        },
        unread: true,
    }
}

/// A non-PR notification (issue, release, ...).
pub fn other_notification(id: &str, repo: &str, kind: &str) -> Notification {
    Notification {
        id: id.to_string(),
        subject: NotificationSubject {
            title: "Something else".to_string(),
            url: Some(format!("https://api.github.com/repos/{}/issues/1", repo)),
            kind: kind.to_string(),
        },
        repository: NotificationRepository {
            full_name: repo.to_string(),
        },
        unread: true,
    }
}

/// A modified notification page carrying the given polling hints.
pub fn notification_page(
    notifications: Vec<Notification>,
    last_modified: Option<&str>,
    poll_interval_secs: Option<u64>,
    next_page: Option<u32>,
) -> NotificationPage {
    NotificationPage::Modified(NotificationBatch {
        notifications,
        last_modified: last_modified.map(str::to_string),
        poll_interval: poll_interval_secs.map(Duration::from_secs),
        next_page,
    })
}
