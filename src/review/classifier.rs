//! Review-state classification for a single pull request.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;

use crate::github::{Commit, GitHubApi, PullRequest, Review};

/// Attention flags for one pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewState {
    pub needs_review: bool,
    pub needs_reapproval: bool,
}

impl ReviewState {
    pub const NEEDS_REVIEW: Self = Self {
        needs_review: true,
        needs_reapproval: false,
    };

    pub const NEEDS_REAPPROVAL: Self = Self {
        needs_review: false,
        needs_reapproval: true,
    };

    pub const RESOLVED: Self = Self {
        needs_review: false,
        needs_reapproval: false,
    };

    pub fn needs_attention(&self) -> bool {
        self.needs_review || self.needs_reapproval
    }
}

/// Outcome of reducing the review list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// No reviews, or no reviewer's latest review is an approval
    NeedsReview,
    /// Most recent approval among reviewers' latest reviews
    Approved(DateTime<Utc>),
}

/// Reduce reviews to the latest per reviewer and find the newest approval.
///
/// Reviews are compared by submission time; on equal times the one seen later
/// wins. A review without a submission time sorts before all others.
pub fn evaluate_reviews(reviews: &[Review]) -> ReviewVerdict {
    let mut latest: HashMap<&str, &Review> = HashMap::new();
    for review in reviews {
        let reviewer = review.reviewer();
        match latest.get(reviewer) {
            Some(current) if current.submitted_at > review.submitted_at => {}
            _ => {
                latest.insert(reviewer, review);
            }
        }
    }

    latest
        .values()
        .filter(|r| r.is_approval())
        .map(|r| r.submitted_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
        .max()
        .map_or(ReviewVerdict::NeedsReview, ReviewVerdict::Approved)
}

/// Decide between re-approval and resolved given the newest approval time.
///
/// Commits without a committer date never count as newer.
pub fn evaluate_commits(approved_at: DateTime<Utc>, commits: &[Commit]) -> ReviewState {
    let pushed_after = commits
        .iter()
        .filter_map(Commit::committed_at)
        .any(|at| at > approved_at);

    if pushed_after {
        ReviewState::NEEDS_REAPPROVAL
    } else {
        ReviewState::RESOLVED
    }
}

/// Fetch reviews (and commits if approved) and classify the pull request.
///
/// A failed review fetch reports `NEEDS_REVIEW` so the PR stays visible.
/// A failed commit fetch after an approval reports `RESOLVED`.
pub async fn check_review_status(client: &dyn GitHubApi, repo: &str, pr: &PullRequest) -> ReviewState {
    let reviews = match client.list_reviews(repo, pr.number).await {
        Ok(reviews) => reviews,
        Err(e) => {
            warn!("Failed to fetch reviews for {}#{}: {}", repo, pr.number, e);
            return ReviewState::NEEDS_REVIEW;
        }
    };

    if reviews.is_empty() {
        return ReviewState::NEEDS_REVIEW;
    }

    let approved_at = match evaluate_reviews(&reviews) {
        ReviewVerdict::NeedsReview => return ReviewState::NEEDS_REVIEW,
        ReviewVerdict::Approved(at) => at,
    };

    match client.list_commits(repo, pr.number).await {
        Ok(commits) => evaluate_commits(approved_at, &commits),
        Err(e) => {
            warn!("Failed to fetch commits for {}#{}: {}", repo, pr.number, e);
            ReviewState::RESOLVED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockGitHub;
    use crate::github::mock::{commit, pull_request, review};
    use chrono::Duration;

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    #[test]
    fn test_no_reviews_needs_review() {
        assert_eq!(evaluate_reviews(&[]), ReviewVerdict::NeedsReview);
    }

    #[test]
    fn test_only_comments_needs_review() {
        let reviews = vec![
            review("alice", "COMMENTED", t(0)),
            review("bob", "CHANGES_REQUESTED", t(5)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::NeedsReview);
    }

    #[test]
    fn test_latest_review_per_reviewer_wins() {
        // alice approved, then requested changes: her approval no longer counts
        let reviews = vec![
            review("alice", "APPROVED", t(0)),
            review("alice", "CHANGES_REQUESTED", t(10)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::NeedsReview);

        // order of the list does not matter, only submission time
        let reviews = vec![
            review("alice", "CHANGES_REQUESTED", t(0)),
            review("alice", "APPROVED", t(10)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::Approved(t(10)));

        let reviews = vec![
            review("alice", "APPROVED", t(10)),
            review("alice", "CHANGES_REQUESTED", t(0)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::Approved(t(10)));
    }

    #[test]
    fn test_equal_times_last_seen_wins() {
        let reviews = vec![
            review("alice", "APPROVED", t(0)),
            review("alice", "COMMENTED", t(0)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::NeedsReview);
    }

    #[test]
    fn test_latest_approval_time_is_max_across_reviewers() {
        let reviews = vec![
            review("alice", "APPROVED", t(0)),
            review("bob", "APPROVED", t(20)),
            review("carol", "COMMENTED", t(30)),
        ];
        assert_eq!(evaluate_reviews(&reviews), ReviewVerdict::Approved(t(20)));
    }

    #[test]
    fn test_commit_after_approval_needs_reapproval() {
        let commits = vec![commit("a1", t(-10)), commit("b2", t(15))];
        assert_eq!(evaluate_commits(t(10), &commits), ReviewState::NEEDS_REAPPROVAL);
    }

    #[test]
    fn test_commit_at_approval_time_is_not_after() {
        let commits = vec![commit("a1", t(10))];
        assert_eq!(evaluate_commits(t(10), &commits), ReviewState::RESOLVED);
    }

    #[test]
    fn test_no_commits_after_approval_resolved() {
        let commits = vec![commit("a1", t(-30)), commit("b2", t(-5))];
        assert_eq!(evaluate_commits(t(0), &commits), ReviewState::RESOLVED);
        assert!(!ReviewState::RESOLVED.needs_attention());
    }

    #[tokio::test]
    async fn test_check_zero_reviews() {
        let mock = MockGitHub::new();
        let pr = pull_request(1, "dev");
        let state = check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(state, ReviewState::NEEDS_REVIEW);
    }

    #[tokio::test]
    async fn test_check_approved_then_pushed() {
        let mock = MockGitHub::new();
        mock.set_reviews("acme/widgets", 1, vec![review("alice", "APPROVED", t(0))]);
        mock.set_commits("acme/widgets", 1, vec![commit("c", t(5))]);

        let pr = pull_request(1, "dev");
        let state = check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(state, ReviewState::NEEDS_REAPPROVAL);
    }

    #[tokio::test]
    async fn test_check_approved_and_clean() {
        let mock = MockGitHub::new();
        mock.set_reviews("acme/widgets", 1, vec![review("alice", "APPROVED", t(0))]);
        mock.set_commits("acme/widgets", 1, vec![commit("c", t(-5))]);

        let pr = pull_request(1, "dev");
        let state = check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(state, ReviewState::RESOLVED);
    }

    #[tokio::test]
    async fn test_review_fetch_failure_fails_open() {
        let mock = MockGitHub::new();
        mock.set_reviews("acme/widgets", 1, vec![review("alice", "APPROVED", t(0))]);
        mock.fail_reviews("acme/widgets", 1);

        let pr = pull_request(1, "dev");
        let state = check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(state, ReviewState::NEEDS_REVIEW);
    }

    #[tokio::test]
    async fn test_commit_fetch_failure_fails_closed() {
        let mock = MockGitHub::new();
        mock.set_reviews("acme/widgets", 1, vec![review("alice", "APPROVED", t(0))]);
        mock.set_commits("acme/widgets", 1, vec![commit("c", t(5))]);
        mock.fail_commits("acme/widgets", 1);

        let pr = pull_request(1, "dev");
        let state = check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(state, ReviewState::RESOLVED);
    }

    #[tokio::test]
    async fn test_commits_not_fetched_without_approval() {
        let mock = MockGitHub::new();
        mock.set_reviews("acme/widgets", 1, vec![review("alice", "COMMENTED", t(0))]);

        let pr = pull_request(1, "dev");
        check_review_status(&mock, "acme/widgets", &pr).await;
        assert_eq!(
            mock.count_calls(|c| matches!(c, crate::github::MockCall::ListCommits(..))),
            0
        );
    }
}
