//! Single-PR re-evaluation shared by the notification poller and rechecks.

use log::debug;

use crate::context::MonitorContext;
use crate::error::Result;
use crate::github::{GitHubApi, PullRequest};
use crate::review::{ReviewState, check_review_status};
use crate::store::{PrKey, PullRequestRecord};

/// What re-evaluating a PR did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Upserted with these flags
    NeedsAttention(ReviewState),
    /// Closed, draft or by an untracked author; record removed
    Untracked,
    /// Fully reviewed; record removed
    Resolved,
}

impl PullOutcome {
    /// No further polling is needed for this PR.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PullOutcome::NeedsAttention(_))
    }
}

/// Classify a freshly fetched PR and write the result to the store.
///
/// The caller decides whether the PR should be looked at at all (ignored,
/// muted); this only applies the tracked-pull filter and the classifier.
pub async fn evaluate_pull(
    ctx: &MonitorContext,
    client: &dyn GitHubApi,
    repo: &str,
    pr: &PullRequest,
) -> Result<PullOutcome> {
    let key = PrKey::new(repo, pr.number);

    if !ctx.tracking.is_tracked_pull(pr) {
        debug!("{} is closed, draft or untracked; removing", key);
        ctx.store.remove_pr(&key)?;
        return Ok(PullOutcome::Untracked);
    }

    let state = check_review_status(client, repo, pr).await;
    if state.needs_attention() {
        ctx.store.upsert_pr(&PullRequestRecord::from_pull(repo, pr, state))?;
        Ok(PullOutcome::NeedsAttention(state))
    } else {
        ctx.store.remove_pr(&key)?;
        Ok(PullOutcome::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Tracking;
    use crate::github::mock::{pull_request, review};
    use crate::github::{ClientPool, MockGitHub};
    use crate::store::PrStore;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    const REPO: &str = "acme/widgets";

    fn create_context(mock: Arc<MockGitHub>) -> (MonitorContext, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(PrStore::open(temp.path()).unwrap());
        let tracking = Tracking::new(vec![REPO.to_string()], &["dev".to_string()], 3);
        (MonitorContext::new(store, ClientPool::with_default(mock), tracking), temp)
    }

    #[tokio::test]
    async fn test_needs_review_is_upserted() {
        let mock = Arc::new(MockGitHub::new());
        let (ctx, _temp) = create_context(mock.clone());
        let pr = pull_request(7, "dev");

        let outcome = evaluate_pull(&ctx, mock.as_ref(), REPO, &pr).await.unwrap();
        assert_eq!(outcome, PullOutcome::NeedsAttention(ReviewState::NEEDS_REVIEW));
        assert!(!outcome.is_terminal());
        assert!(ctx.store.get_pr(&PrKey::new(REPO, 7)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_closed_pr_is_removed() {
        let mock = Arc::new(MockGitHub::new());
        let (ctx, _temp) = create_context(mock.clone());

        let mut pr = pull_request(7, "dev");
        evaluate_pull(&ctx, mock.as_ref(), REPO, &pr).await.unwrap();

        pr.state = "closed".to_string();
        let outcome = evaluate_pull(&ctx, mock.as_ref(), REPO, &pr).await.unwrap();
        assert_eq!(outcome, PullOutcome::Untracked);
        assert!(ctx.store.get_pr(&PrKey::new(REPO, 7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolved_pr_is_removed() {
        let mock = Arc::new(MockGitHub::new());
        let (ctx, _temp) = create_context(mock.clone());
        let pr = pull_request(7, "dev");
        evaluate_pull(&ctx, mock.as_ref(), REPO, &pr).await.unwrap();

        mock.set_reviews(REPO, 7, vec![review("alice", "APPROVED", Utc::now())]);
        let outcome = evaluate_pull(&ctx, mock.as_ref(), REPO, &pr).await.unwrap();
        assert_eq!(outcome, PullOutcome::Resolved);
        assert!(outcome.is_terminal());
        assert!(ctx.store.get_pr(&PrKey::new(REPO, 7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_muted_flag_survives_reclassification() {
        let mock = Arc::new(MockGitHub::new());
        let (ctx, _temp) = create_context(mock.clone());
        let key = PrKey::new(REPO, 7);
        ctx.store.set_muted(&key, true).unwrap();

        evaluate_pull(&ctx, mock.as_ref(), REPO, &pull_request(7, "dev"))
            .await
            .unwrap();

        let record = ctx.store.get_pr(&key).unwrap().unwrap();
        assert!(record.muted);
        assert_eq!(record.title, "Change #7");
    }
}
