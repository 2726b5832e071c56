//! Per-repository fetch and classification.

use chrono::Utc;
use log::{debug, warn};

use crate::context::MonitorContext;
use crate::error::Result;
use crate::review::check_review_status;
use crate::store::{PrKey, PullRequestRecord};

/// List open PRs in `repo` and return those needing attention.
///
/// Drops PRs by untracked authors, drafts, PRs created before the max-age
/// cutoff, and PRs the user ignored. The remainder are classified; only
/// those needing review or re-approval are returned, ordered by number.
pub async fn fetch_repo_prs(ctx: &MonitorContext, repo: &str) -> Result<Vec<PullRequestRecord>> {
    let client = ctx.client_for_repo(repo)?;
    let pulls = client.list_open_pulls(repo).await?;
    let cutoff = ctx.tracking.cutoff(Utc::now());

    let mut records = Vec::new();
    for pr in pulls {
        if !ctx.tracking.is_tracked_author(pr.author()) || pr.draft || pr.created_at < cutoff {
            continue;
        }

        let key = PrKey::new(repo, pr.number);
        match ctx.store.is_ignored(&key) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => warn!("Failed to read ignore flag for {}: {}", key, e),
        }

        let state = check_review_status(client.as_ref(), repo, &pr).await;
        if state.needs_attention() {
            records.push(PullRequestRecord::from_pull(repo, &pr, state));
        } else {
            debug!("{} is fully reviewed", key);
        }
    }

    records.sort_by_key(|r| r.number);
    Ok(records)
}
