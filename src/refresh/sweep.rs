//! Repository sweeps: fetch a batch of repos and merge into the store.

use log::{info, warn};

use crate::context::MonitorContext;
use crate::refresh::fetcher::fetch_repo_prs;

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Repos whose active rows were replaced
    pub refreshed: Vec<String>,
    /// Repos whose fetch or store write failed; their rows are untouched
    pub failed: Vec<String>,
    /// PRs needing attention across refreshed repos
    pub needing_attention: usize,
    /// The active set seen by the presentation layer changed
    pub changed: bool,
}

/// Fetch `repos` and replace their active rows in one store transaction.
///
/// A repository whose fetch fails keeps its existing rows for this cycle;
/// rows of repositories outside the batch are never touched. The cache is
/// reloaded from the store afterwards, so the merged view is sorted by
/// (repository, number).
pub async fn refresh_repos(ctx: &MonitorContext, repos: &[String]) -> SweepReport {
    let mut report = SweepReport::default();
    let mut records = Vec::new();

    for repo in repos {
        match fetch_repo_prs(ctx, repo).await {
            Ok(mut found) => {
                report.refreshed.push(repo.clone());
                records.append(&mut found);
            }
            Err(e) => {
                warn!("Failed to fetch PRs for {}: {}", repo, e);
                report.failed.push(repo.clone());
            }
        }
    }

    if !report.refreshed.is_empty() {
        match ctx.store.replace_active_prs(&report.refreshed, &records) {
            Ok(()) => report.needing_attention = records.len(),
            Err(e) => {
                warn!("Failed to store sweep of {} repos: {}", report.refreshed.len(), e);
                report.failed.append(&mut report.refreshed);
            }
        }
    }

    report.changed = ctx.reload_cache();
    info!(
        "Swept {} repos ({} failed), {} PRs need attention",
        report.refreshed.len(),
        report.failed.len(),
        report.needing_attention
    );
    report
}
