//! In-memory mirror of the store's active PRs for the presentation layer.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::Result;
use crate::store::{PrStore, PullRequestRecord};

/// Ordered active PRs plus a change generation.
///
/// The whole list is replaced under one lock; readers never observe a
/// partially applied update. Each replacement that changes the list bumps
/// the generation published on the watch channel.
#[derive(Debug)]
pub struct ActivePrCache {
    prs: Mutex<Vec<PullRequestRecord>>,
    changes: watch::Sender<u64>,
}

impl Default for ActivePrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivePrCache {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            prs: Mutex::new(Vec::new()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PullRequestRecord>> {
        self.prs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Vec<PullRequestRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current change generation.
    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Swap in a new list; returns whether it differed in anything but
    /// check times.
    pub fn replace(&self, prs: Vec<PullRequestRecord>) -> bool {
        let mut guard = self.lock();
        self.swap_locked(&mut guard, prs)
    }

    /// Reload from the store while holding the cache lock, so concurrent
    /// reloads apply in the order they read.
    pub fn reload_from(&self, store: &PrStore) -> Result<bool> {
        let mut guard = self.lock();
        let prs = store.load_active_prs()?;
        Ok(self.swap_locked(&mut guard, prs))
    }

    fn swap_locked(&self, guard: &mut MutexGuard<'_, Vec<PullRequestRecord>>, prs: Vec<PullRequestRecord>) -> bool {
        let changed = guard.len() != prs.len() || guard.iter().zip(&prs).any(|(a, b)| !a.same_listing(b));
        **guard = prs;
        if changed {
            self.changes.send_modify(|generation| *generation += 1);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(repo: &str, number: u64) -> PullRequestRecord {
        PullRequestRecord {
            repo: repo.to_string(),
            number,
            title: format!("PR {}", number),
            author: "dev".to_string(),
            url: String::new(),
            needs_review: true,
            needs_reapproval: false,
            ignored: false,
            muted: false,
            last_checked: Utc::now(),
        }
    }

    #[test]
    fn test_replace_bumps_generation_only_on_change() {
        let cache = ActivePrCache::new();
        assert_eq!(cache.generation(), 0);

        assert!(cache.replace(vec![record("acme/a", 1)]));
        assert_eq!(cache.generation(), 1);

        let same = cache.snapshot();
        assert!(!cache.replace(same));
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_fresher_check_time_is_not_a_change() {
        let cache = ActivePrCache::new();
        let mut pr = record("acme/a", 1);
        cache.replace(vec![pr.clone()]);

        pr.last_checked = pr.last_checked + chrono::Duration::minutes(5);
        assert!(!cache.replace(vec![pr.clone()]));
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.snapshot()[0].last_checked, pr.last_checked);

        pr.needs_reapproval = true;
        assert!(cache.replace(vec![pr]));
        assert_eq!(cache.generation(), 2);
    }

    #[test]
    fn test_reload_from_store() {
        let temp = TempDir::new().unwrap();
        let store = PrStore::open(temp.path()).unwrap();
        store.upsert_pr(&record("acme/b", 2)).unwrap();
        store.upsert_pr(&record("acme/a", 7)).unwrap();

        let cache = ActivePrCache::new();
        assert!(cache.reload_from(&store).unwrap());

        let keys: Vec<String> = cache.snapshot().iter().map(|p| p.key().to_string()).collect();
        assert_eq!(keys, vec!["acme/a#7", "acme/b#2"]);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let cache = ActivePrCache::new();
        let mut rx = cache.subscribe();

        cache.replace(vec![record("acme/a", 1)]);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
