//! In-memory registry of running recheck workers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::PrKey;

/// Keys with a live worker. Registration is insert-if-absent under one lock.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    active: Arc<Mutex<HashSet<PrKey>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PrKey>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `key`. `None` when a worker already holds it.
    pub fn try_register(&self, key: &PrKey) -> Option<WorkerGuard> {
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(WorkerGuard {
            key: key.clone(),
            registry: self.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases the key when the worker ends, however it ends.
#[derive(Debug)]
pub struct WorkerGuard {
    key: PrKey,
    registry: WorkerRegistry,
}

impl WorkerGuard {
    pub fn key(&self) -> &PrKey {
        &self.key
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_registration_is_refused() {
        let registry = WorkerRegistry::new();
        let key = PrKey::new("acme/widgets", 1);

        let guard = registry.try_register(&key).unwrap();
        assert!(registry.try_register(&key).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(guard.key(), &key);

        drop(guard);
        assert!(registry.is_empty());
        assert!(registry.try_register(&key).is_some());
    }

    #[test]
    fn test_concurrent_registration_has_one_winner() {
        let registry = WorkerRegistry::new();
        let key = PrKey::new("acme/widgets", 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                std::thread::spawn(move || registry.try_register(&key).map(std::mem::forget).is_some())
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
