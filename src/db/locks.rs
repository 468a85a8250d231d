//! Per-resource async locks.
//!
//! Operations that check a condition and then write (appointment booking,
//! invoice numbering, prescription refills) hold the lock for every resource
//! key they touch, so two callers can never both pass the check before either
//! persists.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Locks several keys. Keys are taken in sorted order so concurrent
    /// callers with overlapping key sets cannot deadlock.
    pub async fn lock_all(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(&key).await);
        }
        guards
    }

    /// Drops slots nobody is holding or waiting on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("doctor:1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("doctor:1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_all_dedups_and_prune_releases() {
        let locks = KeyedLocks::new();
        {
            let guards = locks
                .lock_all(&["patient:2".to_string(), "doctor:1".to_string(), "doctor:1".to_string()])
                .await;
            assert_eq!(guards.len(), 2);
            assert_eq!(locks.prune(), 0);
        }
        assert_eq!(locks.prune(), 2);
        assert!(locks.is_empty());
    }
}
