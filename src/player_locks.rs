use crate::types::PlayerId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-player async mutexes shared by ingestion and the achievement engine.
///
/// Work for one player is serialized; different players proceed in parallel.
/// A player's entry lives only while someone holds or waits for its lock.
#[derive(Default)]
pub struct PlayerLocks {
    locks: DashMap<PlayerId, Arc<Mutex<()>>>,
}

impl PlayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, player_id: PlayerId) -> PlayerGuard<'_> {
        // Clone out of the map before awaiting so the shard lock is released.
        let mutex = self.locks.entry(player_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        PlayerGuard {
            locks: self,
            player_id,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock on one player. Dropping it removes the map entry when nobody
/// else references the mutex.
pub struct PlayerGuard<'a> {
    locks: &'a PlayerLocks,
    player_id: PlayerId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PlayerGuard<'_> {
    fn drop(&mut self) {
        // Release our clone first so only the map's reference can remain.
        drop(self.guard.take());
        // Waiters hold a clone, and `remove_if` runs under the shard lock that
        // `lock` takes to clone, so a live mutex is never removed.
        self.locks
            .locks
            .remove_if(&self.player_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_player_is_serialized() {
        let locks = Arc::new(PlayerLocks::new());
        let guard = locks.lock(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(1).await;
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
    async fn test_idle_entries_are_pruned() {
        let locks = Arc::new(PlayerLocks::new());
        let guard = locks.lock(1).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(1).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still references the mutex, so the entry survives.
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());

        drop(locks.lock(2).await);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_players_do_not_block() {
        let locks = PlayerLocks::new();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
