// Evaluation queue: callers enqueue player ids without waiting, a background
// worker evaluates them. A player already waiting is not queued twice.

use super::engine::{AchievementEngine, UnlockedAchievement};
use crate::store::{Store, StoreResult};
use crate::types::PlayerId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info};

#[derive(Clone)]
pub struct EvaluationQueue {
    tx: mpsc::UnboundedSender<PlayerId>,
    pending: Arc<DashMap<PlayerId, ()>>,
}

pub struct EvaluationReceiver {
    rx: mpsc::UnboundedReceiver<PlayerId>,
    pending: Arc<DashMap<PlayerId, ()>>,
}

impl EvaluationQueue {
    pub fn channel() -> (EvaluationQueue, EvaluationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        (
            EvaluationQueue {
                tx,
                pending: pending.clone(),
            },
            EvaluationReceiver { rx, pending },
        )
    }

    /// Returns `false` when the player was already pending (coalesced) or the
    /// worker is gone.
    pub fn enqueue(&self, player_id: PlayerId) -> bool {
        if self.pending.insert(player_id, ()).is_some() {
            return false;
        }
        if self.tx.send(player_id).is_err() {
            self.pending.remove(&player_id);
            return false;
        }
        true
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queues every player in the store. Returns how many were newly queued.
    pub async fn enqueue_all(&self, store: &dyn Store) -> StoreResult<usize> {
        let ids = store.list_player_ids().await?;
        Ok(ids.into_iter().filter(|&id| self.enqueue(id)).count())
    }
}

impl EvaluationReceiver {
    /// Next player to evaluate. Cleared from the pending set first so events
    /// committed during the evaluation enqueue it again.
    pub async fn recv(&mut self) -> Option<PlayerId> {
        let player_id = self.rx.recv().await?;
        self.pending.remove(&player_id);
        Some(player_id)
    }

    pub fn try_recv(&mut self) -> Option<PlayerId> {
        let player_id = self.rx.try_recv().ok()?;
        self.pending.remove(&player_id);
        Some(player_id)
    }

    /// Evaluates everything queued right now, one player at a time.
    pub async fn process_ready(&mut self, engine: &AchievementEngine) -> Vec<UnlockedAchievement> {
        let mut all = Vec::new();
        while let Some(player_id) = self.try_recv() {
            match engine.evaluate(player_id).await {
                Ok(unlocked) => all.extend(unlocked),
                Err(e) => error!(player_id, error = %e, "Achievement evaluation failed"),
            }
        }
        all
    }
}

/// Drains the queue until shutdown, evaluating at most `max_concurrent`
/// players at once.
pub async fn run_evaluation_worker(
    engine: Arc<AchievementEngine>,
    mut receiver: EvaluationReceiver,
    max_concurrent: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    info!(
        "🚀 [Achievements] Evaluation worker started (max {} concurrent)",
        max_concurrent
    );
    loop {
        let player_id = tokio::select! {
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = engine.evaluate(player_id).await {
                error!(player_id, error = %e, "Achievement evaluation failed");
            }
        });
    }
    // Let in-flight evaluations finish before returning.
    let _ = semaphore.acquire_many(max_concurrent.max(1) as u32).await;
    info!("🛑 [Achievements] Evaluation worker stopped");
}
