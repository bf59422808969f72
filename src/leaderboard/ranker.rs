// Leaderboard ranker: recomputes one period's snapshot from persisted totals,
// detects rank changes and queues milestone crossings for evaluation.

use super::scoring::{period_window, rank_players};
use crate::achievements::{AchievementCatalog, EvaluationQueue};
use crate::metrics;
use crate::notifications::{Event, NotificationHub};
use crate::settings::{Leaderboard as LeaderboardSettings, RecomputeIntervals};
use crate::store::{Store, StoreError};
use crate::types::{Period, PlayerId, SnapshotEntry};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

/// Ranks that always count as milestones.
pub const BASE_RANK_MILESTONES: [u32; 3] = [1, 3, 10];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankDelta {
    pub period: Period,
    pub player_id: PlayerId,
    pub wallet_address: String,
    /// `None` when the wallet was not in the previous snapshot.
    pub old_rank: Option<u32>,
    pub new_rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// Snapshot replaced; carries every wallet that is new or moved.
    Completed(Vec<RankDelta>),
    /// Another recompute of the same period was already running.
    Skipped,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LeaderboardRanker {
    store: Arc<dyn Store>,
    hub: NotificationHub,
    evaluations: EvaluationQueue,
    settings: LeaderboardSettings,
    milestones: HashMap<Period, BTreeSet<u32>>,
    in_flight: HashMap<Period, AtomicBool>,
}

impl LeaderboardRanker {
    pub fn new(
        store: Arc<dyn Store>,
        hub: NotificationHub,
        evaluations: EvaluationQueue,
        catalog: &AchievementCatalog,
        settings: LeaderboardSettings,
    ) -> Self {
        let milestones = Period::ALL
            .iter()
            .map(|&period| {
                let mut ranks = catalog.rank_thresholds(period);
                ranks.extend(BASE_RANK_MILESTONES);
                (period, ranks)
            })
            .collect();
        let in_flight = Period::ALL
            .iter()
            .map(|&period| (period, AtomicBool::new(false)))
            .collect();
        Self {
            store,
            hub,
            evaluations,
            settings,
            milestones,
            in_flight,
        }
    }

    pub async fn recompute(&self, period: Period) -> Result<RecomputeOutcome, StoreError> {
        self.recompute_at(period, Utc::now()).await
    }

    /// Recomputes `period` as of `now`. At most one recompute per period runs
    /// at a time; overlapping calls return [`RecomputeOutcome::Skipped`].
    #[instrument(skip(self))]
    pub async fn recompute_at(
        &self,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<RecomputeOutcome, StoreError> {
        let Some(flag) = self.in_flight.get(&period) else {
            return Ok(RecomputeOutcome::Skipped);
        };
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%period, "Recompute already in flight, skipping");
            metrics::increment_leaderboard_recompute_skipped(period.as_str());
            return Ok(RecomputeOutcome::Skipped);
        }
        let _guard = InFlightGuard(flag);
        let started = Instant::now();

        let previous: HashMap<String, u32> = self
            .store
            .snapshot(period)
            .await?
            .into_iter()
            .map(|entry| (entry.wallet_address, entry.rank))
            .collect();

        let window = period_window(period, now, self.settings.week_window);
        let inputs = self.store.score_inputs(window).await?;
        let ranked = rank_players(period, inputs, self.settings.snapshot_limit);

        let mut entries = Vec::with_capacity(ranked.len());
        let mut deltas = Vec::new();
        for (i, scored) in ranked.into_iter().enumerate() {
            let rank = (i + 1) as u32;
            let previous_rank = previous.get(&scored.wallet_address).copied();
            if previous_rank != Some(rank) {
                deltas.push(RankDelta {
                    period,
                    player_id: scored.player_id,
                    wallet_address: scored.wallet_address.clone(),
                    old_rank: previous_rank,
                    new_rank: rank,
                });
            }
            entries.push(SnapshotEntry {
                period,
                player_id: scored.player_id,
                wallet_address: scored.wallet_address,
                rank,
                previous_rank,
                period_score: scored.score,
                verified: scored.verified,
                captured_at: now,
            });
        }
        let ranked_count = entries.len();

        self.store.replace_snapshot(period, entries).await?;

        for delta in &deltas {
            if let Some(old_rank) = delta.old_rank {
                self.hub.publish(Event::RankChanged {
                    wallet_address: delta.wallet_address.clone(),
                    period,
                    old_rank,
                    new_rank: delta.new_rank,
                });
            }
            if self.crosses_milestone(period, delta.old_rank, delta.new_rank) {
                self.evaluations.enqueue(delta.player_id);
            }
        }
        self.hub.publish(Event::LeaderboardUpdated { period });

        let elapsed = started.elapsed();
        metrics::record_leaderboard_recompute(period.as_str(), elapsed);
        info!(
            "📊 [Leaderboard] {} recomputed: {} ranked, {} moved ({}ms)",
            period,
            ranked_count,
            deltas.len(),
            elapsed.as_millis()
        );
        Ok(RecomputeOutcome::Completed(deltas))
    }

    fn crosses_milestone(&self, period: Period, old_rank: Option<u32>, new_rank: u32) -> bool {
        let Some(milestones) = self.milestones.get(&period) else {
            return false;
        };
        milestones
            .iter()
            .any(|&m| new_rank <= m && old_rank.map_or(true, |old| old > m))
    }
}

/// Spawns one interval loop per period. Each loop stops when `shutdown` flips.
pub fn run_ranker_scheduler(
    ranker: Arc<LeaderboardRanker>,
    intervals: RecomputeIntervals,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    Period::ALL
        .iter()
        .map(|&period| {
            let ranker = ranker.clone();
            let mut shutdown = shutdown.clone();
            let every = intervals.for_period(period);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!("⏱️ [Leaderboard] {} scheduler running every {:?}", period, every);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = ranker.recompute(period).await {
                                error!(%period, error = %e, "Leaderboard recompute failed");
                            }
                        }
                    }
                }
                info!("🛑 [Leaderboard] {} scheduler stopped", period);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{Notification, Topic};
    use crate::store::MemoryStore;
    use crate::types::NewMiningEvent;
    use rust_decimal::Decimal;

    fn ranker(store: Arc<MemoryStore>, hub: NotificationHub) -> (LeaderboardRanker, crate::achievements::EvaluationReceiver) {
        let (queue, receiver) = EvaluationQueue::channel();
        let catalog = AchievementCatalog::from_defs(Vec::new()).unwrap();
        (
            LeaderboardRanker::new(store, hub, queue, &catalog, LeaderboardSettings::default()),
            receiver,
        )
    }

    async fn player_with_ap(store: &MemoryStore, wallet: &str, ap: i64) -> PlayerId {
        let player = store.register_player(wallet, Utc::now(), &[]).await.unwrap();
        add_ap(store, player.id, &format!("{}-seed", wallet), ap).await;
        player.id
    }

    async fn add_ap(store: &MemoryStore, player_id: PlayerId, tx: &str, ap: i64) {
        store
            .commit_event(NewMiningEvent {
                player_id,
                pool_id: "cpu-pool".to_string(),
                tx_hash: tx.to_string(),
                amount_advc: Decimal::from(ap) / Decimal::from(10),
                ap_awarded: ap,
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn drain(sub: &mut crate::notifications::Subscription) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Some(n) = sub.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn test_first_recompute_emits_no_rank_changes() {
        let store = Arc::new(MemoryStore::new());
        let hub = NotificationHub::new(64);
        let mut sub = hub.subscribe(&[], 64);
        let (ranker, _rx) = ranker(store.clone(), hub.clone());
        player_with_ap(&store, "w1", 100).await;
        player_with_ap(&store, "w2", 50).await;

        let RecomputeOutcome::Completed(deltas) = ranker.recompute(Period::AllTime).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|d| d.old_rank.is_none()));

        let topics: Vec<Topic> = drain(&mut sub).iter().map(|n| n.topic()).collect();
        assert_eq!(topics, vec![Topic::LeaderboardUpdated]);
    }

    #[tokio::test]
    async fn test_rank_delta_and_milestone() {
        let store = Arc::new(MemoryStore::new());
        let hub = NotificationHub::new(64);
        let (ranker, mut rx) = ranker(store.clone(), hub.clone());

        let mut ids = Vec::new();
        for (wallet, ap) in [("a", 500), ("b", 400), ("c", 300), ("d", 200), ("e", 100)] {
            ids.push(player_with_ap(&store, wallet, ap).await);
        }
        ranker.recompute(Period::AllTime).await.unwrap();
        while rx.try_recv().is_some() {}

        // "e" jumps from 5th to 2nd; "b", "c", "d" each drop one place.
        add_ap(&store, ids[4], "e-boost", 350).await;
        let mut sub = hub.subscribe(&[Topic::RankChanged], 64);
        let RecomputeOutcome::Completed(deltas) = ranker.recompute(Period::AllTime).await.unwrap() else {
            panic!("expected completion");
        };

        let e = deltas.iter().find(|d| d.wallet_address == "e").unwrap();
        assert_eq!((e.old_rank, e.new_rank), (Some(5), 2));
        assert_eq!(deltas.len(), 4);
        assert_eq!(drain(&mut sub).len(), 4);

        // "e" crossed into the top 3; "b" fell from 2 to 3 and stays inside it.
        let mut queued = Vec::new();
        while let Some(id) = rx.try_recv() {
            queued.push(id);
        }
        assert_eq!(queued, vec![ids[4]]);

        let snapshot = store.snapshot(Period::AllTime).await.unwrap();
        let ranks: Vec<u32> = snapshot.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert_eq!(snapshot[1].previous_rank, Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_recompute_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (ranker, _rx) = ranker(store, NotificationHub::new(4));
        let flag = ranker.in_flight.get(&Period::Today).unwrap();
        flag.store(true, Ordering::Release);
        assert_eq!(
            ranker.recompute(Period::Today).await.unwrap(),
            RecomputeOutcome::Skipped
        );
        // Other periods are independent.
        assert!(matches!(
            ranker.recompute(Period::AllTime).await.unwrap(),
            RecomputeOutcome::Completed(_)
        ));
        flag.store(false, Ordering::Release);
        assert!(matches!(
            ranker.recompute(Period::Today).await.unwrap(),
            RecomputeOutcome::Completed(_)
        ));
    }
}
