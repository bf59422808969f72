// Ingestion & dedup pipeline: raw pool records -> validated events -> store.
//
// Dedup is the store's atomic insert-if-absent on (pool_id, tx_hash). A fresh
// commit publishes `mining_reward` and queues the player for evaluation.

use crate::achievements::{AchievementCatalog, EvaluationQueue};
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::metrics;
use crate::normalization::validate_record;
use crate::notifications::{Event, NotificationHub};
use crate::player_locks::PlayerLocks;
use crate::settings::Ingestion as IngestionSettings;
use crate::store::{Store, StoreError};
use crate::types::conversions::ap_for_amount;
use crate::types::{
    CommitOutcome, MiningEvent, NewMiningEvent, Player, RawMiningRecord, ValidatedRecord,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Committed { event: MiningEvent, player: Player },
    Duplicate(MiningEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("record could not be persisted after {attempts} attempt(s): {reason}")]
    PersistedFailure { attempts: u32, reason: String },
}

/// Per-batch tally returned by [`IngestionPipeline::ingest_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub committed: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub failed: usize,
    pub ap_awarded: i64,
}

impl IngestSummary {
    fn record(&mut self, result: &Result<IngestOutcome, IngestError>) {
        match result {
            Ok(IngestOutcome::Committed { event, .. }) => {
                self.committed += 1;
                self.ap_awarded += event.ap_awarded;
            }
            Ok(IngestOutcome::Duplicate(_)) => self.duplicates += 1,
            Err(IngestError::MalformedRecord(_)) => self.malformed += 1,
            Err(IngestError::PersistedFailure { .. }) => self.failed += 1,
        }
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    settings: IngestionSettings,
    catalog: Arc<AchievementCatalog>,
    locks: Arc<PlayerLocks>,
    hub: NotificationHub,
    evaluations: EvaluationQueue,
    dead_letters: Arc<DeadLetterQueue>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        settings: IngestionSettings,
        catalog: Arc<AchievementCatalog>,
        locks: Arc<PlayerLocks>,
        hub: NotificationHub,
        evaluations: EvaluationQueue,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            store,
            settings,
            catalog,
            locks,
            hub,
            evaluations,
            dead_letters,
        }
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    #[instrument(skip(self, raw), fields(record = %raw.describe()))]
    pub async fn ingest(&self, raw: RawMiningRecord) -> Result<IngestOutcome, IngestError> {
        let record = match validate_record(&raw, Utc::now(), self.settings.max_future_skew_seconds) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Dropping malformed mining record");
                metrics::increment_records_malformed();
                return Err(IngestError::MalformedRecord(e.to_string()));
            }
        };
        let ap_awarded = match ap_for_amount(record.amount_advc, self.settings.conversion_rate) {
            Ok(ap) => ap,
            Err(e) => {
                warn!(error = %e, amount = %record.amount_advc, "Dropping unconvertible amount");
                metrics::increment_records_malformed();
                return Err(IngestError::MalformedRecord(e.to_string()));
            }
        };

        let attempts = AtomicU32::new(0);
        let result = RetryIf::spawn(
            self.retry_strategy(),
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.persist(&record, ap_awarded)
            },
            |e: &StoreError| {
                let retry = e.is_transient();
                if retry {
                    metrics::increment_store_retries();
                    debug!(error = %e, "Transient store failure, retrying");
                }
                retry
            },
        )
        .await;

        match result {
            Ok(CommitOutcome::Inserted { event, player }) => {
                metrics::increment_events_ingested(&event.pool_id);
                info!(
                    "⛏️ [Ingestion] {} mined {} ADVC on {} (+{} AP)",
                    player.wallet_address, event.amount_advc, event.pool_id, event.ap_awarded
                );
                self.hub.publish(Event::MiningReward {
                    player_id: player.id,
                    amount_advc: event.amount_advc,
                    ap_awarded: event.ap_awarded,
                });
                self.evaluations.enqueue(player.id);
                Ok(IngestOutcome::Committed { event, player })
            }
            Ok(CommitOutcome::Duplicate(event)) => {
                metrics::increment_events_duplicate(&event.pool_id);
                debug!(event_id = event.id, "Duplicate mining record ignored");
                Ok(IngestOutcome::Duplicate(event))
            }
            Err(e) => {
                let attempts = attempts.load(Ordering::Relaxed);
                let reason = e.to_string();
                metrics::increment_records_dead_lettered();
                self.dead_letters
                    .push(DeadLetter::new(record.into(), reason.clone(), attempts));
                Err(IngestError::PersistedFailure { attempts, reason })
            }
        }
    }

    /// Ingests one poll's worth of records in order.
    pub async fn ingest_batch(&self, records: Vec<RawMiningRecord>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for raw in records {
            let result = self.ingest(raw).await;
            summary.record(&result);
        }
        if summary.committed > 0 || summary.failed > 0 {
            info!(
                committed = summary.committed,
                duplicates = summary.duplicates,
                malformed = summary.malformed,
                failed = summary.failed,
                ap_awarded = summary.ap_awarded,
                "Ingested batch"
            );
        }
        summary
    }

    /// Re-ingests every dead-lettered record. The replayed entries leave the
    /// queue only after the whole batch ran; records that fail again are
    /// queued anew. A replay cut short is safe to repeat since commits dedup.
    pub async fn replay_dead_letters(&self) -> IngestSummary {
        let entries = self.dead_letters.snapshot();
        if entries.is_empty() {
            return IngestSummary::default();
        }
        info!("🔁 [Ingestion] Replaying {} dead-lettered records", entries.len());
        let ids: Vec<Uuid> = entries.iter().map(|d| d.id).collect();
        let summary = self
            .ingest_batch(entries.into_iter().map(|d| d.record).collect())
            .await;
        if let Err(e) = self.dead_letters.remove(&ids) {
            error!(error = %e, "Failed to rewrite dead-letter file after replay");
        }
        summary
    }

    async fn persist(
        &self,
        record: &ValidatedRecord,
        ap_awarded: i64,
    ) -> Result<CommitOutcome, StoreError> {
        let player = match self.store.find_player_by_wallet(&record.wallet_address).await? {
            Some(player) => player,
            None => {
                self.store
                    .register_player(&record.wallet_address, Utc::now(), &self.catalog.codes())
                    .await?
            }
        };

        let _guard = self.locks.lock(player.id).await;
        self.store
            .commit_event(NewMiningEvent {
                player_id: player.id,
                pool_id: record.pool_id.clone(),
                tx_hash: record.tx_hash.clone(),
                amount_advc: record.amount_advc,
                ap_awarded,
                occurred_at: record.occurred_at,
            })
            .await
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        // factor * 2^n: base, 2*base, 4*base, ... capped at retry_max_ms.
        let factor = (self.settings.retry_base_ms / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_millis(self.settings.retry_max_ms))
            .map(jitter)
            .take(self.settings.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn pipeline() -> (Arc<MemoryStore>, IngestionPipeline, crate::achievements::EvaluationReceiver) {
        let store = Arc::new(MemoryStore::new());
        let (queue, receiver) = EvaluationQueue::channel();
        let catalog = Arc::new(AchievementCatalog::from_defs(Vec::new()).unwrap());
        let pipeline = IngestionPipeline::new(
            store.clone(),
            IngestionSettings::default(),
            catalog,
            Arc::new(PlayerLocks::new()),
            NotificationHub::new(16),
            queue,
            Arc::new(DeadLetterQueue::in_memory(16)),
        );
        (store, pipeline, receiver)
    }

    fn raw(tx: &str, amount: &str) -> RawMiningRecord {
        RawMiningRecord::new("cpu-pool", tx, "advc1qplayer", Decimal::from_str(amount).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn test_commit_then_duplicate() {
        let (store, pipeline, mut receiver) = pipeline();
        let first = pipeline.ingest(raw("0xabc", "3.14")).await.unwrap();
        let IngestOutcome::Committed { event, player } = first else {
            panic!("expected a fresh commit");
        };
        assert_eq!(event.ap_awarded, 31);
        assert_eq!(player.total_ap, 31);
        assert_eq!(receiver.try_recv(), Some(player.id));

        let second = pipeline.ingest(raw("0xabc", "3.14")).await.unwrap();
        assert_eq!(second, IngestOutcome::Duplicate(event));
        assert_eq!(receiver.try_recv(), None);

        let stored = store.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(stored.total_ap, 31);
    }

    #[tokio::test]
    async fn test_malformed_is_reported_and_dropped() {
        let (_store, pipeline, _receiver) = pipeline();
        let err = pipeline.ingest(raw("0xabc", "0")).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord(_)));
        assert!(pipeline.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_batch_summary() {
        let (_store, pipeline, _receiver) = pipeline();
        let summary = pipeline
            .ingest_batch(vec![
                raw("0x1", "1.0"),
                raw("0x2", "12.895"),
                raw("0x1", "1.0"),
                RawMiningRecord::default(),
            ])
            .await;
        assert_eq!(
            summary,
            IngestSummary {
                committed: 2,
                duplicates: 1,
                malformed: 1,
                failed: 0,
                ap_awarded: 10 + 129,
            }
        );
    }
}
