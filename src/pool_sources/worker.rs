use super::{PoolSource, PoolSourceError};
use crate::ingestion::{IngestSummary, IngestionPipeline};
use crate::metrics;
use crate::settings::PoolSourceConfig;
use crate::store::Store;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Upper bound of the random delay before a worker's first poll.
const STARTUP_STAGGER_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    Healthy,
    /// Too many consecutive failures; polled at twice the normal interval.
    Degraded,
}

/// Polls one pool source and hands its records to the ingestion pipeline.
pub struct PoolSourceWorker {
    source: Arc<dyn PoolSource>,
    config: PoolSourceConfig,
    store: Arc<dyn Store>,
    pipeline: Arc<IngestionPipeline>,
    consecutive_failures: u32,
    health: SourceHealth,
}

impl PoolSourceWorker {
    pub fn new(
        source: Arc<dyn PoolSource>,
        config: PoolSourceConfig,
        store: Arc<dyn Store>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        Self {
            source,
            config,
            store,
            pipeline,
            consecutive_failures: 0,
            health: SourceHealth::Healthy,
        }
    }

    pub fn health(&self) -> SourceHealth {
        self.health
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One poll: fetch, then ingest. Request deadlines belong to the source
    /// and apply per request, so a partial fetch still counts as a success.
    pub async fn poll_once(&mut self) -> Result<IngestSummary, PoolSourceError> {
        let wallets = match self.store.list_wallets().await {
            Ok(wallets) => wallets,
            Err(e) => {
                // Store trouble is not the pool's fault; do not count it.
                error!(pool = %self.config.pool_id, error = %e, "Could not list wallets");
                return Ok(IngestSummary::default());
            }
        };

        match self.source.fetch(&wallets).await {
            Ok(records) => {
                self.record_success();
                Ok(self.pipeline.ingest_batch(records).await)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_success(&mut self) {
        if self.health == SourceHealth::Degraded {
            info!(
                "✅ [PoolSource] {} recovered after {} failures",
                self.config.pool_id, self.consecutive_failures
            );
            metrics::set_pool_source_degraded(&self.config.pool_id, false);
        }
        self.consecutive_failures = 0;
        self.health = SourceHealth::Healthy;
    }

    fn record_failure(&mut self, e: &PoolSourceError) {
        self.consecutive_failures += 1;
        metrics::increment_pool_fetch_failures(&self.config.pool_id);
        warn!(
            "⚠️ [PoolSource] {} fetch failed ({} consecutive): {}",
            self.config.pool_id, self.consecutive_failures, e
        );
        if self.health == SourceHealth::Healthy
            && self.consecutive_failures >= self.config.max_consecutive_failures
        {
            self.health = SourceHealth::Degraded;
            metrics::set_pool_source_degraded(&self.config.pool_id, true);
            error!(
                "🚨 [PoolSource] {} marked degraded after {} consecutive failures",
                self.config.pool_id, self.consecutive_failures
            );
        }
    }

    /// Wait before the next poll.
    pub fn next_delay(&self) -> Duration {
        next_delay(&self.config, self.consecutive_failures, self.health)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "🚀 [PoolSource] Polling {} every {}s",
            self.config.pool_id, self.config.poll_interval_seconds
        );
        let stagger = Duration::from_millis(rand::thread_rng().gen_range(0..=STARTUP_STAGGER_MS));
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(stagger) => {}
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Ok(summary) = self.poll_once().await {
                if summary.failed > 0 {
                    warn!(
                        pool = %self.config.pool_id,
                        failed = summary.failed,
                        "Some records were dead-lettered"
                    );
                }
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.next_delay()) => {}
            }
        }
        info!("🛑 [PoolSource] {} stopped", self.config.pool_id);
    }
}

/// Poll interval (doubled while degraded) plus a capped exponential backoff
/// for each consecutive failure.
pub fn next_delay(config: &PoolSourceConfig, consecutive_failures: u32, health: SourceHealth) -> Duration {
    let mut interval = Duration::from_secs(config.poll_interval_seconds);
    if health == SourceHealth::Degraded {
        interval *= 2;
    }
    if consecutive_failures == 0 {
        return interval;
    }
    let exp = (consecutive_failures - 1).min(20);
    let backoff_ms = config
        .backoff_base_ms
        .saturating_mul(1u64 << exp)
        .min(config.backoff_max_ms);
    interval + Duration::from_millis(backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::{AchievementCatalog, EvaluationQueue};
    use crate::pool_sources::http::test_server;
    use crate::pool_sources::JsonPaymentsSource;
    use crate::dead_letter::DeadLetterQueue;
    use crate::notifications::NotificationHub;
    use crate::player_locks::PlayerLocks;
    use crate::settings::Ingestion;
    use crate::store::MemoryStore;
    use crate::types::RawMiningRecord;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedSource {
        fail: AtomicBool,
    }

    #[async_trait]
    impl PoolSource for ScriptedSource {
        fn pool_id(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, wallets: &[String]) -> Result<Vec<RawMiningRecord>, PoolSourceError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(PoolSourceError::Status(503));
            }
            Ok(wallets
                .iter()
                .map(|w| RawMiningRecord::new("scripted", format!("tx-{}", w), w, Decimal::ONE, Utc::now()))
                .collect())
        }
    }

    fn config() -> PoolSourceConfig {
        let mut config = PoolSourceConfig::new("scripted", "http://localhost/{wallet}");
        config.max_consecutive_failures = 2;
        config
    }

    fn pipeline(store: Arc<MemoryStore>) -> Arc<IngestionPipeline> {
        let (queue, _receiver) = EvaluationQueue::channel();
        Arc::new(IngestionPipeline::new(
            store,
            Ingestion::default(),
            Arc::new(AchievementCatalog::from_defs(Vec::new()).unwrap()),
            Arc::new(PlayerLocks::new()),
            NotificationHub::new(4),
            queue,
            Arc::new(DeadLetterQueue::in_memory(4)),
        ))
    }

    async fn worker(source: Arc<ScriptedSource>) -> PoolSourceWorker {
        let store = Arc::new(MemoryStore::new());
        store.register_player("w1", Utc::now(), &[]).await.unwrap();
        PoolSourceWorker::new(source, config(), store.clone(), pipeline(store))
    }

    #[test]
    fn test_backoff_is_capped_and_degraded_doubles() {
        let mut config = config();
        config.poll_interval_seconds = 60;
        config.backoff_base_ms = 500;
        config.backoff_max_ms = 30_000;
        assert_eq!(next_delay(&config, 0, SourceHealth::Healthy), Duration::from_secs(60));
        assert_eq!(
            next_delay(&config, 1, SourceHealth::Healthy),
            Duration::from_millis(60_500)
        );
        assert_eq!(
            next_delay(&config, 3, SourceHealth::Healthy),
            Duration::from_millis(62_000)
        );
        assert_eq!(
            next_delay(&config, 40, SourceHealth::Degraded),
            Duration::from_millis(150_000)
        );
    }

    #[tokio::test]
    async fn test_degrades_and_recovers() {
        let source = Arc::new(ScriptedSource {
            fail: AtomicBool::new(true),
        });
        let mut worker = worker(source.clone()).await;

        assert!(worker.poll_once().await.is_err());
        assert_eq!(worker.health(), SourceHealth::Healthy);
        assert!(worker.poll_once().await.is_err());
        assert_eq!(worker.health(), SourceHealth::Degraded);

        source.fail.store(false, Ordering::Relaxed);
        let summary = worker.poll_once().await.unwrap();
        assert_eq!(summary.committed, 1);
        assert_eq!(worker.health(), SourceHealth::Healthy);
        assert_eq!(worker.consecutive_failures(), 0);

        // Same payout reported again is a duplicate.
        let summary = worker.poll_once().await.unwrap();
        assert_eq!(summary.duplicates, 1);
    }

    #[tokio::test]
    async fn test_slow_wallet_does_not_fail_the_poll() {
        let addr = test_server::spawn(Duration::from_secs(5)).await;
        let source = Arc::new(
            JsonPaymentsSource::new(
                "cpu-pool",
                format!("http://{}/{{wallet}}", addr),
                Duration::from_millis(300),
            )
            .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        store.register_player("fast", Utc::now(), &[]).await.unwrap();
        store.register_player("slow", Utc::now(), &[]).await.unwrap();
        let mut worker = PoolSourceWorker::new(source, config(), store.clone(), pipeline(store.clone()));

        let summary = worker.poll_once().await.unwrap();
        assert_eq!(summary.committed, 1);
        assert_eq!(worker.consecutive_failures(), 0);
        assert_eq!(worker.health(), SourceHealth::Healthy);

        let fast = store.find_player_by_wallet("fast").await.unwrap().unwrap();
        assert_eq!(fast.total_ap, 15);
        let slow = store.find_player_by_wallet("slow").await.unwrap().unwrap();
        assert_eq!(slow.total_ap, 0);
    }
}
