// Wiring of the rewards core: one store, one catalog, one hub, and the
// background tasks that keep ingestion, achievements and leaderboards moving.

use crate::achievements::{
    run_evaluation_worker, AchievementCatalog, AchievementEngine, EvaluationQueue,
    EvaluationReceiver,
};
use crate::dead_letter::DeadLetterQueue;
use crate::ingestion::IngestionPipeline;
use crate::leaderboard::{run_ranker_scheduler, LeaderboardQueries, LeaderboardRanker};
use crate::notifications::NotificationHub;
use crate::player_locks::PlayerLocks;
use crate::players::PlayerService;
use crate::pool_sources::{JsonPaymentsSource, PoolSource, PoolSourceWorker};
use crate::settings::{PoolSourceConfig, Settings, StoreBackend};
use crate::store::{MemoryStore, PgStore, Store};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Opens the configured store backend.
pub async fn open_store(settings: &Settings) -> Result<Arc<dyn Store>> {
    match settings.database.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgStore::connect(&settings.database)
                .await
                .context("connecting to PostgreSQL")?;
            Ok(Arc::new(store))
        }
    }
}

/// HTTP JSON sources for every enabled pool in the settings.
pub fn sources_from_settings(
    settings: &Settings,
) -> Result<Vec<(Arc<dyn PoolSource>, PoolSourceConfig)>> {
    settings
        .pools
        .iter()
        .filter(|pool| pool.enabled)
        .map(|pool| {
            let source = JsonPaymentsSource::new(
                pool.pool_id.clone(),
                pool.url.clone(),
                Duration::from_secs(pool.request_timeout_seconds),
            )
            .with_context(|| format!("building HTTP client for pool {}", pool.pool_id))?
            .with_max_concurrent_requests(pool.max_concurrent_requests);
            Ok((Arc::new(source) as Arc<dyn PoolSource>, pool.clone()))
        })
        .collect()
}

pub struct RewardsService {
    settings: Settings,
    store: Arc<dyn Store>,
    catalog: Arc<AchievementCatalog>,
    hub: NotificationHub,
    evaluations: EvaluationQueue,
    receiver: Option<EvaluationReceiver>,
    ingestion: Arc<IngestionPipeline>,
    engine: Arc<AchievementEngine>,
    ranker: Arc<LeaderboardRanker>,
    queries: LeaderboardQueries,
    players: PlayerService,
}

impl RewardsService {
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        catalog: Arc<AchievementCatalog>,
    ) -> Result<Self> {
        let dead_letters = Arc::new(match &settings.ingestion.dead_letter_path {
            Some(path) => DeadLetterQueue::open(settings.ingestion.dead_letter_capacity, path)
                .with_context(|| format!("opening dead-letter file {}", path))?,
            None => DeadLetterQueue::in_memory(settings.ingestion.dead_letter_capacity),
        });
        let hub = NotificationHub::new(settings.notifications.subscriber_capacity);
        let locks = Arc::new(PlayerLocks::new());
        let (evaluations, receiver) = EvaluationQueue::channel();

        let ingestion = Arc::new(IngestionPipeline::new(
            store.clone(),
            settings.ingestion.clone(),
            catalog.clone(),
            locks.clone(),
            hub.clone(),
            evaluations.clone(),
            dead_letters,
        ));
        let engine = Arc::new(AchievementEngine::new(
            store.clone(),
            catalog.clone(),
            locks,
            hub.clone(),
            settings.achievements.local_utc_offset_minutes,
        ));
        let ranker = Arc::new(LeaderboardRanker::new(
            store.clone(),
            hub.clone(),
            evaluations.clone(),
            &catalog,
            settings.leaderboard.clone(),
        ));
        let queries = LeaderboardQueries::new(store.clone());
        let players = PlayerService::new(store.clone(), catalog.clone(), evaluations.clone());

        Ok(Self {
            settings,
            store,
            catalog,
            hub,
            evaluations,
            receiver: Some(receiver),
            ingestion,
            engine,
            ranker,
            queries,
            players,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<AchievementCatalog> {
        &self.catalog
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn evaluations(&self) -> &EvaluationQueue {
        &self.evaluations
    }

    pub fn ingestion(&self) -> &Arc<IngestionPipeline> {
        &self.ingestion
    }

    pub fn engine(&self) -> &Arc<AchievementEngine> {
        &self.engine
    }

    pub fn ranker(&self) -> &Arc<LeaderboardRanker> {
        &self.ranker
    }

    pub fn queries(&self) -> &LeaderboardQueries {
        &self.queries
    }

    pub fn players(&self) -> &PlayerService {
        &self.players
    }

    /// Takes the evaluation receiver for callers that drive evaluations
    /// themselves instead of calling [`RewardsService::start`].
    pub fn take_evaluation_receiver(&mut self) -> Option<EvaluationReceiver> {
        self.receiver.take()
    }

    /// Spawns the evaluation worker, one ranker loop per period and one
    /// poller per source.
    pub fn start(&mut self, sources: Vec<(Arc<dyn PoolSource>, PoolSourceConfig)>) -> ServiceHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if let Some(receiver) = self.receiver.take() {
            tasks.push(tokio::spawn(run_evaluation_worker(
                self.engine.clone(),
                receiver,
                self.settings.achievements.max_concurrent_evaluations,
                shutdown_rx.clone(),
            )));
        }

        if self.settings.achievements.sweep_on_start {
            let store = self.store.clone();
            let evaluations = self.evaluations.clone();
            tasks.push(tokio::spawn(async move {
                match evaluations.enqueue_all(store.as_ref()).await {
                    Ok(queued) => info!("🔎 [Service] Queued {} players for re-evaluation", queued),
                    Err(e) => error!("❌ [Service] Startup re-evaluation sweep failed: {}", e),
                }
            }));
        }

        tasks.extend(run_ranker_scheduler(
            self.ranker.clone(),
            self.settings.leaderboard.intervals.clone(),
            shutdown_rx.clone(),
        ));

        for (source, config) in sources {
            let worker = PoolSourceWorker::new(
                source,
                config,
                self.store.clone(),
                self.ingestion.clone(),
            );
            tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        info!(
            "🚀 [Service] Started {} background tasks ({} achievements loaded)",
            tasks.len(),
            self.catalog.len()
        );
        ServiceHandle { shutdown_tx, tasks }
    }
}

pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Signals every background task and waits for them to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("🛑 [Service] All background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut settings = Settings::default();
        settings.database.backend = StoreBackend::Memory;
        let catalog = Arc::new(AchievementCatalog::from_defs(Vec::new()).unwrap());
        let store = open_store(&settings).await.unwrap();
        let mut service = RewardsService::new(settings, store, catalog).unwrap();

        let handle = service.start(Vec::new());
        assert!(service.take_evaluation_receiver().is_none());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_sweeps_idle_players() {
        let mut settings = Settings::default();
        settings.database.backend = StoreBackend::Memory;
        let catalog = Arc::new(
            AchievementCatalog::from_json(
                r#"[{"code": "first_steps", "name": "First Steps", "tier": "bronze",
                     "ap_reward": 10, "criterion": {"type": "registration"}}]"#,
            )
            .unwrap(),
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        // Registered before this catalog existed and never active since.
        let idle = store.register_player("idle", chrono::Utc::now(), &[]).await.unwrap();
        let mut service = RewardsService::new(settings, store.clone(), catalog).unwrap();

        let handle = service.start(Vec::new());
        let credited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let player = store.get_player(idle.id).await.unwrap().unwrap();
                if player.total_ap > 0 {
                    return player.total_ap;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(credited, 10);
        handle.shutdown().await;
    }
}
