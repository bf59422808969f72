// Player operations outside the mining path: registration, verification and
// the achievement progress view.

use crate::achievements::{AchievementCatalog, EvaluationQueue};
use crate::store::{Store, StoreError};
use crate::types::{Player, PlayerId, Tier};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// One catalog entry joined with the player's row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementProgress {
    pub code: String,
    pub name: String,
    pub description: String,
    pub tier: Tier,
    pub category: String,
    pub ap_reward: i64,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub progress_current: Decimal,
    pub progress_target: Decimal,
}

pub struct PlayerService {
    store: Arc<dyn Store>,
    catalog: Arc<AchievementCatalog>,
    evaluations: EvaluationQueue,
}

impl PlayerService {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<AchievementCatalog>,
        evaluations: EvaluationQueue,
    ) -> Self {
        Self {
            store,
            catalog,
            evaluations,
        }
    }

    /// Idempotent. Queues an evaluation so registration achievements unlock.
    pub async fn register(&self, wallet_address: &str) -> Result<Player, StoreError> {
        let wallet = wallet_address.trim();
        if wallet.is_empty() {
            return Err(StoreError::Conflict("wallet address must not be empty".to_string()));
        }
        let player = self
            .store
            .register_player(wallet, Utc::now(), &self.catalog.codes())
            .await?;
        info!("👤 [Players] Registered player {} ({})", player.id, player.wallet_address);
        self.evaluations.enqueue(player.id);
        Ok(player)
    }

    pub async fn set_verified(&self, player_id: PlayerId, verified: bool) -> Result<Player, StoreError> {
        let player = self.store.set_verified(player_id, verified).await?;
        info!(player_id, verified, "Verification status changed");
        self.evaluations.enqueue(player_id);
        Ok(player)
    }

    /// Progress for every catalog entry, in catalog order.
    pub async fn progress(&self, player_id: PlayerId) -> Result<Vec<AchievementProgress>, StoreError> {
        if self.store.get_player(player_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("player {}", player_id)));
        }
        let rows = self
            .store
            .player_achievements(player_id, &self.catalog.codes())
            .await?;
        Ok(self
            .catalog
            .iter()
            .map(|def| {
                let row = rows.iter().find(|r| r.achievement_code == def.code);
                AchievementProgress {
                    code: def.code.clone(),
                    name: def.name.clone(),
                    description: def.description.clone(),
                    tier: def.tier,
                    category: def.category.clone(),
                    ap_reward: def.ap_reward,
                    unlocked_at: row.and_then(|r| r.unlocked_at),
                    progress_current: row.map(|r| r.progress_current).unwrap_or_default(),
                    progress_target: row.map(|r| r.progress_target).unwrap_or_default(),
                }
            })
            .collect())
    }
}
