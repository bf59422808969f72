use super::{Store, StoreError, StoreResult, Window};
use crate::settings::Database as DatabaseSettings;
use crate::types::{
    AppliedEvaluation, CommitOutcome, MiningEvent, NewMiningEvent, Period, Player,
    PlayerAchievement, PlayerId, ProgressUpdate, ScoreInput, SnapshotEntry, Unlock,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{info, warn};

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name
pub const SCHEMA: &str = "m2p";

const SNAPSHOT_INSERT_CHUNK: usize = 1000;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connects with capped exponential backoff and bootstraps the schema.
    pub async fn connect(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        let mut last_err: Option<anyhow::Error> = None;
        let max_attempts = settings.connect_attempts.max(1);
        for attempt in 1..=max_attempts {
            match PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(Duration::from_secs(settings.acquire_timeout_seconds))
                .connect(&settings.url)
                .await
            {
                Ok(pool) => {
                    info!(attempt, max_attempts, "Connected to database");
                    match initialize_database(&pool).await {
                        Ok(()) => return Ok(Self::new(pool)),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(e) => last_err = Some(e.into()),
            }
            // 200ms, 400ms, 800ms, ... capped at ~12.8s
            let delay_ms = (1u64 << attempt.min(6)) * 200;
            warn!(
                attempt,
                max_attempts, delay_ms, "DB connect/init attempt failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub async fn initialize_database(pool: &DbPool) -> anyhow::Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x4D32505245574152; // "M2PREWAR"

    let mut tx = pool.begin().await?;

    info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA))
        .execute(&mut *tx)
        .await?;

    for statement in schema_statements() {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!("Database schema ready");
    Ok(())
}

fn schema_statements() -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.players (
                id BIGSERIAL PRIMARY KEY,
                wallet_address TEXT UNIQUE NOT NULL,
                total_ap BIGINT NOT NULL DEFAULT 0,
                total_mined_advc NUMERIC(38, 12) NOT NULL DEFAULT 0,
                verified BOOLEAN NOT NULL DEFAULT FALSE,
                registered_at TIMESTAMPTZ NOT NULL,
                last_active_at TIMESTAMPTZ
            )",
            s = SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.mining_events (
                id BIGSERIAL PRIMARY KEY,
                player_id BIGINT NOT NULL REFERENCES {s}.players(id),
                pool_id TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                amount_advc NUMERIC(38, 12) NOT NULL CHECK (amount_advc > 0),
                ap_awarded BIGINT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (pool_id, tx_hash)
            )",
            s = SCHEMA
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_mining_events_player ON {s}.mining_events (player_id, occurred_at)",
            s = SCHEMA
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_mining_events_occurred ON {s}.mining_events (occurred_at)",
            s = SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.player_achievements (
                player_id BIGINT NOT NULL REFERENCES {s}.players(id),
                achievement_code TEXT NOT NULL,
                unlocked_at TIMESTAMPTZ,
                progress_current NUMERIC(38, 12) NOT NULL DEFAULT 0,
                progress_target NUMERIC(38, 12) NOT NULL DEFAULT 0,
                PRIMARY KEY (player_id, achievement_code)
            )",
            s = SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.leaderboard_snapshots (
                period TEXT NOT NULL,
                rank INTEGER NOT NULL,
                player_id BIGINT NOT NULL,
                wallet_address TEXT NOT NULL,
                previous_rank INTEGER,
                period_score NUMERIC(38, 12) NOT NULL,
                verified BOOLEAN NOT NULL DEFAULT FALSE,
                captured_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (period, rank),
                UNIQUE (period, wallet_address)
            )",
            s = SCHEMA
        ),
        // Snapshot tables created before the verified column existed.
        format!(
            "ALTER TABLE {s}.leaderboard_snapshots ADD COLUMN IF NOT EXISTS verified BOOLEAN NOT NULL DEFAULT FALSE",
            s = SCHEMA
        ),
    ]
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(e.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, admin shutdown, connection failures
            Some("40001") | Some("40P01") | Some("57P01") => StoreError::Transient(e.to_string()),
            Some(code) if code.starts_with("08") => StoreError::Transient(e.to_string()),
            Some("23505") => StoreError::Conflict(e.to_string()),
            _ => StoreError::Fatal(e.to_string()),
        },
        _ => StoreError::Fatal(e.to_string()),
    }
}

fn to_u32(value: i32) -> u32 {
    value.max(0) as u32
}

fn row_to_player(row: &PgRow) -> Result<Player, sqlx::Error> {
    Ok(Player {
        id: row.try_get("id")?,
        wallet_address: row.try_get("wallet_address")?,
        total_ap: row.try_get("total_ap")?,
        total_mined_advc: row.try_get("total_mined_advc")?,
        verified: row.try_get("verified")?,
        registered_at: row.try_get("registered_at")?,
        last_active_at: row.try_get("last_active_at")?,
    })
}

fn row_to_event(row: &PgRow) -> Result<MiningEvent, sqlx::Error> {
    Ok(MiningEvent {
        id: row.try_get("id")?,
        player_id: row.try_get("player_id")?,
        pool_id: row.try_get("pool_id")?,
        tx_hash: row.try_get("tx_hash")?,
        amount_advc: row.try_get("amount_advc")?,
        ap_awarded: row.try_get("ap_awarded")?,
        occurred_at: row.try_get("occurred_at")?,
    })
}

fn row_to_achievement(row: &PgRow) -> Result<PlayerAchievement, sqlx::Error> {
    Ok(PlayerAchievement {
        player_id: row.try_get("player_id")?,
        achievement_code: row.try_get("achievement_code")?,
        unlocked_at: row.try_get("unlocked_at")?,
        progress_current: row.try_get("progress_current")?,
        progress_target: row.try_get("progress_target")?,
    })
}

fn row_to_snapshot(period: Period, row: &PgRow) -> Result<SnapshotEntry, sqlx::Error> {
    let previous: Option<i32> = row.try_get("previous_rank")?;
    Ok(SnapshotEntry {
        period,
        player_id: row.try_get("player_id")?,
        wallet_address: row.try_get("wallet_address")?,
        rank: to_u32(row.try_get("rank")?),
        previous_rank: previous.map(to_u32),
        period_score: row.try_get("period_score")?,
        verified: row.try_get("verified")?,
        captured_at: row.try_get("captured_at")?,
    })
}

const PLAYER_COLUMNS: &str =
    "id, wallet_address, total_ap, total_mined_advc, verified, registered_at, last_active_at";
const EVENT_COLUMNS: &str = "id, player_id, pool_id, tx_hash, amount_advc, ap_awarded, occurred_at";
const SNAPSHOT_COLUMNS: &str =
    "player_id, wallet_address, rank, previous_rank, period_score, verified, captured_at";

impl PgStore {
    async fn ensure_achievement_rows<'c, E>(
        executor: E,
        player_id: PlayerId,
        codes: &[String],
    ) -> StoreResult<()>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        if codes.is_empty() {
            return Ok(());
        }
        sqlx::query(&format!(
            "INSERT INTO {}.player_achievements (player_id, achievement_code)
             SELECT $1, code FROM UNNEST($2::TEXT[]) AS code
             ON CONFLICT (player_id, achievement_code) DO NOTHING",
            SCHEMA
        ))
        .bind(player_id)
        .bind(codes.to_vec())
        .execute(executor)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn register_player(
        &self,
        wallet_address: &str,
        registered_at: DateTime<Utc>,
        achievement_codes: &[String],
    ) -> StoreResult<Player> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(&format!(
            "INSERT INTO {}.players (wallet_address, registered_at) VALUES ($1, $2)
             ON CONFLICT (wallet_address) DO NOTHING",
            SCHEMA
        ))
        .bind(wallet_address)
        .bind(registered_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.players WHERE wallet_address = $1",
            PLAYER_COLUMNS, SCHEMA
        ))
        .bind(wallet_address)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let player = row_to_player(&row).map_err(map_sqlx)?;

        Self::ensure_achievement_rows(&mut *tx, player.id, achievement_codes).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(player)
    }

    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.players WHERE id = $1",
            PLAYER_COLUMNS, SCHEMA
        ))
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_player).transpose().map_err(map_sqlx)
    }

    async fn find_player_by_wallet(&self, wallet_address: &str) -> StoreResult<Option<Player>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.players WHERE wallet_address = $1",
            PLAYER_COLUMNS, SCHEMA
        ))
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_player).transpose().map_err(map_sqlx)
    }

    async fn set_verified(&self, player_id: PlayerId, verified: bool) -> StoreResult<Player> {
        let row = sqlx::query(&format!(
            "UPDATE {}.players SET verified = $2 WHERE id = $1 RETURNING {}",
            SCHEMA, PLAYER_COLUMNS
        ))
        .bind(player_id)
        .bind(verified)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("player {}", player_id)))?;
        row_to_player(&row).map_err(map_sqlx)
    }

    async fn list_wallets(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT wallet_address FROM {}.players ORDER BY wallet_address",
            SCHEMA
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("wallet_address"))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn list_player_ids(&self) -> StoreResult<Vec<PlayerId>> {
        let rows = sqlx::query(&format!("SELECT id FROM {}.players ORDER BY id", SCHEMA))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter()
            .map(|r| r.try_get::<PlayerId, _>("id"))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn find_event(&self, pool_id: &str, tx_hash: &str) -> StoreResult<Option<MiningEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.mining_events WHERE pool_id = $1 AND tx_hash = $2",
            EVENT_COLUMNS, SCHEMA
        ))
        .bind(pool_id)
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_event).transpose().map_err(map_sqlx)
    }

    async fn commit_event(&self, event: NewMiningEvent) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // Row lock serializes concurrent increments for the same player.
        let locked = sqlx::query(&format!("SELECT id FROM {}.players WHERE id = $1 FOR UPDATE", SCHEMA))
            .bind(event.player_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("player {}", event.player_id)));
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO {}.mining_events (player_id, pool_id, tx_hash, amount_advc, ap_awarded, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (pool_id, tx_hash) DO NOTHING
             RETURNING {}",
            SCHEMA, EVENT_COLUMNS
        ))
        .bind(event.player_id)
        .bind(&event.pool_id)
        .bind(&event.tx_hash)
        .bind(event.amount_advc)
        .bind(event.ap_awarded)
        .bind(event.occurred_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = inserted else {
            tx.rollback().await.map_err(map_sqlx)?;
            let existing = self
                .find_event(&event.pool_id, &event.tx_hash)
                .await?
                .ok_or_else(|| StoreError::Transient("duplicate event vanished".to_string()))?;
            return Ok(CommitOutcome::Duplicate(existing));
        };
        let committed = row_to_event(&row).map_err(map_sqlx)?;

        let row = sqlx::query(&format!(
            "UPDATE {}.players
             SET total_ap = total_ap + $2,
                 total_mined_advc = total_mined_advc + $3,
                 last_active_at = GREATEST(COALESCE(last_active_at, $4), $4)
             WHERE id = $1
             RETURNING {}",
            SCHEMA, PLAYER_COLUMNS
        ))
        .bind(committed.player_id)
        .bind(committed.ap_awarded)
        .bind(committed.amount_advc)
        .bind(committed.occurred_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let player = row_to_player(&row).map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(CommitOutcome::Inserted {
            event: committed,
            player,
        })
    }

    async fn player_events(&self, player_id: PlayerId) -> StoreResult<Vec<MiningEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.mining_events WHERE player_id = $1 ORDER BY occurred_at, id",
            EVENT_COLUMNS, SCHEMA
        ))
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(row_to_event)
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn player_achievements(
        &self,
        player_id: PlayerId,
        achievement_codes: &[String],
    ) -> StoreResult<Vec<PlayerAchievement>> {
        Self::ensure_achievement_rows(&self.pool, player_id, achievement_codes).await?;
        let rows = sqlx::query(&format!(
            "SELECT player_id, achievement_code, unlocked_at, progress_current, progress_target
             FROM {}.player_achievements WHERE player_id = $1 ORDER BY achievement_code",
            SCHEMA
        ))
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(row_to_achievement)
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn apply_evaluation(
        &self,
        player_id: PlayerId,
        progress: &[ProgressUpdate],
        unlocks: &[Unlock],
    ) -> StoreResult<AppliedEvaluation> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let locked = sqlx::query(&format!("SELECT id FROM {}.players WHERE id = $1 FOR UPDATE", SCHEMA))
            .bind(player_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("player {}", player_id)));
        }

        for update in progress {
            sqlx::query(&format!(
                "INSERT INTO {}.player_achievements (player_id, achievement_code, progress_current, progress_target)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (player_id, achievement_code) DO UPDATE
                 SET progress_current = EXCLUDED.progress_current,
                     progress_target = EXCLUDED.progress_target
                 WHERE {}.player_achievements.unlocked_at IS NULL",
                SCHEMA, SCHEMA
            ))
            .bind(player_id)
            .bind(&update.achievement_code)
            .bind(update.current)
            .bind(update.target)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        let mut unlocked = Vec::new();
        let mut ap_credited = 0i64;
        for unlock in unlocks {
            let result = sqlx::query(&format!(
                "INSERT INTO {}.player_achievements (player_id, achievement_code, unlocked_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (player_id, achievement_code) DO UPDATE
                 SET unlocked_at = EXCLUDED.unlocked_at
                 WHERE {}.player_achievements.unlocked_at IS NULL",
                SCHEMA, SCHEMA
            ))
            .bind(player_id)
            .bind(&unlock.achievement_code)
            .bind(unlock.unlocked_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 1 {
                unlocked.push(unlock.achievement_code.clone());
                ap_credited += unlock.ap_reward;
            }
        }

        let row = sqlx::query(&format!(
            "UPDATE {}.players SET total_ap = total_ap + $2 WHERE id = $1 RETURNING {}",
            SCHEMA, PLAYER_COLUMNS
        ))
        .bind(player_id)
        .bind(ap_credited)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let player = row_to_player(&row).map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(AppliedEvaluation {
            unlocked,
            ap_credited,
            player,
        })
    }

    async fn score_inputs(&self, window: Option<Window>) -> StoreResult<Vec<ScoreInput>> {
        let (start, end) = match window {
            Some((s, e)) => (Some(s), Some(e)),
            None => (None, None),
        };
        let rows = sqlx::query(&format!(
            "SELECT p.id, p.wallet_address, p.total_ap, p.total_mined_advc, p.verified,
                    COALESCE(e.days_active, 0)::BIGINT AS days_active,
                    COALESCE(e.window_ap, 0)::BIGINT AS window_ap
             FROM {s}.players p
             LEFT JOIN (
                 SELECT player_id,
                        COUNT(DISTINCT (occurred_at AT TIME ZONE 'UTC')::DATE) AS days_active,
                        SUM(CASE WHEN $1::TIMESTAMPTZ IS NOT NULL
                                      AND occurred_at >= $1::TIMESTAMPTZ
                                      AND occurred_at < $2::TIMESTAMPTZ
                                 THEN ap_awarded ELSE 0 END) AS window_ap
                 FROM {s}.mining_events
                 GROUP BY player_id
             ) e ON e.player_id = p.id",
            s = SCHEMA
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                let days: i64 = row.try_get("days_active")?;
                Ok(ScoreInput {
                    player_id: row.try_get("id")?,
                    wallet_address: row.try_get("wallet_address")?,
                    total_ap: row.try_get("total_ap")?,
                    total_mined_advc: row.try_get::<Decimal, _>("total_mined_advc")?,
                    days_active: days.max(0) as u32,
                    window_ap: row.try_get("window_ap")?,
                    verified: row.try_get("verified")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(map_sqlx)
    }

    async fn snapshot(&self, period: Period) -> StoreResult<Vec<SnapshotEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.leaderboard_snapshots WHERE period = $1 ORDER BY rank",
            SNAPSHOT_COLUMNS, SCHEMA
        ))
        .bind(period.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|r| row_to_snapshot(period, r))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn replace_snapshot(&self, period: Period, entries: Vec<SnapshotEntry>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(&format!(
            "DELETE FROM {}.leaderboard_snapshots WHERE period = $1",
            SCHEMA
        ))
        .bind(period.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        for chunk in entries.chunks(SNAPSHOT_INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {}.leaderboard_snapshots
                 (period, rank, player_id, wallet_address, previous_rank, period_score, verified, captured_at) ",
                SCHEMA
            ));
            qb.push_values(chunk, |mut b, entry| {
                b.push_bind(period.as_str())
                    .push_bind(entry.rank as i32)
                    .push_bind(entry.player_id)
                    .push_bind(entry.wallet_address.clone())
                    .push_bind(entry.previous_rank.map(|r| r as i32))
                    .push_bind(entry.period_score)
                    .push_bind(entry.verified)
                    .push_bind(entry.captured_at);
            });
            qb.build().execute(&mut *tx).await.map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn snapshot_entry(
        &self,
        period: Period,
        wallet_address: &str,
    ) -> StoreResult<Option<SnapshotEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.leaderboard_snapshots WHERE period = $1 AND wallet_address = $2",
            SNAPSHOT_COLUMNS, SCHEMA
        ))
        .bind(period.as_str())
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref()
            .map(|r| row_to_snapshot(period, r))
            .transpose()
            .map_err(map_sqlx)
    }

    async fn snapshot_page(
        &self,
        period: Period,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SnapshotEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.leaderboard_snapshots WHERE period = $1 ORDER BY rank LIMIT $2 OFFSET $3",
            SNAPSHOT_COLUMNS, SCHEMA
        ))
        .bind(period.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|r| row_to_snapshot(period, r))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn snapshot_rank_range(
        &self,
        period: Period,
        from_rank: u32,
        to_rank: u32,
    ) -> StoreResult<Vec<SnapshotEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.leaderboard_snapshots
             WHERE period = $1 AND rank BETWEEN $2 AND $3 ORDER BY rank",
            SNAPSHOT_COLUMNS, SCHEMA
        ))
        .bind(period.as_str())
        .bind(from_rank as i32)
        .bind(to_rank.min(i32::MAX as u32) as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|r| row_to_snapshot(period, r))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_are_schema_qualified() {
        for statement in schema_statements() {
            assert!(statement.contains(&format!("{}.", SCHEMA)), "{}", statement);
        }
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(map_sqlx(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!map_sqlx(sqlx::Error::RowNotFound).is_transient());
    }
}
