//! Integration tests for the PostgreSQL store
//!
//! These need a reachable database:
//! M2P_DATABASE_URL=postgresql://... cargo test --test postgres_store -- --ignored

use chrono::Utc;
use m2p_core::settings::Database;
use m2p_core::store::PgStore;
use m2p_core::types::{CommitOutcome, NewMiningEvent, Period, SnapshotEntry, Unlock};
use m2p_core::Store;
use rust_decimal::Decimal;
use uuid::Uuid;

async fn connect() -> PgStore {
    let mut settings = Database::default();
    if let Ok(url) = std::env::var("M2P_DATABASE_URL") {
        settings.url = url;
    }
    settings.connect_attempts = 1;
    PgStore::connect(&settings).await.expect("Failed to connect to database")
}

fn unique_wallet() -> String {
    format!("advc1q{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_commit_event_dedups_and_credits_once() {
    let store = connect().await;
    let wallet = unique_wallet();
    let player = store
        .register_player(&wallet, Utc::now(), &["first_blood".to_string()])
        .await
        .unwrap();

    let event = NewMiningEvent {
        player_id: player.id,
        pool_id: "cpu-pool".to_string(),
        tx_hash: format!("0x{}", Uuid::new_v4().simple()),
        amount_advc: Decimal::new(314, 2),
        ap_awarded: 31,
        occurred_at: Utc::now(),
    };
    let first = store.commit_event(event.clone()).await.unwrap();
    assert!(matches!(first, CommitOutcome::Inserted { .. }));
    let second = store.commit_event(event).await.unwrap();
    assert!(matches!(second, CommitOutcome::Duplicate(_)));

    let stored = store.get_player(player.id).await.unwrap().unwrap();
    assert_eq!(stored.total_ap, 31);
    assert_eq!(stored.total_mined_advc, Decimal::new(314, 2));
    assert_eq!(store.player_events(player.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_unlock_credits_only_once() {
    let store = connect().await;
    let codes = vec!["first_blood".to_string()];
    let player = store
        .register_player(&unique_wallet(), Utc::now(), &codes)
        .await
        .unwrap();

    let unlock = Unlock {
        achievement_code: "first_blood".to_string(),
        ap_reward: 25,
        unlocked_at: Utc::now(),
    };
    let applied = store
        .apply_evaluation(player.id, &[], &[unlock.clone()])
        .await
        .unwrap();
    assert_eq!(applied.ap_credited, 25);
    let again = store.apply_evaluation(player.id, &[], &[unlock]).await.unwrap();
    assert_eq!(again.ap_credited, 0);
    assert!(again.unlocked.is_empty());
    assert_eq!(again.player.total_ap, 25);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_replace_snapshot_swaps_whole_period() {
    let store = connect().await;
    let a = store.register_player(&unique_wallet(), Utc::now(), &[]).await.unwrap();
    let b = store.register_player(&unique_wallet(), Utc::now(), &[]).await.unwrap();
    let entry = |player: &m2p_core::types::Player, rank: u32| SnapshotEntry {
        period: Period::Efficiency,
        player_id: player.id,
        wallet_address: player.wallet_address.clone(),
        rank,
        previous_rank: None,
        period_score: Decimal::from(10 - rank as i64),
        verified: rank == 1,
        captured_at: Utc::now(),
    };

    store
        .replace_snapshot(Period::Efficiency, vec![entry(&a, 1), entry(&b, 2)])
        .await
        .unwrap();
    store
        .replace_snapshot(Period::Efficiency, vec![entry(&b, 1)])
        .await
        .unwrap();

    let snapshot = store.snapshot(Period::Efficiency).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].wallet_address, b.wallet_address);
    assert!(snapshot[0].verified);
    assert!(store
        .snapshot_entry(Period::Efficiency, &a.wallet_address)
        .await
        .unwrap()
        .is_none());
}
