//! # M2P Rewards Daemon
//!
//! Runs pool pollers, the achievement evaluation worker and the leaderboard
//! schedulers until Ctrl+C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin m2p_rewardsd -- --config Config.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use m2p_core::achievements::AchievementCatalog;
use m2p_core::service::{self, RewardsService};
use m2p_core::settings::{Settings, StoreBackend};
use std::sync::Arc;
use tokio::signal;

#[derive(Debug, Parser)]
#[command(name = "m2p_rewardsd", about = "M2P rewards core daemon")]
struct Args {
    /// Settings file (defaults to $M2P_CONFIG or Config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Use the in-memory store regardless of settings
    #[arg(long)]
    memory: bool,

    /// Replay dead-lettered records once at startup
    #[arg(long)]
    replay_dead_letters: bool,
}

#[cfg(feature = "observability")]
fn init_logging(settings: &Settings) -> Result<()> {
    use m2p_core::settings::LogFormat;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    match settings.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Some(listen) = &settings.logging.metrics_listen {
        let addr: std::net::SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid logging.metrics_listen {:?}", listen))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        println!("📈 Metrics exporter listening on {}", addr);
    }
    m2p_core::metrics::describe_metrics();
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_logging(settings: &Settings) -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.logging.level.clone()),
    )
    .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::new()?,
    };
    if args.memory {
        settings.database.backend = StoreBackend::Memory;
    }
    init_logging(&settings)?;

    println!("🚀 Starting M2P rewards core");
    println!("═══════════════════════════════════════════════════════════════════\n");

    let catalog = Arc::new(
        AchievementCatalog::load(&settings.achievements.catalog_path)
            .with_context(|| format!("loading catalog {}", settings.achievements.catalog_path))?,
    );
    println!("✅ Catalog loaded ({} achievements)", catalog.len());

    let store = service::open_store(&settings).await?;
    println!("✅ Store ready ({:?})", settings.database.backend);

    let sources = service::sources_from_settings(&settings)?;
    println!("✅ {} pool source(s) enabled", sources.len());

    let mut rewards = RewardsService::new(settings, store, catalog)?;
    if args.replay_dead_letters {
        let summary = rewards.ingestion().replay_dead_letters().await;
        println!(
            "🔁 Replayed dead letters: {} committed, {} duplicates, {} failed",
            summary.committed, summary.duplicates, summary.failed
        );
    }

    let handle = rewards.start(sources);
    println!("\nPress Ctrl+C to stop gracefully...\n");

    signal::ctrl_c().await?;
    println!("\n🛑 Shutdown signal received, stopping tasks...");
    handle.shutdown().await;
    println!("✅ Stopped");
    Ok(())
}
