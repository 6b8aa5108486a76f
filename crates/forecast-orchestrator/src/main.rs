use std::sync::Arc;
use std::time::Duration;

use analysis_core::{CooldownStore, Horizon};
use anyhow::{Context, Result};
use chrono::Utc;
use forecast_orchestrator::{
    CooldownController, ForecastConfig, ForecastOrchestrator, InMemoryCooldownStore, MarketSources,
    OrchestratorSettings, RedisCooldownStore, StaticMarketContext, StoreMarketData,
};
use prediction_store::PredictionDb;
use tokio::signal::unix::SignalKind;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting forecast worker");

    let config = ForecastConfig::from_env()?;
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!("  Cooldown: {}s", config.cooldown_ttl_secs);
    tracing::info!("  Recompute interval: {}s", config.recompute_interval_secs);
    tracing::info!(
        "  Batch: {} concurrent, {}ms stagger",
        config.batch_concurrency,
        config.batch_stagger_ms
    );

    let db = PredictionDb::new(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    for symbol in &config.watchlist {
        db.get_or_create_instrument(symbol).await?;
    }

    let cooldown_store: Arc<dyn CooldownStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCooldownStore::connect(url)
                .await
                .context("connecting cooldown store to Redis")?,
        ),
        None => {
            tracing::info!("REDIS_URL not set, cooldown is process-local");
            Arc::new(InMemoryCooldownStore::new())
        }
    };

    let sources = MarketSources::from_store(
        StoreMarketData::new(db.clone()),
        StaticMarketContext::new(config.foreign_influence, config.fear_greed_value),
    );
    let orchestrator = Arc::new(ForecastOrchestrator::new(
        db,
        sources,
        CooldownController::new(cooldown_store, config.cooldown_ttl()),
        config.engine_config()?,
        config.keyword_tables()?,
        OrchestratorSettings::from(&config),
    )?);

    let mut interval = time::interval(Duration::from_secs(config.recompute_interval_secs.max(1)));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cycle(&orchestrator).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting");
                break;
            }
        }
    }

    tracing::info!("Forecast worker shut down.");
    Ok(())
}

async fn run_cycle(orchestrator: &ForecastOrchestrator) {
    for horizon in Horizon::ALL {
        if let Err(e) = orchestrator.recompute_all(horizon).await {
            tracing::error!(horizon = %horizon, "Recompute failed: {}", e);
        }
    }

    match orchestrator.resolve_pending(Utc::now()).await {
        Ok(0) => {}
        Ok(resolved) => tracing::info!(resolved, "Resolved scenario batches"),
        Err(e) => tracing::error!("Scenario resolution failed: {}", e),
    }
}
