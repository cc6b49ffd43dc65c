//! Futures engine server — headless trading binary. Boots Binance
//! clients, wires one runner per configured strategy behind the
//! shared websocket manager, and runs until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_engine::application::risk_management::sizing_engine::SizingEngine;
use futures_engine::application::runner::{evaluation_timeout, Runner};
use futures_engine::application::statistics::StatisticsCache;
use futures_engine::application::strategies::registry::{build_strategy, default_params_for};
use futures_engine::application::ws_manager::WsManager;
use futures_engine::config::Config;
use futures_engine::domain::kline::StrategyContext;
use futures_engine::domain::ports::{ExecutionPort, MarketDataPort};
use futures_engine::infrastructure::binance::{BinanceExecutionClient, BinanceKlineStream, BinanceMarketDataClient};
use futures_engine::infrastructure::observability::{Metrics, MetricsReporter};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "futures-engine-server", about = "Binance futures trading engine")]
struct Cli {
    /// Force testnet regardless of BINANCE_TESTNET.
    #[arg(long)]
    testnet: bool,

    /// Path to a `.env`-style file to load before reading the environment.
    #[arg(long)]
    config: Option<String>,

    /// Build strategies and connect clients, but never place or cancel orders.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.config {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading config file {path}"))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    if cli.testnet {
        config.testnet = true;
    }
    if cli.dry_run {
        warn!("dry-run requested: orders will not be placed or cancelled");
    }

    info!(
        testnet = config.testnet,
        strategies = config.strategies.len(),
        "starting futures engine"
    );

    let execution_client = Arc::new(BinanceExecutionClient::new(
        config.binance_api_key.clone(),
        config.binance_api_secret.clone(),
        config.testnet,
    ));
    if let Err(e) = execution_client.sync_clock().await {
        warn!(%e, "initial clock sync failed, continuing with zero offset");
    }
    let execution: Arc<dyn ExecutionPort> = execution_client.clone();

    let market_data: Arc<dyn MarketDataPort> = Arc::new(BinanceMarketDataClient::new(config.testnet));
    let ws_connector = Arc::new(BinanceKlineStream::new(config.testnet));
    let ws = Arc::new(WsManager::new(ws_connector));
    let stats = Arc::new(StatisticsCache::new());
    let sizing = Arc::new(SizingEngine::new(config.sizing.clone()));

    let (cancel_tx, _cancel_rx) = watch::channel(false);
    let mut runner_handles = Vec::new();

    for spec in &config.strategies {
        let params = match default_params_for(&spec.kind_tag) {
            Ok(p) => p,
            Err(e) => {
                error!(strategy = %spec.id, %e, "skipping strategy with unresolvable kind");
                continue;
            }
        };
        let interval = params.kline_interval().to_string();

        let ctx = StrategyContext {
            id: spec.id.clone(),
            name: spec.kind_tag.clone(),
            symbol: spec.symbol.clone(),
            leverage: spec.leverage,
            risk_per_trade: spec.risk_per_trade,
            params,
            interval_seconds: spec.interval_seconds,
        };

        let strategy = match build_strategy(ctx.clone()) {
            Ok(s) => s,
            Err(e) => {
                error!(strategy = %spec.id, %e, "failed to build strategy");
                continue;
            }
        };

        ws.subscribe(&spec.symbol, &interval).await;

        let runner = Arc::new(Runner::new(
            ctx,
            strategy,
            ws.clone(),
            market_data.clone(),
            execution.clone(),
            sizing.clone(),
            stats.clone(),
        ));

        let ws_for_task = ws.clone();
        let mut cancel_rx = cancel_tx.subscribe();
        let symbol = spec.symbol.clone();
        let interval_for_task = interval.clone();
        let timeout = evaluation_timeout(spec.interval_seconds);
        let strategy_id = spec.id.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            runner.cancel();
                            break;
                        }
                    }
                    _ = ws_for_task.wait_for_new_closed_candle(&symbol, &interval_for_task, timeout) => {
                        if let Err(e) = runner.tick().await {
                            if e.is_fatal_for_runner() {
                                error!(strategy = %strategy_id, %e, "runner stopping on fatal error");
                                break;
                            }
                            warn!(strategy = %strategy_id, %e, "tick returned an error, continuing");
                        }
                    }
                }
            }
            ws_for_task.unsubscribe(&symbol, &interval_for_task).await;
        });

        runner_handles.push(handle);
    }

    let metrics = Metrics::new()?;
    let reporter = MetricsReporter::new(
        stats.clone(),
        execution_client.circuit_breaker(),
        metrics,
        config.metrics_interval_secs,
    );
    tokio::spawn(async move {
        reporter.run().await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, cancelling runners");
    let _ = cancel_tx.send(true);

    for handle in runner_handles {
        let _ = handle.await;
    }

    Ok(())
}
