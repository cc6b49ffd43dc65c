//! Push-based metrics reporter: periodically renders a JSON snapshot
//! of trading statistics and circuit-breaker health to stdout. No HTTP
//! server, no incoming connections — only outbound data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{info, warn};

use crate::application::statistics::StatisticsCache;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub stats: StatsSnapshot,
    pub system: SystemSnapshot,
}

#[derive(Serialize)]
pub struct StatsSnapshot {
    pub total_trades: u64,
    pub completed_trades: u64,
    pub total_pnl_usd: f64,
    pub win_rate: f64,
}

#[derive(Serialize)]
pub struct SystemSnapshot {
    pub circuit_breaker_open: bool,
}

/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    stats: Arc<StatisticsCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        stats: Arc<StatisticsCache>,
        circuit_breaker: Arc<CircuitBreaker>,
        metrics: Metrics,
        interval_seconds: u64,
    ) -> Self {
        MetricsReporter {
            stats,
            circuit_breaker,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            pnl = snapshot.stats.total_pnl_usd,
                            trades = snapshot.stats.completed_trades,
                            uptime_seconds = snapshot.uptime_seconds,
                            "metrics snapshot emitted"
                        );
                    }
                    Err(e) => warn!(%e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(%e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let stats = self.stats.overall_stats().await;
        let circuit_open = self.circuit_breaker.state().await == CircuitState::Open;

        let total_pnl = stats.total_pnl.to_f64().unwrap_or(0.0);
        let win_rate = stats.win_rate.to_f64().unwrap_or(0.0);

        self.metrics.daily_pnl_usd.set(total_pnl);
        self.metrics.win_rate_current.set(win_rate);
        self.metrics
            .circuit_breaker_status
            .set(if circuit_open { 1.0 } else { 0.0 });
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            stats: StatsSnapshot {
                total_trades: stats.total_trades,
                completed_trades: stats.completed_trades,
                total_pnl_usd: total_pnl,
                win_rate,
            },
            system: SystemSnapshot {
                circuit_breaker_open: circuit_open,
            },
        })
    }
}
