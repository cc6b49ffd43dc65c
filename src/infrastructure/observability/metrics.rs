//! Prometheus metric definitions, push-only (no scrape endpoint is
//! bound anywhere in this crate — [`MetricsReporter`](super::reporter::MetricsReporter)
//! renders and ships these on an interval).
//!
//! All metrics use the `futures_engine_` prefix.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Number of open positions across all strategies
    pub positions_count: GenericGauge<AtomicF64>,
    /// Open position notional per symbol, in quote currency
    pub position_notional_usd: GenericGaugeVec<AtomicF64>,
    /// Realized P&L today, in quote currency
    pub daily_pnl_usd: GenericGauge<AtomicF64>,
    /// Total orders placed, by side and status
    pub orders_total: CounterVec,
    /// Circuit breaker status (0=closed, 1=open)
    pub circuit_breaker_status: GenericGauge<AtomicF64>,
    /// Process uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// Exchange API call latency, by broker and endpoint
    pub api_latency_seconds: HistogramVec,
    /// Kline websocket reconnection attempts, by broker
    pub websocket_reconnects_total: CounterVec,
    /// Strategy signals generated, by strategy and signal type
    pub trade_signals_total: CounterVec,
    /// Current rolling win rate (0-1)
    pub win_rate_current: GenericGauge<AtomicF64>,
    /// Current drawdown from equity high-water mark (0-1)
    pub drawdown_current: GenericGauge<AtomicF64>,
    /// Trades closed today, by side and outcome
    pub trades_today: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let positions_count = Gauge::with_opts(Opts::new(
            "futures_engine_positions_count",
            "Number of open positions",
        ))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_notional_usd = GaugeVec::new(
            Opts::new(
                "futures_engine_position_notional_usd",
                "Open position notional per symbol",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(position_notional_usd.clone()))?;

        let daily_pnl_usd = Gauge::with_opts(Opts::new(
            "futures_engine_daily_pnl_usd",
            "Realized P&L today",
        ))?;
        registry.register(Box::new(daily_pnl_usd.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("futures_engine_orders_total", "Total orders by side and status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let circuit_breaker_status = Gauge::with_opts(Opts::new(
            "futures_engine_circuit_breaker_status",
            "Circuit breaker status (0=closed, 1=open)",
        ))?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "futures_engine_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let api_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "futures_engine_api_latency_seconds",
                "Exchange API call latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["broker", "endpoint"],
        )?;
        registry.register(Box::new(api_latency_seconds.clone()))?;

        let websocket_reconnects_total = CounterVec::new(
            Opts::new(
                "futures_engine_websocket_reconnects_total",
                "Total kline websocket reconnection attempts",
            ),
            &["broker"],
        )?;
        registry.register(Box::new(websocket_reconnects_total.clone()))?;

        let trade_signals_total = CounterVec::new(
            Opts::new(
                "futures_engine_trade_signals_total",
                "Total strategy signals generated",
            ),
            &["strategy", "signal_type"],
        )?;
        registry.register(Box::new(trade_signals_total.clone()))?;

        let win_rate_current = Gauge::with_opts(Opts::new(
            "futures_engine_win_rate_current",
            "Current rolling win rate (0-1)",
        ))?;
        registry.register(Box::new(win_rate_current.clone()))?;

        let drawdown_current = Gauge::with_opts(Opts::new(
            "futures_engine_drawdown_current",
            "Current drawdown from equity high-water mark (0-1)",
        ))?;
        registry.register(Box::new(drawdown_current.clone()))?;

        let trades_today = CounterVec::new(
            Opts::new("futures_engine_trades_today", "Total trades closed today"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(trades_today.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            positions_count,
            position_notional_usd,
            daily_pnl_usd,
            orders_total,
            circuit_breaker_status,
            uptime_seconds,
            api_latency_seconds,
            websocket_reconnects_total,
            trade_signals_total,
            win_rate_current,
            drawdown_current,
            trades_today,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_position_notional(&self, symbol: &str, value: f64) {
        self.position_notional_usd.with_label_values(&[symbol]).set(value);
    }

    pub fn inc_orders(&self, side: &str, status: &str) {
        self.orders_total.with_label_values(&[side, status]).inc();
    }

    pub fn observe_api_latency(&self, broker: &str, endpoint: &str, latency: f64) {
        self.api_latency_seconds
            .with_label_values(&[broker, endpoint])
            .observe(latency);
    }

    pub fn inc_reconnects(&self, broker: &str) {
        self.websocket_reconnects_total.with_label_values(&[broker]).inc();
    }

    pub fn inc_signals(&self, strategy: &str, signal_type: &str) {
        self.trade_signals_total
            .with_label_values(&[strategy, signal_type])
            .inc();
    }

    pub fn inc_trades_today(&self, side: &str, outcome: &str) {
        self.trades_today.with_label_values(&[side, outcome]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
