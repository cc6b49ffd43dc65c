//! Shared data-model types that cross the domain/application boundary:
//! closed candles, strategy signals, strategy context, and the runtime
//! state a strategy instance owns between evaluations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::strategy_params::{EmaScalpingConfig, RangeConfig};
use crate::domain::trading::types::{OrderSide, OrderStatus, OrderType};
use crate::domain::trailing_stop::TrailingStop;

/// A closed candlestick. Semantic key is `close_time`, monotonic within
/// a single stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub trade_count: u64,
    pub taker_buy_volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

/// Emitted by a strategy's `evaluate()`. Not persisted by the core —
/// the runner consumes it immediately.
#[derive(Debug, Clone)]
pub struct Signal {
    pub action: Action,
    pub symbol: String,
    pub confidence: f64,
    pub price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub position_side: Option<PositionSide>,
}

impl Signal {
    pub fn hold(symbol: impl Into<String>) -> Self {
        Signal {
            action: Action::Hold,
            symbol: symbol.into(),
            confidence: 0.0,
            price: None,
            exit_reason: None,
            position_side: None,
        }
    }
}

/// Per-strategy typed parameter record. `EmaScalping`/`RangeMeanReversion`
/// hold the defaults documented for C9a/C9b; configuration strings
/// ("true"/"false"/"0"/"1"/"yes") are parsed by the registry (C11)
/// before reaching here, so every field is already a native type.
#[derive(Debug, Clone)]
pub enum StrategyParams {
    EmaScalping(EmaScalpingConfig),
    RangeMeanReversion(RangeConfig),
}

impl StrategyParams {
    pub fn kline_interval(&self) -> &str {
        match self {
            StrategyParams::EmaScalping(cfg) => &cfg.kline_interval,
            StrategyParams::RangeMeanReversion(cfg) => &cfg.kline_interval,
        }
    }
}

/// Immutable per-evaluation context, shared by reference across a
/// runner's whole lifetime.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub leverage: u32,
    pub risk_per_trade: Decimal,
    pub params: StrategyParams,
    pub interval_seconds: u64,
}

/// Mutated only by the strategy instance that owns it, on its own
/// runner task. See `domain` module docs for the invariants this type
/// must uphold (position/entry fields move together; `cooldown_left`
/// resets on every exit; `prev_fast_ema`/`prev_slow_ema` only move
/// forward on a strictly newer candle).
#[derive(Debug, Clone, Default)]
pub struct StrategyRuntimeState {
    pub position: Option<PositionSide>,
    pub entry_price: Option<Decimal>,
    pub entry_candle_close_time: Option<DateTime<Utc>>,
    pub last_processed_close_time: Option<DateTime<Utc>>,
    pub prev_fast_ema: Option<f64>,
    pub prev_slow_ema: Option<f64>,
    pub cooldown_left: u32,
    pub trailing_stop: Option<TrailingStop>,
    pub range_high: Option<Decimal>,
    pub range_low: Option<Decimal>,
    pub range_mid: Option<Decimal>,
    pub range_valid: bool,
    pub range_invalid_count: u32,
}

impl StrategyRuntimeState {
    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Resets position-related fields together, upholding invariant 2
    /// (`position == nil ⇔ entry_price == nil ⇔
    /// entry_candle_close_time == nil ⇔ trailing_stop == nil`).
    pub fn clear_position(&mut self) {
        self.position = None;
        self.entry_price = None;
        self.entry_candle_close_time = None;
        self.trailing_stop = None;
    }

    pub fn open_position(
        &mut self,
        side: PositionSide,
        entry_price: Decimal,
        candle_close_time: DateTime<Utc>,
    ) {
        self.position = Some(side);
        self.entry_price = Some(entry_price);
        self.entry_candle_close_time = Some(candle_close_time);
    }
}

/// Produced on order place/query, consumed by C12 (statistics) and
/// runtime-state updates.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Decimal,
    pub avg_price: Decimal,
    pub executed_qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl OrderRecord {
    pub fn notional(&self) -> Decimal {
        self.avg_price * self.executed_qty
    }
}

/// Read-only view of an open exchange position, as reported by the
/// account endpoint and consumed by `sync_position_state`.
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub entry_price: Option<Decimal>,
    pub position_amt: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
}

/// Snapshot handed to the statistics walk (C12); one per strategy,
/// keyed by strategy id elsewhere.
#[derive(Debug, Clone, Default)]
pub struct TradeJournal {
    pub orders: Vec<OrderRecord>,
}

/// `(component, name)` keyed circuit-breaker record, surfaced for
/// diagnostics and metrics; the breaker itself lives in infrastructure.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRecord {
    pub component: String,
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub half_open_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Persisted strategy record as consumed from the external store (not
/// owned by this crate — only its field shape).
#[derive(Debug, Clone)]
pub struct PersistedStrategyRecord {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub strategy_type: String,
    pub status: PersistedStatus,
    pub leverage: u32,
    pub risk_per_trade: Decimal,
    pub fixed_amount: Option<Decimal>,
    pub params: HashMap<String, String>,
    pub account_id: String,
    pub position_side: Option<PositionSide>,
    pub position_size: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub last_signal: Option<String>,
    pub unrealized_pnl: Option<Decimal>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedStatus {
    Running,
    Stopped,
    Error,
}
