//! Port traits implemented by infrastructure and driven by the
//! application layer. Every method returns the typed
//! [`ExchangeError`](crate::domain::errors::ExchangeError) — `anyhow`
//! only appears at the bootstrap/binary edge.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{watch, Notify};

use crate::domain::errors::ExchangeError;
use crate::domain::kline::{ExchangePosition, Kline, OrderRecord};
use crate::domain::kline_buffer::KlineBuffer;
use crate::domain::trading::types::{OrderSide, OrderType};

/// Per-symbol exchange filters needed to round a quantity/notional to
/// what the exchange will accept.
#[derive(Debug, Clone, Copy)]
pub struct SymbolFilters {
    pub quantity_precision: u32,
    pub min_notional: Decimal,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        SymbolFilters {
            quantity_precision: 3,
            min_notional: Decimal::from(5),
        }
    }
}

/// Unauthenticated public market data (C4).
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError>;

    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;
}

/// Parameters for a new order, shared by market/limit entries and
/// conditional TP/SL orders.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub client_order_id: String,
}

/// Authenticated trading surface (C5), always behind the circuit
/// breaker at the infrastructure implementation.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn place_order(&self, order: NewOrder) -> Result<OrderRecord, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, ExchangeError>;

    async fn get_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderRecord, ExchangeError>;

    async fn get_position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError>;

    async fn get_account_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    async fn close_position(&self, symbol: &str) -> Result<Option<OrderRecord>, ExchangeError>;

    /// Best-effort; a failure here must not fail the caller.
    async fn get_funding_fees(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Decimal, ExchangeError>;
}

/// The long-lived connection task for one `(symbol, interval)` stream
/// (C3). Runs until `cancel` reports `true`, pushing closed candles
/// into `buffer` and firing `notify` exactly once per closed candle.
#[async_trait]
pub trait KlineStreamPort: Send + Sync {
    async fn run(
        &self,
        symbol: String,
        interval: String,
        buffer: Arc<KlineBuffer>,
        notify: Arc<Notify>,
        cancel: watch::Receiver<bool>,
    );
}
