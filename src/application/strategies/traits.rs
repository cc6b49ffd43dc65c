//! The narrow contract every strategy implements, plus the read-only
//! market view it evaluates against. Deliberately smaller than the
//! legacy framework this replaces: no stock-market scaffolding (no
//! multi-factor `AnalysisContext`, no `PositionInfo` duplicate of the
//! exchange's own position record).

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::errors::ExchangeError;
use crate::domain::kline::{Kline, PositionSide, Signal, StrategyContext, StrategyRuntimeState};

/// Read-only access to kline history and live price, backed by the
/// shared WS buffer (C2) with REST fallback (C4). A strategy never
/// talks to the exchange client directly.
#[async_trait]
pub trait MarketView: Send + Sync {
    async fn recent_closed_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError>;

    async fn live_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
}

/// One strategy instance, bound to a single `(symbol, interval)` and
/// driven by exactly one runner task (C10).
#[async_trait]
pub trait Strategy: Send + Sync {
    fn context(&self) -> &StrategyContext;

    fn runtime_state(&self) -> &StrategyRuntimeState;

    /// Evaluates one scheduling tick against the given market view,
    /// producing a single signal. Mutates internal runtime state
    /// following the monotonicity and invariant rules documented on
    /// [`StrategyRuntimeState`](crate::domain::kline::StrategyRuntimeState).
    async fn evaluate(&mut self, view: &dyn MarketView) -> Result<Signal, ExchangeError>;

    /// Aligns runtime state with the exchange's authoritative position
    /// for this symbol. `None` side means flat.
    fn sync_position_state(&mut self, side: Option<PositionSide>, entry_price: Option<Decimal>);

    /// Replaces the whole runtime state wholesale. Used only by a hot
    /// parameter swap, where a freshly rebuilt instance must pick up
    /// exactly where the old one left off rather than start flat.
    fn restore_runtime_state(&mut self, state: StrategyRuntimeState);

    /// Called once before a runner drops this instance (hot-swap or
    /// shutdown). Strategies with no held resources can leave this
    /// empty; it exists so the contract is uniform.
    fn teardown(&mut self) {}
}
