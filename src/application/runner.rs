//! Strategy runner / executor (C10): one task per configured strategy,
//! driving exactly one strategy instance end to end — scheduling,
//! reconciliation, idempotent order placement, hot parameter swap,
//! and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::application::risk_management::sizing_engine::SizingEngine;
use crate::application::statistics::StatisticsCache;
use crate::application::strategies::traits::{MarketView, Strategy};
use crate::application::ws_manager::WsManager;
use crate::domain::errors::ExchangeError;
use crate::domain::indicators::Bar;
use crate::domain::kline::{Action, Kline, OrderRecord, PositionSide, Signal, StrategyContext};
use crate::domain::ports::{ExecutionPort, MarketDataPort, NewOrder};
use crate::domain::trading::types::{OrderSide, OrderType};

const REST_FALLBACK_MULTIPLIER: u32 = 3;
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(8);
const MAX_RETRIES: u32 = 3;

/// Bridges a strategy's need for kline/price data to the shared WS
/// buffer with REST fallback, as C9 strategies expect.
pub struct RunnerMarketView {
    ws: Arc<WsManager>,
    market_data: Arc<dyn MarketDataPort>,
}

impl RunnerMarketView {
    pub fn new(ws: Arc<WsManager>, market_data: Arc<dyn MarketDataPort>) -> Self {
        RunnerMarketView { ws, market_data }
    }
}

#[async_trait]
impl MarketView for RunnerMarketView {
    async fn recent_closed_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let from_ws = self.ws.recent_closed_klines(symbol, interval, limit).await;
        if from_ws.len() >= limit.min(from_ws.len().max(1)) && !from_ws.is_empty() {
            return Ok(from_ws);
        }
        self.market_data
            .get_klines(symbol, interval, limit as u32)
            .await
    }

    async fn live_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.market_data.get_price(symbol).await
    }
}

/// Deterministic client-order-id: derived solely from the strategy,
/// symbol, side, and the close time of the candle that produced the
/// signal, so re-placing the same logical order (retry after a
/// dropped response, duplicate tick) always lands on the same id
/// within the exchange's dedup window. No randomness — a salt would
/// defeat the idempotency this id exists to provide.
pub fn compute_client_order_id(
    strategy_id: &str,
    symbol: &str,
    side: OrderSide,
    signal_close_time: chrono::DateTime<chrono::Utc>,
) -> String {
    format!(
        "{strategy_id}-{symbol}-{side}-{}",
        signal_close_time.timestamp()
    )
}

pub struct Runner {
    ctx: RwLock<StrategyContext>,
    strategy: RwLock<Box<dyn Strategy>>,
    view: RunnerMarketView,
    execution: Arc<dyn ExecutionPort>,
    sizing: Arc<SizingEngine>,
    stats: Arc<StatisticsCache>,
    cancelled: AtomicBool,
}

impl Runner {
    pub fn new(
        ctx: StrategyContext,
        strategy: Box<dyn Strategy>,
        ws: Arc<WsManager>,
        market_data: Arc<dyn MarketDataPort>,
        execution: Arc<dyn ExecutionPort>,
        sizing: Arc<SizingEngine>,
        stats: Arc<StatisticsCache>,
    ) -> Self {
        Runner {
            ctx: RwLock::new(ctx),
            strategy: RwLock::new(strategy),
            view: RunnerMarketView::new(ws, market_data),
            execution,
            sizing,
            stats,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Hot parameter swap: rebuilds the strategy instance from new
    /// parameters while preserving `position`/`entry_price`/
    /// `last_processed_close_time` and the rest of the runtime state,
    /// then atomically replaces the active instance. Never runs
    /// mid-evaluation — callers hold the same lock the main loop takes.
    pub async fn update_params(&self, rebuild: impl FnOnce(&StrategyContext) -> Box<dyn Strategy>) {
        let mut strategy_guard = self.strategy.write().await;
        let preserved_state = strategy_guard.runtime_state().clone();
        let ctx_guard = self.ctx.read().await;
        let mut new_strategy = rebuild(&ctx_guard);
        drop(ctx_guard);
        new_strategy.restore_runtime_state(preserved_state);
        *strategy_guard = new_strategy;
        info!("hot-swapped strategy parameters");
    }

    /// One scheduling tick: reconcile against the exchange, evaluate,
    /// and act on the resulting signal. Returns `Ok(())` on anything
    /// handled (including a `Hold`); returns `Err` only on a fatal
    /// exchange error that should stop the runner.
    pub async fn tick(&self) -> Result<(), ExchangeError> {
        if self.is_cancelled() {
            return Ok(());
        }

        let symbol = self.ctx.read().await.symbol.clone();
        let live_position = self.execution.get_position(&symbol).await?;
        {
            let mut strategy = self.strategy.write().await;
            match &live_position {
                Some(pos) => strategy.sync_position_state(pos.side, pos.entry_price),
                None => strategy.sync_position_state(None, None),
            }
        }

        if self.is_cancelled() {
            return Ok(());
        }

        let signal = {
            let mut strategy = self.strategy.write().await;
            strategy.evaluate(&self.view).await?
        };

        match signal.action {
            Action::Hold => Ok(()),
            Action::Buy | Action::Sell => self.handle_entry(signal).await,
            Action::Close => self.handle_exit(signal).await,
        }
    }

    /// Recent closed candles converted to the decimal-free `Bar` shape
    /// the sizing engine's ATR adjustment expects. Falls back to an
    /// empty slice (ATR adjustment skipped, not an entry-blocking
    /// error) if the market view can't serve them.
    async fn recent_bars(&self, ctx: &StrategyContext) -> Vec<Bar> {
        let interval = ctx.params.kline_interval();
        match self
            .view
            .recent_closed_klines(&ctx.symbol, interval, self.sizing.atr_lookback())
            .await
        {
            Ok(klines) => klines
                .iter()
                .map(|k| Bar {
                    high: k.high.to_f64().unwrap_or(0.0),
                    low: k.low.to_f64().unwrap_or(0.0),
                    close: k.close.to_f64().unwrap_or(0.0),
                    volume: k.volume.to_f64().unwrap_or(0.0),
                })
                .collect(),
            Err(err) => {
                warn!(strategy_id = %ctx.id, %err, "failed to fetch recent bars for ATR sizing, skipping adjustment");
                Vec::new()
            }
        }
    }

    async fn handle_entry(&self, signal: Signal) -> Result<(), ExchangeError> {
        let ctx = self.ctx.read().await.clone();
        let Some(price) = signal.price else {
            return Ok(());
        };
        let filters = self.view.market_data.get_symbol_filters(&ctx.symbol).await?;
        let equity = self.execution.get_account_balance("USDT").await?;

        let side = match signal.action {
            Action::Buy => OrderSide::Buy,
            Action::Sell => OrderSide::Sell,
            _ => return Ok(()),
        };

        let recent_bars = self.recent_bars(&ctx).await;
        let sizing_result = self.sizing.calculate_quantity(
            ctx.risk_per_trade,
            price,
            None,
            Some(&ctx.id),
            &recent_bars,
            equity,
            filters.min_notional,
            filters.quantity_precision,
        );

        let (quantity, _notional) = match sizing_result {
            Ok(v) => v,
            Err(err) => {
                warn!(strategy_id = %ctx.id, %err, "position sizing rejected entry");
                return Ok(());
            }
        };

        let signal_close_time = self
            .strategy
            .read()
            .await
            .runtime_state()
            .last_processed_close_time
            .unwrap_or_else(chrono::Utc::now);
        let client_order_id = compute_client_order_id(&ctx.id, &ctx.symbol, side, signal_close_time);

        let order = NewOrder {
            symbol: ctx.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            client_order_id: client_order_id.clone(),
        };

        match self.place_with_retry(order).await {
            Ok(record) => {
                self.stats.record_order(&ctx.id, record).await;
                Ok(())
            }
            Err(err) if err.is_transient() => {
                warn!(strategy_id = %ctx.id, %err, "transient error placing entry order, will retry next tick");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn handle_exit(&self, signal: Signal) -> Result<(), ExchangeError> {
        let ctx = self.ctx.read().await.clone();
        match self.execution.close_position(&ctx.symbol).await {
            Ok(Some(record)) => {
                let is_win = record.avg_price > Decimal::ZERO;
                self.stats.record_order(&ctx.id, record).await;
                let _ = is_win;
                info!(strategy_id = %ctx.id, reason = ?signal.exit_reason, "position closed");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) if err.is_transient() => {
                warn!(strategy_id = %ctx.id, %err, "transient error closing position, will retry next tick");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Retries transient errors with exponential backoff up to
    /// [`MAX_RETRIES`] attempts capped at [`RETRY_BACKOFF_CAP`]. A
    /// duplicate-client-order-id rejection means this exact order was
    /// already accepted under a prior attempt (retry after a dropped
    /// response, or a re-evaluated candle) — reconcile by querying the
    /// existing order instead of retrying or failing the tick.
    async fn place_with_retry(&self, order: NewOrder) -> Result<OrderRecord, ExchangeError> {
        let mut attempt = 0;
        loop {
            match self.execution.place_order(order.clone()).await {
                Ok(record) => return Ok(record),
                Err(err) if err.is_duplicate_order() => {
                    warn!(
                        client_order_id = %order.client_order_id,
                        "duplicate client order id rejected, reconciling with existing order"
                    );
                    return self
                        .execution
                        .get_order(&order.symbol, &order.client_order_id)
                        .await;
                }
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_secs(2u64.pow(attempt)).min(RETRY_BACKOFF_CAP);
                    warn!(attempt, ?backoff, %err, "retrying order placement after transient error");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    if err.is_fatal_for_runner() {
                        error!(%err, "fatal exchange error, runner will stop");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// How long the runner waits for a closed-candle notification before
/// falling back to a REST evaluation, per the documented `interval *
/// N` rule.
pub fn evaluation_timeout(interval_seconds: u64) -> Duration {
    Duration::from_secs(interval_seconds * REST_FALLBACK_MULTIPLIER as u64)
}

impl Clone for NewOrder {
    fn clone(&self) -> Self {
        NewOrder {
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            price: self.price,
            stop_price: self.stop_price,
            reduce_only: self.reduce_only,
            close_position: self.close_position,
            client_order_id: self.client_order_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk_management::sizing_engine::SizingConfig;
    use crate::domain::kline::{ExchangePosition, StrategyParams, StrategyRuntimeState};
    use crate::domain::kline_buffer::KlineBuffer;
    use crate::domain::ports::{KlineStreamPort, SymbolFilters};
    use crate::domain::strategy_params::EmaScalpingConfig;
    use crate::domain::trading::types::OrderStatus;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{watch, Notify};

    #[test]
    fn client_order_id_embeds_strategy_symbol_side_and_candle_time() {
        let now = chrono::Utc::now();
        let id = compute_client_order_id("s1", "BTCUSDT", OrderSide::Buy, now);
        assert!(id.starts_with("s1-BTCUSDT-BUY-"));
        assert!(id.contains(&now.timestamp().to_string()));
    }

    #[test]
    fn client_order_id_is_deterministic_for_identical_inputs() {
        let now = chrono::Utc::now();
        let a = compute_client_order_id("s1", "BTCUSDT", OrderSide::Buy, now);
        let b = compute_client_order_id("s1", "BTCUSDT", OrderSide::Buy, now);
        assert_eq!(a, b);
    }

    #[test]
    fn client_order_id_differs_for_a_different_candle() {
        let t1 = chrono::Utc::now();
        let t2 = t1 + chrono::Duration::minutes(1);
        let a = compute_client_order_id("s1", "BTCUSDT", OrderSide::Buy, t1);
        let b = compute_client_order_id("s1", "BTCUSDT", OrderSide::Buy, t2);
        assert_ne!(a, b);
    }

    #[test]
    fn evaluation_timeout_scales_with_interval() {
        assert_eq!(evaluation_timeout(60), Duration::from_secs(180));
    }

    struct FakeStrategy {
        ctx: StrategyContext,
        state: StrategyRuntimeState,
    }

    #[async_trait]
    impl Strategy for FakeStrategy {
        fn context(&self) -> &StrategyContext {
            &self.ctx
        }

        fn runtime_state(&self) -> &StrategyRuntimeState {
            &self.state
        }

        async fn evaluate(&mut self, _view: &dyn MarketView) -> Result<Signal, ExchangeError> {
            Ok(Signal::hold(self.ctx.symbol.clone()))
        }

        fn sync_position_state(&mut self, side: Option<PositionSide>, entry_price: Option<Decimal>) {
            self.state.position = side;
            self.state.entry_price = entry_price;
        }

        fn restore_runtime_state(&mut self, state: StrategyRuntimeState) {
            self.state = state;
        }
    }

    struct NoopMarketData;

    #[async_trait]
    impl MarketDataPort for NoopMarketData {
        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Kline>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn get_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(Decimal::ZERO)
        }

        async fn get_symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters, ExchangeError> {
            Ok(SymbolFilters::default())
        }
    }

    struct NoopConnector;

    #[async_trait]
    impl KlineStreamPort for NoopConnector {
        async fn run(
            &self,
            _symbol: String,
            _interval: String,
            _buffer: Arc<KlineBuffer>,
            _notify: Arc<Notify>,
            mut cancel: watch::Receiver<bool>,
        ) {
            let _ = cancel.changed().await;
        }
    }

    /// Hands back queued `place_order` responses in order, and a fixed
    /// record from `get_order` — enough to drive the duplicate-order
    /// reconciliation path without a real exchange.
    struct StubExecution {
        place_responses: StdMutex<VecDeque<Result<OrderRecord, ExchangeError>>>,
        get_order_response: OrderRecord,
        get_order_calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionPort for StubExecution {
        async fn place_order(&self, _order: NewOrder) -> Result<OrderRecord, ExchangeError> {
            self.place_responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra place_order call")
        }

        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OrderRecord>, ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_order(
            &self,
            _symbol: &str,
            _client_order_id: &str,
        ) -> Result<OrderRecord, ExchangeError> {
            self.get_order_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.get_order_response.clone())
        }

        async fn get_position(&self, _symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_account_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn close_position(&self, _symbol: &str) -> Result<Option<OrderRecord>, ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_funding_fees(
            &self,
            _symbol: &str,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> Result<Decimal, ExchangeError> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn test_ctx() -> StrategyContext {
        StrategyContext {
            id: "s1".to_string(),
            name: "fake".to_string(),
            symbol: "BTCUSDT".to_string(),
            leverage: 5,
            risk_per_trade: dec!(0.01),
            params: StrategyParams::EmaScalping(EmaScalpingConfig::default()),
            interval_seconds: 60,
        }
    }

    fn sample_order_record(client_order_id: &str) -> OrderRecord {
        OrderRecord {
            order_id: "1".to_string(),
            client_order_id: client_order_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            price: dec!(100),
            avg_price: dec!(100),
            executed_qty: dec!(1),
            commission: Decimal::ZERO,
            commission_asset: "USDT".to_string(),
            reduce_only: false,
            timestamp: chrono::Utc::now(),
            update_time: chrono::Utc::now(),
        }
    }

    fn new_runner(strategy: Box<dyn Strategy>, execution: Arc<dyn ExecutionPort>) -> Runner {
        let ws = Arc::new(WsManager::new(Arc::new(NoopConnector)));
        let market_data: Arc<dyn MarketDataPort> = Arc::new(NoopMarketData);
        let sizing = Arc::new(SizingEngine::new(SizingConfig::default()));
        let stats = Arc::new(StatisticsCache::new());
        Runner::new(test_ctx(), strategy, ws, market_data, execution, sizing, stats)
    }

    /// L2 / duplicate-order reconciliation: a `DuplicateClientOrderId`
    /// rejection is resolved by requerying the order instead of
    /// retrying or failing the tick.
    #[tokio::test]
    async fn place_with_retry_reconciles_duplicate_order_via_get_order() {
        let client_order_id = "s1-BTCUSDT-BUY-123".to_string();
        let existing = sample_order_record(&client_order_id);
        let execution = Arc::new(StubExecution {
            place_responses: StdMutex::new(VecDeque::from(vec![Err(
                ExchangeError::DuplicateClientOrderId {
                    client_order_id: client_order_id.clone(),
                },
            )])),
            get_order_response: existing.clone(),
            get_order_calls: AtomicUsize::new(0),
        });
        let strategy = Box::new(FakeStrategy {
            ctx: test_ctx(),
            state: StrategyRuntimeState::default(),
        });
        let runner = new_runner(strategy, execution.clone());

        let order = NewOrder {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(1),
            price: None,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            client_order_id: client_order_id.clone(),
        };

        let result = runner.place_with_retry(order).await.unwrap();
        assert_eq!(result.order_id, existing.order_id);
        assert_eq!(result.client_order_id, client_order_id);
        assert_eq!(execution.get_order_calls.load(Ordering::SeqCst), 1);
    }

    /// S6: a hot parameter swap preserves position, entry price, and
    /// last-processed close time, and never touches the execution port.
    #[tokio::test]
    async fn hot_param_swap_preserves_position_and_last_processed_close_time() {
        let mut state = StrategyRuntimeState::default();
        state.position = Some(PositionSide::Long);
        state.entry_price = Some(dec!(40000));
        let close_time = chrono::Utc::now();
        state.last_processed_close_time = Some(close_time);
        let strategy = Box::new(FakeStrategy {
            ctx: test_ctx(),
            state,
        });
        let execution = Arc::new(StubExecution {
            place_responses: StdMutex::new(VecDeque::new()),
            get_order_response: sample_order_record("unused"),
            get_order_calls: AtomicUsize::new(0),
        });
        let runner = new_runner(strategy, execution.clone());

        let mut new_config = EmaScalpingConfig::default();
        new_config.ema_fast = 5;
        new_config.ema_slow = 13;
        runner
            .update_params(|ctx| {
                Box::new(FakeStrategy {
                    ctx: StrategyContext {
                        params: StrategyParams::EmaScalping(new_config.clone()),
                        ..ctx.clone()
                    },
                    state: StrategyRuntimeState::default(),
                })
            })
            .await;

        let strategy_guard = runner.strategy.read().await;
        assert_eq!(strategy_guard.runtime_state().position, Some(PositionSide::Long));
        assert_eq!(strategy_guard.runtime_state().entry_price, Some(dec!(40000)));
        assert_eq!(
            strategy_guard.runtime_state().last_processed_close_time,
            Some(close_time)
        );
        assert_eq!(execution.get_order_calls.load(Ordering::SeqCst), 0);
    }
}
