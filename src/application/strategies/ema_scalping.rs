//! EMA crossover scalping strategy (C9a).

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::application::strategies::traits::{MarketView, Strategy};
use crate::domain::errors::ExchangeError;
use crate::domain::indicators;
use crate::domain::kline::{Action, PositionSide, Signal, StrategyContext, StrategyRuntimeState};
use crate::domain::strategy_params::EmaScalpingConfig;
use crate::domain::trailing_stop::{ExitReason, TrailingStop};

const HTF_LOOKBACK_EXTRA: usize = 10;
const MIN_KLINE_LIMIT: usize = 50;

pub struct EmaScalpingStrategy {
    ctx: StrategyContext,
    config: EmaScalpingConfig,
    state: StrategyRuntimeState,
}

impl EmaScalpingStrategy {
    pub fn new(ctx: StrategyContext, config: EmaScalpingConfig) -> Self {
        EmaScalpingStrategy {
            ctx,
            config,
            state: StrategyRuntimeState::default(),
        }
    }

    fn kline_limit(&self) -> usize {
        (self.config.ema_slow + HTF_LOOKBACK_EXTRA).max(MIN_KLINE_LIMIT)
    }

    fn htf_interval(&self) -> &'static str {
        match self.config.kline_interval.as_str() {
            "1m" => "5m",
            "5m" => "15m",
            "15m" => "1h",
            _ => "5m",
        }
    }

    /// Checks TP/SL against `live_price` for the position currently
    /// held, honoring the entry-candle block on fixed levels. Returns
    /// `Some(reason)` on exit.
    fn check_exit(&mut self, live_price: Decimal, close_time: chrono::DateTime<chrono::Utc>) -> Option<&'static str> {
        let side = self.state.position?;
        let entry_price = self.state.entry_price?;
        let on_entry_candle = self.state.entry_candle_close_time == Some(close_time);

        if let Some(trailing) = self.state.trailing_stop.as_mut() {
            trailing.update(live_price);
            if let Some(reason) = trailing.check_exit(live_price) {
                return Some(match reason {
                    ExitReason::TakeProfit => "TRAILING_TAKE_PROFIT",
                    ExitReason::StopLoss => "TRAILING_STOP_LOSS",
                });
            }
            return None;
        }

        if on_entry_candle {
            return None;
        }

        let (tp, sl) = match side {
            PositionSide::Long => (
                entry_price * (Decimal::ONE + self.config.take_profit_pct),
                entry_price * (Decimal::ONE - self.config.stop_loss_pct),
            ),
            PositionSide::Short => (
                entry_price * (Decimal::ONE - self.config.take_profit_pct),
                entry_price * (Decimal::ONE + self.config.stop_loss_pct),
            ),
        };

        match side {
            PositionSide::Long if live_price <= sl => Some("STOP_LOSS"),
            PositionSide::Long if live_price >= tp => Some("TP"),
            PositionSide::Short if live_price >= sl => Some("STOP_LOSS"),
            PositionSide::Short if live_price <= tp => Some("TP"),
            _ => None,
        }
    }

    fn exit_signal(&mut self, live_price: Decimal, reason: &str) -> Signal {
        let side = self.state.position;
        self.state.clear_position();
        self.state.cooldown_left = self.config.cooldown_candles;
        Signal {
            action: Action::Close,
            symbol: self.ctx.symbol.clone(),
            confidence: 1.0,
            price: Some(live_price),
            exit_reason: Some(reason.to_string()),
            position_side: side,
        }
    }
}

#[async_trait]
impl Strategy for EmaScalpingStrategy {
    fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    fn runtime_state(&self) -> &StrategyRuntimeState {
        &self.state
    }

    fn sync_position_state(&mut self, side: Option<PositionSide>, entry_price: Option<Decimal>) {
        match (side, entry_price) {
            (Some(side), Some(entry)) => {
                if self.state.position != Some(side) || self.state.entry_price != Some(entry) {
                    info!(symbol = %self.ctx.symbol, ?side, %entry, "reconciling runtime state to exchange position");
                }
                self.state.position = Some(side);
                self.state.entry_price = Some(entry);
            }
            _ => {
                if self.state.position.is_some() {
                    info!(symbol = %self.ctx.symbol, "exchange reports flat, resetting runtime state");
                    self.state.clear_position();
                    self.state.cooldown_left = self.config.cooldown_candles;
                }
            }
        }
    }

    fn restore_runtime_state(&mut self, state: StrategyRuntimeState) {
        self.state = state;
    }

    async fn evaluate(&mut self, view: &dyn MarketView) -> Result<Signal, ExchangeError> {
        let limit = self.kline_limit();
        let klines = view
            .recent_closed_klines(&self.ctx.symbol, &self.config.kline_interval, limit)
            .await?;
        let Some(last_closed) = klines.last() else {
            return Ok(Signal::hold(&self.ctx.symbol));
        };
        let close_time = last_closed.close_time;
        let live_price = view.live_price(&self.ctx.symbol).await?;

        let is_older = self
            .state
            .last_processed_close_time
            .is_some_and(|t| close_time < t);
        let is_duplicate = self.state.last_processed_close_time == Some(close_time);

        if is_older {
            let saved_entry_candle = self.state.entry_candle_close_time.take();
            let exit = self.check_exit(live_price, close_time);
            self.state.entry_candle_close_time = saved_entry_candle;
            return Ok(match exit {
                Some(reason) => self.exit_signal(live_price, reason),
                None => Signal::hold(&self.ctx.symbol),
            });
        }
        if is_duplicate {
            return Ok(match self.check_exit(live_price, close_time) {
                Some(reason) => self.exit_signal(live_price, reason),
                None => Signal::hold(&self.ctx.symbol),
            });
        }

        self.state.last_processed_close_time = Some(close_time);

        let closes: Vec<f64> = klines.iter().filter_map(|k| k.close.to_f64()).collect();
        let fast_ema = indicators::ema(&closes, self.config.ema_fast);
        let slow_ema = indicators::ema(&closes, self.config.ema_slow);
        let (Some(fast), Some(slow)) = (fast_ema, slow_ema) else {
            return Ok(Signal::hold(&self.ctx.symbol));
        };
        let prev_fast = self.state.prev_fast_ema;
        let prev_slow = self.state.prev_slow_ema;

        if self.state.cooldown_left > 0 {
            self.state.cooldown_left -= 1;
            self.state.prev_fast_ema = Some(fast);
            self.state.prev_slow_ema = Some(slow);
            return Ok(Signal::hold(&self.ctx.symbol));
        }

        if let Some(reason) = self.check_exit(live_price, close_time) {
            let signal = self.exit_signal(live_price, reason);
            self.state.prev_fast_ema = Some(fast);
            self.state.prev_slow_ema = Some(slow);
            return Ok(signal);
        }

        let separation_price = if live_price.is_zero() { last_closed.close } else { live_price };
        let separation = (Decimal::from_f64_retain(fast).unwrap_or_default()
            - Decimal::from_f64_retain(slow).unwrap_or_default())
        .abs()
            / separation_price;
        let separation_ok = separation >= self.config.min_ema_separation;

        let Some((pf, ps)) = prev_fast.zip(prev_slow) else {
            self.state.prev_fast_ema = Some(fast);
            self.state.prev_slow_ema = Some(slow);
            return Ok(Signal::hold(&self.ctx.symbol));
        };

        let golden_cross = pf <= ps && fast > slow;
        let death_cross = pf >= ps && fast < slow;

        let mut signal = Signal::hold(&self.ctx.symbol);

        if golden_cross && self.state.is_flat() && separation_ok {
            self.state.open_position(PositionSide::Long, last_closed.close, close_time);
            if self.config.trailing_stop_enabled {
                self.state.trailing_stop = Some(TrailingStop::new(
                    PositionSide::Long,
                    last_closed.close,
                    self.config.take_profit_pct,
                    self.config.stop_loss_pct,
                    self.config.trailing_stop_activation_pct,
                ));
            }
            signal = Signal {
                action: Action::Buy,
                symbol: self.ctx.symbol.clone(),
                confidence: 1.0,
                price: Some(last_closed.close),
                exit_reason: None,
                position_side: Some(PositionSide::Long),
            };
        } else if death_cross
            && self.state.position == Some(PositionSide::Long)
            && self.config.enable_ema_cross_exit
            && self.state.entry_candle_close_time != Some(close_time)
        {
            signal = self.exit_signal(live_price, "EMA_DEATH_CROSS");
        } else if death_cross && self.state.is_flat() && self.config.enable_short && separation_ok {
            let mut allow_short = true;
            if self.config.enable_htf_bias {
                let htf_interval = self.htf_interval();
                match view
                    .recent_closed_klines(&self.ctx.symbol, htf_interval, self.kline_limit())
                    .await
                {
                    Ok(htf_klines) if htf_klines.len() >= self.config.ema_slow => {
                        let htf_closes: Vec<f64> =
                            htf_klines.iter().filter_map(|k| k.close.to_f64()).collect();
                        let htf_fast = indicators::ema(&htf_closes, self.config.ema_fast);
                        let htf_slow = indicators::ema(&htf_closes, self.config.ema_slow);
                        allow_short = matches!((htf_fast, htf_slow), (Some(f), Some(s)) if f < s);
                    }
                    _ => {
                        warn!(symbol = %self.ctx.symbol, "insufficient HTF data, failing closed on short entry");
                        allow_short = false;
                    }
                }
            }
            if allow_short {
                self.state.open_position(PositionSide::Short, last_closed.close, close_time);
                if self.config.trailing_stop_enabled {
                    self.state.trailing_stop = Some(TrailingStop::new(
                        PositionSide::Short,
                        last_closed.close,
                        self.config.take_profit_pct,
                        self.config.stop_loss_pct,
                        self.config.trailing_stop_activation_pct,
                    ));
                }
                signal = Signal {
                    action: Action::Sell,
                    symbol: self.ctx.symbol.clone(),
                    confidence: 1.0,
                    price: Some(last_closed.close),
                    exit_reason: None,
                    position_side: Some(PositionSide::Short),
                };
            }
        } else if golden_cross
            && self.state.position == Some(PositionSide::Short)
            && self.config.enable_ema_cross_exit
            && self.state.entry_candle_close_time != Some(close_time)
        {
            signal = self.exit_signal(live_price, "EMA_GOLDEN_CROSS");
        }

        let trend_strength = indicators::market_structure(
            &klines.iter().filter_map(|k| k.high.to_f64()).collect::<Vec<_>>(),
            &klines.iter().filter_map(|k| k.low.to_f64()).collect::<Vec<_>>(),
            5,
        )
        .map(|s| s.structure);
        debug!(
            symbol = %self.ctx.symbol,
            fast,
            slow,
            ?trend_strength,
            action = ?signal.action,
            "ema scalping evaluation"
        );
        self.state.prev_fast_ema = Some(fast);
        self.state.prev_slow_ema = Some(slow);
        Ok(signal)
    }
}
