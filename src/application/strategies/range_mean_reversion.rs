//! Range mean-reversion strategy (C9b).

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::application::strategies::traits::{MarketView, Strategy};
use crate::domain::errors::ExchangeError;
use crate::domain::indicators::{self, Bar};
use crate::domain::kline::{Action, PositionSide, Signal, StrategyContext, StrategyRuntimeState};
use crate::domain::strategy_params::{RangeConfig, RANGE_WIDTH_GUARD_MULTIPLIER};

pub struct RangeMeanReversionStrategy {
    ctx: StrategyContext,
    config: RangeConfig,
    state: StrategyRuntimeState,
}

impl RangeMeanReversionStrategy {
    pub fn new(ctx: StrategyContext, config: RangeConfig) -> Self {
        RangeMeanReversionStrategy {
            ctx,
            config,
            state: StrategyRuntimeState::default(),
        }
    }

    /// Attempts to detect a valid range over the last `lookback_period`
    /// closed candles. Returns `None` if the data looks trending
    /// rather than ranging, or ATR is unavailable.
    fn detect_range(&self, klines: &[crate::domain::kline::Kline]) -> Option<(Decimal, Decimal, Decimal)> {
        if klines.len() < self.config.lookback_period {
            return None;
        }
        let window = &klines[klines.len() - self.config.lookback_period..];
        let range_high = window.iter().map(|k| k.high).max()?;
        let range_low = window.iter().map(|k| k.low).min()?;
        let range_size = range_high - range_low;

        let bars: Vec<Bar> = window
            .iter()
            .map(|k| Bar {
                high: k.high.to_f64().unwrap_or_default(),
                low: k.low.to_f64().unwrap_or_default(),
                close: k.close.to_f64().unwrap_or_default(),
                volume: k.volume.to_f64().unwrap_or_default(),
            })
            .collect();
        let atr_value = indicators::atr(&bars, 14)?;
        let atr_decimal = Decimal::from_f64_retain(atr_value)?;
        if range_size > atr_decimal * self.config.max_atr_multiplier * RANGE_WIDTH_GUARD_MULTIPLIER {
            return None;
        }

        let closes: Vec<f64> = window.iter().filter_map(|k| k.close.to_f64()).collect();
        let fast = indicators::ema(&closes, self.config.ema_fast_period)?;
        let slow = indicators::ema(&closes, self.config.ema_slow_period)?;
        let last_close = window.last()?.close;
        let spread = (Decimal::from_f64_retain(fast)? - Decimal::from_f64_retain(slow)?).abs() / last_close;
        if spread > self.config.max_ema_spread_pct {
            return None;
        }

        let range_mid = (range_high + range_low) / Decimal::from(2);
        Some((range_high, range_low, range_mid))
    }

    fn update_range_state(&mut self, klines: &[crate::domain::kline::Kline]) {
        match self.detect_range(klines) {
            Some((high, low, mid)) => {
                self.state.range_high = Some(high);
                self.state.range_low = Some(low);
                self.state.range_mid = Some(mid);
                self.state.range_valid = true;
                self.state.range_invalid_count = 0;
            }
            None => {
                self.state.range_invalid_count += 1;
                if self.state.range_invalid_count >= self.config.max_range_invalid_candles {
                    if self.state.is_flat() {
                        self.state.range_high = None;
                        self.state.range_low = None;
                        self.state.range_mid = None;
                        self.state.range_valid = false;
                    }
                    self.state.range_invalid_count = 0;
                }
            }
        }
    }

    fn check_exit(&mut self, live_price: Decimal, close_time: chrono::DateTime<chrono::Utc>) -> Option<&'static str> {
        let side = self.state.position?;
        let (high, low, mid) = (self.state.range_high?, self.state.range_low?, self.state.range_mid?);
        let range_size = high - low;
        let on_entry_candle = self.state.entry_candle_close_time == Some(close_time);

        match side {
            PositionSide::Long => {
                let sl = low - range_size * self.config.sl_buffer_pct;
                let tp2 = high - range_size * self.config.tp_buffer_pct;
                if live_price <= sl {
                    return Some("RANGE_STOP_LOSS");
                }
                if on_entry_candle {
                    return None;
                }
                if live_price >= tp2 {
                    return Some("RANGE_TAKE_PROFIT_2");
                }
                if live_price >= mid {
                    return Some("TP_RANGE_MID");
                }
            }
            PositionSide::Short => {
                let sl = high + range_size * self.config.sl_buffer_pct;
                let tp2 = low + range_size * self.config.tp_buffer_pct;
                if live_price >= sl {
                    return Some("RANGE_STOP_LOSS");
                }
                if on_entry_candle {
                    return None;
                }
                if live_price <= tp2 {
                    return Some("RANGE_TAKE_PROFIT_2");
                }
                if live_price <= mid {
                    return Some("TP_RANGE_MID");
                }
            }
        }
        None
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
impl Strategy for RangeMeanReversionStrategy {
    fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    fn runtime_state(&self) -> &StrategyRuntimeState {
        &self.state
    }

    fn sync_position_state(&mut self, side: Option<PositionSide>, entry_price: Option<Decimal>) {
        match (side, entry_price) {
            (Some(side), Some(entry)) => {
                self.state.position = Some(side);
                self.state.entry_price = Some(entry);
            }
            _ => {
                if self.state.position.is_some() {
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
        let klines = view
            .recent_closed_klines(&self.ctx.symbol, &self.config.kline_interval, self.config.lookback_period + 5)
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

        if is_older || is_duplicate {
            return Ok(match self.check_exit(live_price, close_time) {
                Some(reason) => self.exit_signal(live_price, reason),
                None => Signal::hold(&self.ctx.symbol),
            });
        }
        self.state.last_processed_close_time = Some(close_time);

        self.update_range_state(&klines);

        if let Some(reason) = self.check_exit(live_price, close_time) {
            return Ok(self.exit_signal(live_price, reason));
        }

        if self.state.cooldown_left > 0 {
            self.state.cooldown_left -= 1;
            return Ok(Signal::hold(&self.ctx.symbol));
        }

        if !self.state.range_valid || !self.state.is_flat() {
            return Ok(Signal::hold(&self.ctx.symbol));
        }

        let (high, low) = (self.state.range_high.unwrap(), self.state.range_low.unwrap());
        let range_size = high - low;
        let closes: Vec<f64> = klines.iter().filter_map(|k| k.close.to_f64()).collect();
        let Some(rsi_value) = indicators::rsi(&closes, self.config.rsi_period) else {
            return Ok(Signal::hold(&self.ctx.symbol));
        };
        let rsi_decimal = Decimal::from_f64_retain(rsi_value).unwrap_or(Decimal::from(50));

        let buy_zone_upper = low + range_size * self.config.buy_zone_pct;
        let sell_zone_lower = high - range_size * self.config.sell_zone_pct;

        let mut signal = Signal::hold(&self.ctx.symbol);
        if live_price <= buy_zone_upper && rsi_decimal < self.config.rsi_oversold {
            self.state.open_position(PositionSide::Long, last_closed.close, close_time);
            signal = Signal {
                action: Action::Buy,
                symbol: self.ctx.symbol.clone(),
                confidence: 1.0,
                price: Some(last_closed.close),
                exit_reason: None,
                position_side: Some(PositionSide::Long),
            };
        } else if self.config.enable_short
            && live_price >= sell_zone_lower
            && rsi_decimal > self.config.rsi_overbought
        {
            self.state.open_position(PositionSide::Short, last_closed.close, close_time);
            signal = Signal {
                action: Action::Sell,
                symbol: self.ctx.symbol.clone(),
                confidence: 1.0,
                price: Some(last_closed.close),
                exit_reason: None,
                position_side: Some(PositionSide::Short),
            };
        }

        debug!(symbol = %self.ctx.symbol, rsi = rsi_value, action = ?signal.action, "range evaluation");
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn kline_hlc(high: Decimal, low: Decimal, close: Decimal, close_time: chrono::DateTime<chrono::Utc>) -> crate::domain::kline::Kline {
        crate::domain::kline::Kline {
            open_time: close_time,
            open: close,
            high,
            low,
            close,
            volume: dec!(10),
            close_time,
            trade_count: 1,
            taker_buy_volume: dec!(5),
        }
    }

    fn test_ctx() -> StrategyContext {
        StrategyContext {
            id: "s2".to_string(),
            name: "range".to_string(),
            symbol: "BTCUSDT".to_string(),
            leverage: 3,
            risk_per_trade: dec!(0.01),
            params: crate::domain::kline::StrategyParams::RangeMeanReversion(RangeConfig::default()),
            interval_seconds: 300,
        }
    }

    struct MockView {
        klines: Mutex<Vec<crate::domain::kline::Kline>>,
        live_price: Mutex<Decimal>,
    }

    impl MockView {
        fn new(klines: Vec<crate::domain::kline::Kline>, price: Decimal) -> Self {
            MockView {
                klines: Mutex::new(klines),
                live_price: Mutex::new(price),
            }
        }
    }

    #[async_trait]
    impl MarketView for MockView {
        async fn recent_closed_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<crate::domain::kline::Kline>, ExchangeError> {
            Ok(self.klines.lock().unwrap().clone())
        }

        async fn live_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(*self.live_price.lock().unwrap())
        }
    }

    #[test]
    fn detect_range_accepts_a_tight_sideways_band() {
        let strategy = RangeMeanReversionStrategy::new(test_ctx(), RangeConfig::default());
        let start = chrono::Utc::now();
        let window: Vec<_> = (0..strategy.config.lookback_period)
            .map(|i| kline_hlc(dec!(40250), dec!(39750), dec!(40000), start + chrono::Duration::minutes(i as i64)))
            .collect();

        let (high, low, mid) = strategy.detect_range(&window).expect("tight band should validate");
        assert_eq!(high, dec!(40250));
        assert_eq!(low, dec!(39750));
        assert_eq!(mid, dec!(40000));
    }

    #[test]
    fn detect_range_rejects_insufficient_history() {
        let strategy = RangeMeanReversionStrategy::new(test_ctx(), RangeConfig::default());
        let start = chrono::Utc::now();
        let window: Vec<_> = (0..10)
            .map(|i| kline_hlc(dec!(40250), dec!(39750), dec!(40000), start + chrono::Duration::minutes(i)))
            .collect();
        assert!(strategy.detect_range(&window).is_none());
    }

    #[tokio::test]
    async fn long_position_exits_at_range_mid_after_the_entry_candle() {
        let mut strategy = RangeMeanReversionStrategy::new(test_ctx(), RangeConfig::default());
        let t_before = chrono::Utc::now() - chrono::Duration::minutes(5);
        let t_new = chrono::Utc::now();

        strategy.state.position = Some(PositionSide::Long);
        strategy.state.entry_price = Some(dec!(39800));
        strategy.state.entry_candle_close_time = Some(t_before);
        strategy.state.last_processed_close_time = Some(t_before);
        strategy.state.range_high = Some(dec!(40250));
        strategy.state.range_low = Some(dec!(39750));
        strategy.state.range_mid = Some(dec!(40000));
        strategy.state.range_valid = true;

        let view = MockView::new(
            vec![kline_hlc(dec!(40250), dec!(39750), dec!(40000), t_new)],
            dec!(40000),
        );
        let signal = strategy.evaluate(&view).await.unwrap();
        assert_eq!(signal.action, Action::Close);
        assert_eq!(signal.exit_reason.as_deref(), Some("TP_RANGE_MID"));
        assert!(strategy.runtime_state().position.is_none());
    }

    #[tokio::test]
    async fn entry_candle_blocks_take_profit_but_not_stop_loss() {
        let t_before = chrono::Utc::now() - chrono::Duration::minutes(5);
        let t_entry = chrono::Utc::now();

        let mut blocks_tp = RangeMeanReversionStrategy::new(test_ctx(), RangeConfig::default());
        blocks_tp.state.position = Some(PositionSide::Long);
        blocks_tp.state.entry_price = Some(dec!(39800));
        blocks_tp.state.entry_candle_close_time = Some(t_entry);
        blocks_tp.state.last_processed_close_time = Some(t_before);
        blocks_tp.state.range_high = Some(dec!(40250));
        blocks_tp.state.range_low = Some(dec!(39750));
        blocks_tp.state.range_mid = Some(dec!(40000));
        blocks_tp.state.range_valid = true;

        let view = MockView::new(
            vec![kline_hlc(dec!(40250), dec!(39750), dec!(40000), t_entry)],
            dec!(40000),
        );
        let signal = blocks_tp.evaluate(&view).await.unwrap();
        assert_eq!(signal.action, Action::Hold);
        assert_eq!(blocks_tp.runtime_state().position, Some(PositionSide::Long));

        let mut allows_sl = RangeMeanReversionStrategy::new(test_ctx(), RangeConfig::default());
        allows_sl.state.position = Some(PositionSide::Long);
        allows_sl.state.entry_price = Some(dec!(39800));
        allows_sl.state.entry_candle_close_time = Some(t_entry);
        allows_sl.state.last_processed_close_time = Some(t_before);
        allows_sl.state.range_high = Some(dec!(40250));
        allows_sl.state.range_low = Some(dec!(39750));
        allows_sl.state.range_mid = Some(dec!(40000));
        allows_sl.state.range_valid = true;

        let view = MockView::new(
            vec![kline_hlc(dec!(40250), dec!(39750), dec!(40000), t_entry)],
            dec!(39700),
        );
        let signal = allows_sl.evaluate(&view).await.unwrap();
        assert_eq!(signal.action, Action::Close);
        assert_eq!(signal.exit_reason.as_deref(), Some("RANGE_STOP_LOSS"));
    }

    #[tokio::test]
    async fn external_close_reconciles_runtime_state_to_flat() {
        let mut config = RangeConfig::default();
        config.cooldown_candles = 4;
        let mut strategy = RangeMeanReversionStrategy::new(test_ctx(), config);
        strategy.state.position = Some(PositionSide::Long);
        strategy.state.entry_price = Some(dec!(40000));
        strategy.state.entry_candle_close_time = Some(chrono::Utc::now());
        strategy.state.range_high = Some(dec!(40250));
        strategy.state.range_low = Some(dec!(39750));
        strategy.state.range_mid = Some(dec!(40000));

        strategy.sync_position_state(None, None);

        assert!(strategy.runtime_state().position.is_none());
        assert!(strategy.runtime_state().entry_price.is_none());
        assert_eq!(strategy.runtime_state().cooldown_left, 4);
    }
}
