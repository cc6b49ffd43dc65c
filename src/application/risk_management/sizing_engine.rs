//! Risk sizer (C7): base notional sizing plus three clamped,
//! multiplicative adjustments applied in a fixed order.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::domain::errors::PositionSizingError;
use crate::domain::indicators::{self, Bar};

const ADJUSTMENT_MIN: Decimal = dec!(0.5);
const ADJUSTMENT_MAX: Decimal = dec!(2.0);

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub atr_period: usize,
    pub atr_multiplier: Decimal,
    pub win_boost: Decimal,
    pub max_win_boost: Decimal,
    pub loss_reduction: Decimal,
    pub max_loss_reduction: Decimal,
    pub min_trades_for_kelly: u32,
    pub kelly_fraction: Decimal,
    pub max_kelly_position_pct: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            atr_period: 14,
            atr_multiplier: Decimal::ONE,
            win_boost: dec!(0.1),
            max_win_boost: dec!(0.3),
            loss_reduction: dec!(0.1),
            max_loss_reduction: dec!(0.3),
            min_trades_for_kelly: 100,
            kelly_fraction: dec!(0.25),
            max_kelly_position_pct: dec!(0.10),
        }
    }
}

/// Per-strategy running win/loss streak and average P&L, used by the
/// performance-streak and fractional-Kelly adjustments.
#[derive(Debug, Clone, Default)]
pub struct TradePerformance {
    wins: u32,
    losses: u32,
    win_streak: u32,
    loss_streak: u32,
    total_win_pnl: Decimal,
    total_loss_pnl: Decimal,
}

impl TradePerformance {
    pub fn total_trades(&self) -> u32 {
        self.wins + self.losses
    }

    fn avg_win(&self) -> Decimal {
        if self.wins == 0 {
            Decimal::ZERO
        } else {
            self.total_win_pnl / Decimal::from(self.wins)
        }
    }

    fn avg_loss(&self) -> Decimal {
        if self.losses == 0 {
            Decimal::ZERO
        } else {
            self.total_loss_pnl / Decimal::from(self.losses)
        }
    }

    fn win_rate(&self) -> Decimal {
        let total = self.total_trades();
        if total == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(total)
        }
    }

    fn record(&mut self, pnl: Decimal, is_win: bool) {
        if is_win {
            self.wins += 1;
            self.win_streak += 1;
            self.loss_streak = 0;
            self.total_win_pnl += pnl.abs();
        } else {
            self.losses += 1;
            self.loss_streak += 1;
            self.win_streak = 0;
            self.total_loss_pnl += pnl.abs();
        }
    }
}

pub struct SizingEngine {
    config: SizingConfig,
    performance: RwLock<HashMap<String, TradePerformance>>,
}

impl SizingEngine {
    pub fn new(config: SizingConfig) -> Self {
        SizingEngine {
            config,
            performance: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_trade(&self, strategy_id: &str, pnl: Decimal, is_win: bool) {
        let mut guard = self.performance.write().unwrap();
        guard.entry(strategy_id.to_string()).or_default().record(pnl, is_win);
    }

    /// How many recent closed bars a caller needs to fetch for the ATR
    /// adjustment to have a chance of firing.
    pub fn atr_lookback(&self) -> usize {
        self.config.atr_period + 1
    }

    /// Base notional sizing plus the three clamped adjustments, in
    /// the documented order: ATR scaling, performance streak,
    /// fractional Kelly.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_quantity(
        &self,
        risk_per_trade: Decimal,
        price: Decimal,
        fixed_amount: Option<Decimal>,
        strategy_id: Option<&str>,
        recent_bars: &[Bar],
        equity: Decimal,
        min_notional: Decimal,
        quantity_precision: u32,
    ) -> Result<(Decimal, Decimal), PositionSizingError> {
        if equity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(PositionSizingError::InvalidInputs);
        }

        let mut notional = fixed_amount.unwrap_or(equity * risk_per_trade);

        if let Some(adj) = self.atr_adjustment(price, recent_bars) {
            notional *= adj;
            info!(adjustment = %adj, "applied ATR sizing adjustment");
        }

        if let Some(id) = strategy_id {
            let adj = self.performance_adjustment(id);
            notional *= adj;
            info!(strategy_id = id, adjustment = %adj, "applied performance streak adjustment");

            if let Some(kelly_notional) = self.kelly_adjustment(id, equity) {
                notional = notional.min(kelly_notional);
                info!(strategy_id = id, kelly_cap = %kelly_notional, "applied fractional Kelly cap");
            }
        }

        let quantity = (notional / price).round_dp(quantity_precision);
        let final_notional = quantity * price;

        if final_notional < min_notional {
            return Err(PositionSizingError::BelowMinNotional {
                symbol: String::new(),
                notional: final_notional,
                min_notional,
            });
        }

        Ok((quantity, final_notional))
    }

    fn atr_adjustment(&self, price: Decimal, recent_bars: &[Bar]) -> Option<Decimal> {
        let atr_value = indicators::atr(recent_bars, self.config.atr_period)?;
        if atr_value <= 0.0 {
            return None;
        }
        let atr_decimal = Decimal::from_f64_retain(atr_value)?;
        let raw = (dec!(0.01) * price / atr_decimal) * self.config.atr_multiplier;
        Some(clamp(raw))
    }

    fn performance_adjustment(&self, strategy_id: &str) -> Decimal {
        let guard = self.performance.read().unwrap();
        let Some(perf) = guard.get(strategy_id) else {
            return Decimal::ONE;
        };
        let win_component = (Decimal::from(perf.win_streak) * self.config.win_boost)
            .min(self.config.max_win_boost);
        let loss_component = (Decimal::from(perf.loss_streak) * self.config.loss_reduction)
            .min(self.config.max_loss_reduction);
        let adj = Decimal::ONE + win_component - loss_component;
        adj.max(dec!(0.5)).min(dec!(1.5))
    }

    fn kelly_adjustment(&self, strategy_id: &str, equity: Decimal) -> Option<Decimal> {
        let guard = self.performance.read().unwrap();
        let perf = guard.get(strategy_id)?;
        if perf.total_trades() < self.config.min_trades_for_kelly || perf.wins == 0 || perf.losses == 0 {
            return None;
        }
        let avg_win = perf.avg_win();
        let avg_loss = perf.avg_loss();
        if avg_loss <= Decimal::ZERO {
            return None;
        }
        let b = avg_win / avg_loss;
        let p = perf.win_rate();
        let kelly = ((p * b - (Decimal::ONE - p)) / b).max(Decimal::ZERO);
        let fraction = kelly * self.config.kelly_fraction;
        Some(equity * self.config.max_kelly_position_pct.min(fraction))
    }
}

fn clamp(value: Decimal) -> Decimal {
    value.max(ADJUSTMENT_MIN).min(ADJUSTMENT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar { high, low, close, volume: 0.0 }
    }

    #[test]
    fn base_sizing_uses_fixed_amount_when_given() {
        let engine = SizingEngine::new(SizingConfig::default());
        let (qty, notional) = engine
            .calculate_quantity(dec!(0.02), dec!(100), Some(dec!(1000)), None, &[], dec!(10000), dec!(5), 3)
            .unwrap();
        assert_eq!(notional, dec!(1000));
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn base_sizing_uses_equity_times_risk_without_fixed_amount() {
        let engine = SizingEngine::new(SizingConfig::default());
        let (_, notional) = engine
            .calculate_quantity(dec!(0.01), dec!(100), None, None, &[], dec!(10000), dec!(5), 3)
            .unwrap();
        assert_eq!(notional, dec!(100));
    }

    #[test]
    fn below_min_notional_is_rejected() {
        let engine = SizingEngine::new(SizingConfig::default());
        let result = engine.calculate_quantity(dec!(0.0001), dec!(100), None, None, &[], dec!(10000), dec!(5), 3);
        assert!(result.is_err());
    }

    #[test]
    fn performance_adjustment_boosts_on_win_streak() {
        let engine = SizingEngine::new(SizingConfig::default());
        engine.record_trade("s1", dec!(10), true);
        engine.record_trade("s1", dec!(10), true);
        let adj = engine.performance_adjustment("s1");
        assert!(adj > Decimal::ONE);
    }

    #[test]
    fn performance_adjustment_reduces_on_loss_streak() {
        let engine = SizingEngine::new(SizingConfig::default());
        engine.record_trade("s1", dec!(-10), false);
        engine.record_trade("s1", dec!(-10), false);
        let adj = engine.performance_adjustment("s1");
        assert!(adj < Decimal::ONE);
    }

    #[test]
    fn kelly_adjustment_requires_minimum_trades() {
        let engine = SizingEngine::new(SizingConfig::default());
        engine.record_trade("s1", dec!(10), true);
        engine.record_trade("s1", dec!(-5), false);
        assert!(engine.kelly_adjustment("s1", dec!(10000)).is_none());
    }

    #[test]
    fn atr_adjustment_is_clamped() {
        let engine = SizingEngine::new(SizingConfig::default());
        let bars: Vec<Bar> = (0..20).map(|_| bar(100.001, 99.999, 100.0)).collect();
        let adj = engine.atr_adjustment(dec!(100), &bars).unwrap();
        assert!(adj <= ADJUSTMENT_MAX && adj >= ADJUSTMENT_MIN);
    }
}
