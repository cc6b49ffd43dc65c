//! Auto-tune trigger (C13): an interface-only contract plus the
//! debounce bookkeeping a real trigger needs. The actual tuning
//! decision (performance screen, validation scoring, A/B gating) is an
//! external collaborator; this only gates *when* a tune may be applied
//! and records that it happened.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct PerformanceSnapshot {
    pub thirty_day_return_pct: Decimal,
    pub sharpe: Decimal,
    pub drawdown_pct: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub trade_count: u64,
}

#[derive(Debug, Clone)]
pub struct AutoTuneConfig {
    pub min_time_between_tuning_hours: i64,
    pub min_trades: u64,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        AutoTuneConfig {
            min_time_between_tuning_hours: 24,
            min_trades: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DebounceState {
    last_applied_at: Option<DateTime<Utc>>,
    total_trades: u64,
}

/// Per-strategy debounce gate. Holds no opinion on *what* new
/// parameters should be — only whether a tune attempt is allowed right
/// now.
pub struct AutoTuneTrigger {
    config: AutoTuneConfig,
    state: HashMap<String, DebounceState>,
}

impl AutoTuneTrigger {
    pub fn new(config: AutoTuneConfig) -> Self {
        AutoTuneTrigger {
            config,
            state: HashMap::new(),
        }
    }

    /// Pushed on every completed trade so the debounce gate has an
    /// up-to-date trade count without re-querying statistics.
    pub fn record_completed_trade(&mut self, strategy_id: &str) {
        self.state.entry(strategy_id.to_string()).or_default().total_trades += 1;
    }

    /// Pure given the recorded state plus `now` — refuses a tune
    /// within `min_time_between_tuning_hours` of the last applied
    /// change, or before `min_trades` have accumulated.
    pub fn should_tune_now(&self, strategy_id: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = self.state.get(strategy_id) else {
            return false;
        };
        if state.total_trades < self.config.min_trades {
            return false;
        }
        match state.last_applied_at {
            Some(last) => {
                let elapsed_hours = (now - last).num_hours();
                elapsed_hours >= self.config.min_time_between_tuning_hours
            }
            None => true,
        }
    }

    /// Records that a tune was actually applied, resetting the
    /// debounce clock.
    pub fn mark_tuned(&mut self, strategy_id: &str, now: DateTime<Utc>) {
        self.state.entry(strategy_id.to_string()).or_default().last_applied_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_until_min_trades_reached() {
        let mut trigger = AutoTuneTrigger::new(AutoTuneConfig {
            min_time_between_tuning_hours: 1,
            min_trades: 3,
        });
        trigger.record_completed_trade("s1");
        assert!(!trigger.should_tune_now("s1", Utc::now()));
        trigger.record_completed_trade("s1");
        trigger.record_completed_trade("s1");
        assert!(trigger.should_tune_now("s1", Utc::now()));
    }

    #[test]
    fn refuses_within_debounce_window_after_applying() {
        let mut trigger = AutoTuneTrigger::new(AutoTuneConfig {
            min_time_between_tuning_hours: 24,
            min_trades: 1,
        });
        trigger.record_completed_trade("s1");
        let now = Utc::now();
        trigger.mark_tuned("s1", now);
        assert!(!trigger.should_tune_now("s1", now + chrono::Duration::hours(1)));
        assert!(trigger.should_tune_now("s1", now + chrono::Duration::hours(25)));
    }

    #[test]
    fn unknown_strategy_is_never_tunable() {
        let trigger = AutoTuneTrigger::new(AutoTuneConfig::default());
        assert!(!trigger.should_tune_now("unknown", Utc::now()));
    }
}
