//! Ratcheting take-profit/stop-loss pair with an optional activation
//! threshold, tracked per open position.
//!
//! Pure state machine, no I/O — generalizes the teacher's ATR-anchored
//! `StopState` to percentage-based dual TP/SL levels that only ever
//! move in the position's favor once activated.

use rust_decimal::Decimal;

use crate::domain::kline::PositionSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

/// One real ratchet of the trailing levels, worth a trace event.
#[derive(Debug, Clone, Copy)]
pub struct TrailUpdate {
    pub best_price: Decimal,
    pub new_tp: Decimal,
    pub new_sl: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct TrailingStop {
    side: PositionSide,
    entry_price: Decimal,
    take_profit_pct: Decimal,
    stop_loss_pct: Decimal,
    activation_pct: Decimal,
    best_price: Decimal,
    current_tp: Decimal,
    current_sl: Decimal,
    activated: bool,
}

impl TrailingStop {
    pub fn new(
        side: PositionSide,
        entry_price: Decimal,
        take_profit_pct: Decimal,
        stop_loss_pct: Decimal,
        activation_pct: Decimal,
    ) -> Self {
        let (tp, sl) = Self::levels_from(side, entry_price, take_profit_pct, stop_loss_pct);
        TrailingStop {
            side,
            entry_price,
            take_profit_pct,
            stop_loss_pct,
            activation_pct,
            best_price: entry_price,
            current_tp: tp,
            current_sl: sl,
            activated: activation_pct.is_zero(),
        }
    }

    fn levels_from(
        side: PositionSide,
        anchor: Decimal,
        tp_pct: Decimal,
        sl_pct: Decimal,
    ) -> (Decimal, Decimal) {
        match side {
            PositionSide::Long => (anchor * (Decimal::ONE + tp_pct), anchor * (Decimal::ONE - sl_pct)),
            PositionSide::Short => (anchor * (Decimal::ONE - tp_pct), anchor * (Decimal::ONE + sl_pct)),
        }
    }

    fn activation_price(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.entry_price * (Decimal::ONE + self.activation_pct),
            PositionSide::Short => self.entry_price * (Decimal::ONE - self.activation_pct),
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn take_profit(&self) -> Decimal {
        self.current_tp
    }

    pub fn stop_loss(&self) -> Decimal {
        self.current_sl
    }

    pub fn best_price(&self) -> Decimal {
        self.best_price
    }

    /// Ratchets TP/SL toward the given price if it improves on the
    /// current best; activates the trail first if the activation
    /// price has been reached. Returns `Some` only on a real ratchet.
    pub fn update(&mut self, price: Decimal) -> Option<TrailUpdate> {
        if !self.activated {
            let reached = match self.side {
                PositionSide::Long => price >= self.activation_price(),
                PositionSide::Short => price <= self.activation_price(),
            };
            if reached {
                self.activated = true;
            } else {
                return None;
            }
        }

        let improves = match self.side {
            PositionSide::Long => price > self.best_price,
            PositionSide::Short => price < self.best_price,
        };
        if !improves {
            return None;
        }

        self.best_price = price;
        let (tp, sl) = Self::levels_from(
            self.side,
            self.best_price,
            self.take_profit_pct,
            self.stop_loss_pct,
        );
        self.current_tp = tp;
        self.current_sl = sl;
        Some(TrailUpdate {
            best_price: self.best_price,
            new_tp: tp,
            new_sl: sl,
        })
    }

    pub fn check_exit(&self, price: Decimal) -> Option<ExitReason> {
        match self.side {
            PositionSide::Long => {
                if price <= self.current_sl {
                    Some(ExitReason::StopLoss)
                } else if price >= self.current_tp {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if price >= self.current_sl {
                    Some(ExitReason::StopLoss)
                } else if price <= self.current_tp {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }

    pub fn reset(&mut self, side: PositionSide, new_entry: Decimal) {
        *self = TrailingStop::new(
            side,
            new_entry,
            self.take_profit_pct,
            self.stop_loss_pct,
            self.activation_pct,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_stop(activation_pct: Decimal) -> TrailingStop {
        TrailingStop::new(PositionSide::Long, dec!(100), dec!(0.01), dec!(0.005), activation_pct)
    }

    #[test]
    fn initial_levels_bracket_entry_for_long() {
        let stop = long_stop(Decimal::ZERO);
        assert_eq!(stop.take_profit(), dec!(101));
        assert_eq!(stop.stop_loss(), dec!(99.5));
    }

    #[test]
    fn zero_activation_is_active_immediately() {
        let stop = long_stop(Decimal::ZERO);
        assert!(stop.is_activated());
    }

    #[test]
    fn nonzero_activation_gates_updates_until_reached() {
        let mut stop = long_stop(dec!(0.02));
        assert!(!stop.is_activated());
        assert!(stop.update(dec!(101)).is_none());
        assert!(!stop.is_activated());
        assert!(stop.update(dec!(102)).is_some());
        assert!(stop.is_activated());
    }

    #[test]
    fn long_levels_only_ratchet_upward() {
        let mut stop = long_stop(Decimal::ZERO);
        stop.update(dec!(110));
        let tp_at_110 = stop.take_profit();
        let sl_at_110 = stop.stop_loss();
        assert!(stop.update(dec!(105)).is_none());
        assert_eq!(stop.take_profit(), tp_at_110);
        assert_eq!(stop.stop_loss(), sl_at_110);
        stop.update(dec!(120));
        assert!(stop.take_profit() > tp_at_110);
        assert!(stop.stop_loss() > sl_at_110);
    }

    #[test]
    fn check_exit_detects_stop_loss_before_take_profit() {
        let stop = long_stop(Decimal::ZERO);
        assert_eq!(stop.check_exit(dec!(99.0)), Some(ExitReason::StopLoss));
        assert_eq!(stop.check_exit(dec!(101.5)), Some(ExitReason::TakeProfit));
        assert_eq!(stop.check_exit(dec!(100.2)), None);
    }

    #[test]
    fn short_levels_only_ratchet_downward() {
        let mut stop = TrailingStop::new(PositionSide::Short, dec!(100), dec!(0.01), dec!(0.005), Decimal::ZERO);
        assert_eq!(stop.take_profit(), dec!(99));
        assert_eq!(stop.stop_loss(), dec!(100.5));
        stop.update(dec!(90));
        let tp_at_90 = stop.take_profit();
        assert!(stop.update(dec!(95)).is_none());
        assert_eq!(stop.take_profit(), tp_at_90);
    }

    #[test]
    fn reset_reseeds_all_state() {
        let mut stop = long_stop(Decimal::ZERO);
        stop.update(dec!(110));
        stop.reset(PositionSide::Long, dec!(200));
        assert_eq!(stop.best_price(), dec!(200));
        assert_eq!(stop.take_profit(), dec!(202));
    }
}
