//! Typed parameter records for each strategy kind. Configuration
//! strings ("true"/"false"/"0"/"1"/"yes") are parsed into these by the
//! registry (C11) before a strategy instance ever sees them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, PartialEq)]
pub struct EmaScalpingConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub kline_interval: String,
    pub enable_short: bool,
    pub min_ema_separation: Decimal,
    pub enable_htf_bias: bool,
    pub cooldown_candles: u32,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_activation_pct: Decimal,
    pub enable_ema_cross_exit: bool,
}

impl Default for EmaScalpingConfig {
    fn default() -> Self {
        EmaScalpingConfig {
            ema_fast: 8,
            ema_slow: 21,
            take_profit_pct: dec!(0.004),
            stop_loss_pct: dec!(0.002),
            kline_interval: "1m".to_string(),
            enable_short: true,
            min_ema_separation: dec!(0.0002),
            enable_htf_bias: true,
            cooldown_candles: 2,
            trailing_stop_enabled: false,
            trailing_stop_activation_pct: Decimal::ZERO,
            enable_ema_cross_exit: true,
        }
    }
}

/// The `·5` in `range_size <= ATR * max_atr_multiplier * 5` is carried
/// over unexplained from the source system; named here rather than
/// left as a bare literal at the call site.
pub const RANGE_WIDTH_GUARD_MULTIPLIER: Decimal = dec!(5);

#[derive(Debug, Clone, PartialEq)]
pub struct RangeConfig {
    pub lookback_period: usize,
    pub buy_zone_pct: Decimal,
    pub sell_zone_pct: Decimal,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub max_ema_spread_pct: Decimal,
    pub max_atr_multiplier: Decimal,
    pub rsi_period: usize,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    pub tp_buffer_pct: Decimal,
    pub sl_buffer_pct: Decimal,
    pub kline_interval: String,
    pub enable_short: bool,
    pub cooldown_candles: u32,
    pub max_range_invalid_candles: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        RangeConfig {
            lookback_period: 150,
            buy_zone_pct: dec!(0.2),
            sell_zone_pct: dec!(0.2),
            ema_fast_period: 20,
            ema_slow_period: 50,
            max_ema_spread_pct: dec!(0.005),
            max_atr_multiplier: dec!(2.0),
            rsi_period: 14,
            rsi_oversold: dec!(40),
            rsi_overbought: dec!(60),
            tp_buffer_pct: dec!(0.001),
            sl_buffer_pct: dec!(0.002),
            kline_interval: "5m".to_string(),
            enable_short: true,
            cooldown_candles: 2,
            max_range_invalid_candles: 20,
        }
    }
}

/// Parses the loose boolean strings configuration sources hand us,
/// defaulting unknown values safely rather than erroring.
pub fn parse_config_bool(raw: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => default,
    }
}
