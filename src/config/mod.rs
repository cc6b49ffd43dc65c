//! Configuration, loaded once from the environment (`.env` via
//! `dotenvy` plus `std::env`) into a single [`Config::from_env`] call.
//! Every field has a documented default so the engine starts in
//! dry-run-friendly shape with nothing set.

use std::env;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::autotune::AutoTuneConfig;
use crate::application::risk_management::sizing_engine::SizingConfig;

/// One configured strategy instance: which symbol it trades, which
/// strategy kind (resolved via the C11 registry), and its sizing
/// inputs.
#[derive(Debug, Clone)]
pub struct StrategySpec {
    pub id: String,
    pub symbol: String,
    pub kind_tag: String,
    pub leverage: u32,
    pub risk_per_trade: Decimal,
    pub interval_seconds: u64,
}

impl StrategySpec {
    /// Parses one `id:symbol:kind:leverage:risk_per_trade:interval_seconds`
    /// entry from the `STRATEGIES` env var.
    fn parse(entry: &str) -> Result<Self> {
        let fields: Vec<&str> = entry.split(':').collect();
        let [id, symbol, kind_tag, leverage, risk_per_trade, interval_seconds] = fields[..] else {
            anyhow::bail!(
                "malformed STRATEGIES entry '{entry}', expected id:symbol:kind:leverage:risk_per_trade:interval_seconds"
            );
        };
        Ok(StrategySpec {
            id: id.to_string(),
            symbol: symbol.to_string(),
            kind_tag: kind_tag.to_string(),
            leverage: leverage.parse().context("invalid leverage in STRATEGIES entry")?,
            risk_per_trade: risk_per_trade
                .parse()
                .context("invalid risk_per_trade in STRATEGIES entry")?,
            interval_seconds: interval_seconds
                .parse()
                .context("invalid interval_seconds in STRATEGIES entry")?,
        })
    }

    fn default_set() -> Vec<Self> {
        vec![StrategySpec {
            id: "s1".to_string(),
            symbol: "BTCUSDT".to_string(),
            kind_tag: "scalping".to_string(),
            leverage: 5,
            risk_per_trade: dec!(0.01),
            interval_seconds: 60,
        }]
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Top-level configuration for the trading engine binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub testnet: bool,
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub strategies: Vec<StrategySpec>,
    pub sizing: SizingConfig,
    pub autotune: AutoTuneConfig,
    pub metrics_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let testnet = env_parsed("BINANCE_TESTNET", true)?;
        let binance_api_key = env_or("BINANCE_API_KEY", "");
        let binance_api_secret = env_or("BINANCE_API_SECRET", "");

        let strategies = match env::var("STRATEGIES") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(StrategySpec::parse)
                .collect::<Result<Vec<_>>>()
                .context("failed to parse STRATEGIES")?,
            _ => StrategySpec::default_set(),
        };

        let sizing = SizingConfig {
            atr_period: env_parsed("SIZING_ATR_PERIOD", 14)?,
            atr_multiplier: env_parsed("SIZING_ATR_MULTIPLIER", Decimal::ONE)?,
            win_boost: env_parsed("SIZING_WIN_BOOST", dec!(0.1))?,
            max_win_boost: env_parsed("SIZING_MAX_WIN_BOOST", dec!(0.3))?,
            loss_reduction: env_parsed("SIZING_LOSS_REDUCTION", dec!(0.1))?,
            max_loss_reduction: env_parsed("SIZING_MAX_LOSS_REDUCTION", dec!(0.3))?,
            min_trades_for_kelly: env_parsed("SIZING_MIN_TRADES_FOR_KELLY", 100)?,
            kelly_fraction: env_parsed("SIZING_KELLY_FRACTION", dec!(0.25))?,
            max_kelly_position_pct: env_parsed("SIZING_MAX_KELLY_POSITION_PCT", dec!(0.10))?,
        };

        let autotune = AutoTuneConfig {
            min_time_between_tuning_hours: env_parsed("AUTOTUNE_MIN_HOURS_BETWEEN", 24)?,
            min_trades: env_parsed("AUTOTUNE_MIN_TRADES", 30)?,
        };

        let metrics_interval_secs = env_parsed("METRICS_INTERVAL_SECS", 60)?;

        Ok(Config {
            testnet,
            binance_api_key,
            binance_api_secret,
            strategies,
            sizing,
            autotune,
            metrics_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_spec_parses_a_well_formed_entry() {
        let spec = StrategySpec::parse("s1:BTCUSDT:scalping:5:0.01:60").unwrap();
        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.leverage, 5);
        assert_eq!(spec.risk_per_trade, dec!(0.01));
        assert_eq!(spec.interval_seconds, 60);
    }

    #[test]
    fn strategy_spec_rejects_missing_fields() {
        assert!(StrategySpec::parse("s1:BTCUSDT:scalping").is_err());
    }

    #[test]
    fn default_strategy_set_has_one_entry() {
        let defaults = StrategySpec::default_set();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].symbol, "BTCUSDT");
    }

    #[test]
    fn from_env_falls_back_to_defaults_with_no_env_set() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            env::remove_var("STRATEGIES");
            env::remove_var("BINANCE_API_KEY");
        }
        let config = Config::from_env().expect("should build from defaults");
        assert_eq!(config.strategies.len(), 1);
        assert!(config.testnet);
    }
}
