//! Strategy registry (C11): resolves a configuration tag to a strategy
//! constructor, including the documented aliases.

use crate::application::strategies::ema_scalping::EmaScalpingStrategy;
use crate::application::strategies::range_mean_reversion::RangeMeanReversionStrategy;
use crate::application::strategies::traits::Strategy;
use crate::domain::errors::StrategyConfigError;
use crate::domain::kline::{StrategyContext, StrategyParams};
use crate::domain::strategy_params::{EmaScalpingConfig, RangeConfig};

/// Strategy kinds this engine knows how to build. `scalping` and
/// `ema_crossover` both resolve to the same kind, as do
/// `range_mean_reversion` and `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    EmaScalping,
    RangeMeanReversion,
}

impl StrategyKind {
    pub fn from_tag(tag: &str) -> Result<Self, StrategyConfigError> {
        match tag {
            "scalping" | "ema_crossover" => Ok(StrategyKind::EmaScalping),
            "range_mean_reversion" | "range" => Ok(StrategyKind::RangeMeanReversion),
            other => Err(StrategyConfigError::UnsupportedStrategyType {
                tag: other.to_string(),
            }),
        }
    }
}

/// Builds a boxed strategy instance from a context whose `params`
/// already matches the resolved kind.
pub fn build_strategy(ctx: StrategyContext) -> Result<Box<dyn Strategy>, StrategyConfigError> {
    match &ctx.params {
        StrategyParams::EmaScalping(cfg) => {
            let cfg = cfg.clone();
            Ok(Box::new(EmaScalpingStrategy::new(ctx, cfg)))
        }
        StrategyParams::RangeMeanReversion(cfg) => {
            let cfg = cfg.clone();
            Ok(Box::new(RangeMeanReversionStrategy::new(ctx, cfg)))
        }
    }
}

/// Convenience constructor for callers building a context from a tag
/// plus default parameters (the common auto-tune / fresh-strategy
/// path); explicit parameter overrides still go through
/// [`build_strategy`] directly.
pub fn default_params_for(tag: &str) -> Result<StrategyParams, StrategyConfigError> {
    match StrategyKind::from_tag(tag)? {
        StrategyKind::EmaScalping => Ok(StrategyParams::EmaScalping(EmaScalpingConfig::default())),
        StrategyKind::RangeMeanReversion => {
            Ok(StrategyParams::RangeMeanReversion(RangeConfig::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_canonical_and_alias_tags() {
        assert_eq!(StrategyKind::from_tag("scalping").unwrap(), StrategyKind::EmaScalping);
        assert_eq!(StrategyKind::from_tag("ema_crossover").unwrap(), StrategyKind::EmaScalping);
        assert_eq!(
            StrategyKind::from_tag("range_mean_reversion").unwrap(),
            StrategyKind::RangeMeanReversion
        );
        assert_eq!(StrategyKind::from_tag("range").unwrap(), StrategyKind::RangeMeanReversion);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(StrategyKind::from_tag("mystery").is_err());
    }
}
