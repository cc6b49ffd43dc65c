//! Concrete strategy implementations and the registry that constructs
//! them from configuration.

pub mod ema_scalping;
pub mod range_mean_reversion;
pub mod registry;
pub mod traits;

pub use registry::{build_strategy, default_params_for, StrategyKind};
pub use traits::{MarketView, Strategy};
