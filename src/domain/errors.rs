//! Error taxonomy, scoped by concern the way a single blanket error type
//! never is: one enum per port boundary, matched explicitly by callers
//! that need to decide retry-vs-fatal.

use thiserror::Error;

/// Errors surfaced by the authenticated exchange client (C5).
///
/// Mirrors the exchange's numeric error codes and HTTP statuses so the
/// strategy runner can decide continue-vs-fatal without re-parsing
/// response bodies.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("authentication failed (code {code}): {message}")]
    AuthFailure { code: i64, message: String },

    #[error("invalid quantity for {symbol}: {message}")]
    InvalidQuantity { symbol: String, message: String },

    #[error("invalid symbol: {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("reduce-only order rejected for {symbol}")]
    ReduceOnlyRejected { symbol: String },

    #[error("invalid leverage for {symbol}: {leverage}")]
    InvalidLeverage { symbol: String, leverage: u32 },

    #[error("network error: {0}")]
    Network(String),

    #[error("timestamp out of sync, local-server offset {offset_ms}ms")]
    TimestampOutOfSync { offset_ms: i64 },

    #[error("duplicate client order id: {client_order_id}")]
    DuplicateClientOrderId { client_order_id: String },

    #[error("exchange error (code {code}): {message}")]
    Generic { code: i64, message: String },
}

impl ExchangeError {
    /// Classifies as transient for retry purposes (§7 kind 3).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimit { .. }
                | ExchangeError::Network(_)
                | ExchangeError::TimestampOutOfSync { .. }
        )
    }

    /// A duplicate-client-order-id rejection means the order already
    /// exists under that id — neither a transient failure nor fatal,
    /// it's resolved by requerying the existing order.
    pub fn is_duplicate_order(&self) -> bool {
        matches!(self, ExchangeError::DuplicateClientOrderId { .. })
    }

    /// Classifies as fatal for the runner bound to this account (§7 kind 4).
    pub fn is_fatal_for_runner(&self) -> bool {
        matches!(
            self,
            ExchangeError::AuthFailure { .. } | ExchangeError::InvalidLeverage { .. }
        )
    }
}

/// Errors from C11 strategy construction.
#[derive(Debug, Error)]
pub enum StrategyConfigError {
    #[error("unsupported strategy type: {tag}")]
    UnsupportedStrategyType { tag: String },

    #[error("strategy init failed for {name}: {reason}")]
    StrategyInitFailed { name: String, reason: String },

    #[error("invalid parameter {key}={value}: {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },
}

/// Errors from C7 risk sizing.
#[derive(Debug, Error)]
pub enum PositionSizingError {
    #[error("notional {notional} below minimum {min_notional} for {symbol}")]
    BelowMinNotional {
        symbol: String,
        notional: rust_decimal::Decimal,
        min_notional: rust_decimal::Decimal,
    },

    #[error("cannot size position: equity or price is non-positive")]
    InvalidInputs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_error_classifies_transient() {
        assert!(ExchangeError::RateLimit { retry_after_secs: 5 }.is_transient());
        assert!(ExchangeError::Network("timeout".into()).is_transient());
        assert!(!ExchangeError::InvalidSymbol { symbol: "XYZ".into() }.is_transient());
    }

    #[test]
    fn duplicate_client_order_id_is_neither_transient_nor_fatal() {
        let err = ExchangeError::DuplicateClientOrderId {
            client_order_id: "abc".into(),
        };
        assert!(err.is_duplicate_order());
        assert!(!err.is_transient());
        assert!(!err.is_fatal_for_runner());
    }

    #[test]
    fn exchange_error_classifies_fatal() {
        assert!(
            ExchangeError::AuthFailure {
                code: -2015,
                message: "bad key".into()
            }
            .is_fatal_for_runner()
        );
        assert!(!ExchangeError::RateLimit { retry_after_secs: 1 }.is_fatal_for_runner());
    }

    #[test]
    fn position_sizing_error_formatting() {
        let err = PositionSizingError::BelowMinNotional {
            symbol: "BTCUSDT".into(),
            notional: rust_decimal::Decimal::from(3),
            min_notional: rust_decimal::Decimal::from(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("BTCUSDT"));
    }
}
