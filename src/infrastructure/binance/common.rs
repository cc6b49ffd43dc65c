//! Shared helpers for the Binance infrastructure: request signing and
//! the numeric error-code → [`ExchangeError`] mapping used by both the
//! public and authenticated clients.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::errors::ExchangeError;

pub const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
pub const FUTURES_TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
pub const FUTURES_WS_BASE_URL: &str = "wss://fstream.binance.com/ws";
pub const FUTURES_TESTNET_WS_BASE_URL: &str = "wss://testnet.binancefuture.com/ws";

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Signs a query string with HMAC-SHA256 under the account's API secret.
pub fn sign_query(secret: &str, query_string: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Maps an HTTP status plus a parsed exchange error body to the typed
/// taxonomy documented for the authenticated client (C5). `retry_after`
/// comes from the `Retry-After` header when present.
pub fn map_api_error(
    status: u16,
    body: Option<&ApiErrorBody>,
    retry_after_secs: Option<u64>,
) -> ExchangeError {
    if status == 429 {
        return ExchangeError::RateLimit {
            retry_after_secs: retry_after_secs.unwrap_or(60),
        };
    }

    let Some(body) = body else {
        return ExchangeError::Generic {
            code: status as i64,
            message: format!("HTTP {status} with no parseable error body"),
        };
    };

    match body.code {
        -1021 => ExchangeError::TimestampOutOfSync { offset_ms: 0 },
        -1013 => ExchangeError::InvalidQuantity {
            symbol: String::new(),
            message: body.msg.clone(),
        },
        -1121 => ExchangeError::InvalidSymbol {
            symbol: String::new(),
        },
        -2014 | -2015 => ExchangeError::AuthFailure {
            code: body.code,
            message: body.msg.clone(),
        },
        -2010 => ExchangeError::DuplicateClientOrderId {
            client_order_id: String::new(),
        },
        -4164 => ExchangeError::ReduceOnlyRejected {
            symbol: String::new(),
        },
        -4174 => ExchangeError::InvalidLeverage {
            symbol: String::new(),
            leverage: 0,
        },
        _ if status == 401 => ExchangeError::AuthFailure {
            code: body.code,
            message: body.msg.clone(),
        },
        _ => ExchangeError::Generic {
            code: body.code,
            message: body.msg.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{denormalize_crypto_symbol, normalize_crypto_symbol};

    #[test]
    fn signature_is_64_hex_chars() {
        let sig = sign_query("secret", "symbol=BTCUSDT&side=BUY&timestamp=1");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn maps_timestamp_out_of_sync() {
        let body = ApiErrorBody {
            code: -1021,
            msg: "Timestamp out of recvWindow".into(),
        };
        assert!(matches!(
            map_api_error(400, Some(&body), None),
            ExchangeError::TimestampOutOfSync { .. }
        ));
    }

    #[test]
    fn maps_rate_limit_with_retry_after() {
        let err = map_api_error(429, None, Some(12));
        assert!(matches!(
            err,
            ExchangeError::RateLimit { retry_after_secs: 12 }
        ));
    }

    #[test]
    fn test_binance_symbol_denormalization() {
        assert_eq!(denormalize_crypto_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(denormalize_crypto_symbol("ETH/USDT"), "ETHUSDT");
    }

    #[test]
    fn test_binance_symbol_normalization() {
        assert_eq!(normalize_crypto_symbol("BTCUSDT").unwrap(), "BTC/USDT");
        assert_eq!(normalize_crypto_symbol("BNBUSDT").unwrap(), "BNB/USDT");
    }
}
