use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order types the exchange accepts for this engine's order flow —
/// `MARKET`, `LIMIT` (GTC), `STOP_MARKET`, `TAKE_PROFIT_MARKET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
            OrderType::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ===== Symbol Normalization =====

/// Supported quote currencies for crypto pairs, ordered by priority (longest first to prefer USDT over USD)
const CRYPTO_QUOTE_CURRENCIES: &[&str] = &[
    "USDT", "USDC", "BUSD", "TUSD", // Stablecoins (4 chars)
    "USD", "EUR", "GBP", "BTC", "ETH", // Traditional (3 chars)
];

/// Normalizes an exchange-format crypto symbol (e.g. `"BTCUSDT"`) into
/// the engine's slash-separated format (`"BTC/USDT"`).
///
/// # Examples
/// ```
/// use futures_engine::domain::trading::types::normalize_crypto_symbol;
///
/// assert_eq!(normalize_crypto_symbol("BTCUSD").unwrap(), "BTC/USD");
/// assert_eq!(normalize_crypto_symbol("BTCUSDT").unwrap(), "BTC/USDT");
/// assert_eq!(normalize_crypto_symbol("ETHEUR").unwrap(), "ETH/EUR");
/// assert_eq!(normalize_crypto_symbol("BTC/USD").unwrap(), "BTC/USD"); // Already normalized
/// ```
pub fn normalize_crypto_symbol(symbol: &str) -> Result<String, String> {
    if symbol.contains('/') {
        return Ok(symbol.to_string());
    }

    if symbol.is_empty() {
        return Err("Cannot normalize empty symbol".to_string());
    }

    for quote in CRYPTO_QUOTE_CURRENCIES {
        if symbol.ends_with(quote) && symbol.len() > quote.len() {
            let base = &symbol[..symbol.len() - quote.len()];
            if !base.is_empty() && base.chars().all(|c| c.is_ascii_uppercase()) {
                return Ok(format!("{}/{}", base, quote));
            }
        }
    }

    Err(format!(
        "Cannot normalize crypto symbol: '{}' - no recognized quote currency",
        symbol
    ))
}

/// Denormalizes a slash-separated symbol back to the exchange's
/// concatenated wire format (e.g. `"BTC/USDT"` -> `"BTCUSDT"`).
///
/// # Examples
/// ```
/// use futures_engine::domain::trading::types::denormalize_crypto_symbol;
///
/// assert_eq!(denormalize_crypto_symbol("BTC/USD"), "BTCUSD");
/// assert_eq!(denormalize_crypto_symbol("ETH/USDT"), "ETHUSDT");
/// assert_eq!(denormalize_crypto_symbol("BTCUSD"), "BTCUSD"); // Already denormalized
/// ```
pub fn denormalize_crypto_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denormalize_crypto_symbol() {
        assert_eq!(denormalize_crypto_symbol("BTC/USD"), "BTCUSD");
        assert_eq!(denormalize_crypto_symbol("ETH/USDT"), "ETHUSDT");
        assert_eq!(denormalize_crypto_symbol("AVAX/USD"), "AVAXUSD");
        assert_eq!(denormalize_crypto_symbol("LINK/EUR"), "LINKEUR");
        assert_eq!(denormalize_crypto_symbol("BTCUSD"), "BTCUSD");
        assert_eq!(denormalize_crypto_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn test_normalize_denormalize_roundtrip() {
        let symbols = vec!["BTCUSD", "ETHUSDT", "AVAXUSD", "LINKEUR"];
        for symbol in symbols {
            let normalized = normalize_crypto_symbol(symbol).unwrap();
            let denormalized = denormalize_crypto_symbol(&normalized);
            assert_eq!(denormalized, symbol);
        }
    }

    #[test]
    fn test_normalize_crypto_standard_pairs() {
        assert_eq!(normalize_crypto_symbol("BTCUSD").unwrap(), "BTC/USD");
        assert_eq!(normalize_crypto_symbol("ETHEUR").unwrap(), "ETH/EUR");
        assert_eq!(normalize_crypto_symbol("LTCGBP").unwrap(), "LTC/GBP");
        assert_eq!(normalize_crypto_symbol("LINKETH").unwrap(), "LINK/ETH");
    }

    #[test]
    fn test_normalize_crypto_stablecoins() {
        assert_eq!(normalize_crypto_symbol("BTCUSDT").unwrap(), "BTC/USDT");
        assert_eq!(normalize_crypto_symbol("ETHUSDC").unwrap(), "ETH/USDC");
        assert_eq!(normalize_crypto_symbol("BNBBUSD").unwrap(), "BNB/BUSD");
        assert_eq!(normalize_crypto_symbol("ADATUSD").unwrap(), "ADA/TUSD");
    }

    #[test]
    fn test_normalize_crypto_already_normalized() {
        assert_eq!(normalize_crypto_symbol("BTC/USD").unwrap(), "BTC/USD");
        assert_eq!(normalize_crypto_symbol("ETH/USDT").unwrap(), "ETH/USDT");
        assert_eq!(normalize_crypto_symbol("LINK/EUR").unwrap(), "LINK/EUR");
    }

    #[test]
    fn test_normalize_crypto_prefers_longer_quote() {
        assert_eq!(normalize_crypto_symbol("BTCUSDT").unwrap(), "BTC/USDT");
    }

    #[test]
    fn test_normalize_crypto_invalid_symbols() {
        assert!(normalize_crypto_symbol("INVALID").is_err());
        assert!(normalize_crypto_symbol("ABC").is_err());
        assert!(normalize_crypto_symbol("GOOGLE").is_err());
        assert!(normalize_crypto_symbol("").is_err());
    }

    #[test]
    fn test_normalize_crypto_edge_cases() {
        assert!(normalize_crypto_symbol("USD").is_err());
        assert!(normalize_crypto_symbol("EUR").is_err());
        assert!(normalize_crypto_symbol("USDT").is_err());
    }

    #[test]
    fn test_normalize_crypto_case_sensitivity() {
        assert!(normalize_crypto_symbol("btcusd").is_err());
        assert!(normalize_crypto_symbol("BtcUsd").is_err());
    }
}
