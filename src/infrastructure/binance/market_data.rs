//! Unauthenticated public market data client (C4): klines, last
//! price, and symbol metadata. No signing, no account endpoints — just
//! retried, rate-limit-aware REST against the futures public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::errors::ExchangeError;
use crate::domain::kline::Kline;
use crate::domain::ports::{MarketDataPort, SymbolFilters};
use crate::infrastructure::binance::common::{
    map_api_error, ApiErrorBody, FUTURES_BASE_URL, FUTURES_TESTNET_BASE_URL,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

const MAX_RETRIES: u32 = 3;
const MAX_KLINES_LIMIT: u32 = 1500;

#[derive(Debug, Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeSymbol {
    symbol: String,
    filters: Vec<ExchangeFilter>,
}

#[derive(Debug, Deserialize)]
struct ExchangeFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
    #[serde(rename = "minNotional")]
    min_notional: Option<String>,
    #[serde(rename = "notional")]
    notional: Option<String>,
}

pub struct BinanceMarketDataClient {
    http: ClientWithMiddleware,
    base_url: &'static str,
    exchange_info_cache: RwLock<Option<Arc<HashMap<String, SymbolFilters>>>>,
}

impl BinanceMarketDataClient {
    pub fn new(testnet: bool) -> Self {
        BinanceMarketDataClient {
            http: HttpClientFactory::create_client(),
            base_url: if testnet {
                FUTURES_TESTNET_BASE_URL
            } else {
                FUTURES_BASE_URL
            },
            exchange_info_cache: RwLock::new(None),
        }
    }

    /// Issues one GET with up to [`MAX_RETRIES`] retries on timeout or
    /// connection error, honoring `Retry-After` on HTTP 429.
    async fn get_with_retry(&self, path: &str, query: &[(&str, String)]) -> Result<String, ExchangeError> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;
        loop {
            let response = self.http.get(&url).query(query).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        if attempt < MAX_RETRIES {
                            warn!(retry_after, "rate limited, sleeping before retry");
                            tokio::time::sleep(Duration::from_secs(retry_after)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ExchangeError::RateLimit {
                            retry_after_secs: retry_after,
                        });
                    }
                    if !status.is_success() {
                        let body: Option<ApiErrorBody> = resp.json().await.ok();
                        return Err(map_api_error(status.as_u16(), body.as_ref(), None));
                    }
                    return resp.text().await.map_err(|e| ExchangeError::Network(e.to_string()));
                }
                Err(e) if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    warn!(attempt, ?backoff, %e, "retrying after network error");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(ExchangeError::Network(e.to_string())),
            }
        }
    }

    async fn fetch_exchange_info(&self) -> Result<Arc<HashMap<String, SymbolFilters>>, ExchangeError> {
        if let Some(cached) = self.exchange_info_cache.read().await.clone() {
            return Ok(cached);
        }

        let body = self.get_with_retry("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;

        let mut map = HashMap::new();
        for symbol in info.symbols {
            let mut filters = SymbolFilters::default();
            for filter in &symbol.filters {
                match filter.filter_type.as_str() {
                    "LOT_SIZE" | "MARKET_LOT_SIZE" => {
                        if let Some(step) = &filter.step_size {
                            if let Ok(step_decimal) = step.parse::<Decimal>() {
                                filters.quantity_precision = step_decimal.scale();
                            }
                        }
                    }
                    "MIN_NOTIONAL" | "NOTIONAL" => {
                        let raw = filter.min_notional.as_ref().or(filter.notional.as_ref());
                        if let Some(value) = raw.and_then(|v| v.parse::<Decimal>().ok()) {
                            filters.min_notional = value;
                        }
                    }
                    _ => {}
                }
            }
            map.insert(symbol.symbol, filters);
        }

        let cached = Arc::new(map);
        *self.exchange_info_cache.write().await = Some(cached.clone());
        Ok(cached)
    }
}

#[async_trait]
impl MarketDataPort for BinanceMarketDataClient {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>, ExchangeError> {
        let capped_limit = limit.min(MAX_KLINES_LIMIT);
        let body = self
            .get_with_retry(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", capped_limit.to_string()),
                ],
            )
            .await?;

        let raw: Vec<serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;

        raw.iter()
            .map(|entry| parse_kline_row(entry))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ExchangeError::Network("malformed kline row in REST response".to_string()))
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let body = self
            .get_with_retry("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: PriceTicker =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;
        let price: Decimal = ticker
            .price
            .parse()
            .map_err(|_| ExchangeError::Network(format!("unparseable price: {}", ticker.price)))?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidSymbol {
                symbol: symbol.to_string(),
            });
        }
        Ok(price)
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info = self.fetch_exchange_info().await?;
        Ok(info.get(symbol).copied().unwrap_or_default())
    }
}

fn parse_kline_row(row: &serde_json::Value) -> Option<Kline> {
    use chrono::{TimeZone, Utc};

    let arr = row.as_array()?;
    let open_time_ms = arr.first()?.as_i64()?;
    let close_time_ms = arr.get(6)?.as_i64()?;
    Some(Kline {
        open_time: Utc.timestamp_millis_opt(open_time_ms).single()?,
        open: arr.get(1)?.as_str()?.parse().ok()?,
        high: arr.get(2)?.as_str()?.parse().ok()?,
        low: arr.get(3)?.as_str()?.parse().ok()?,
        close: arr.get(4)?.as_str()?.parse().ok()?,
        volume: arr.get(5)?.as_str()?.parse().ok()?,
        close_time: Utc.timestamp_millis_opt(close_time_ms).single()?,
        trade_count: arr.get(8)?.as_u64()?,
        taker_buy_volume: arr.get(10)?.as_str()?.parse().ok()?,
    })
}
