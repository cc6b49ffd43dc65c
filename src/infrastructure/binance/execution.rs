//! Authenticated trading client (C5): order placement, position and
//! balance queries, and time-sync correction, all behind the shared
//! circuit breaker. Every public method maps Binance's numeric error
//! codes to the typed [`ExchangeError`] taxonomy via `common`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, warn};

use crate::domain::errors::ExchangeError;
use crate::domain::kline::{ExchangePosition, OrderRecord};
use crate::domain::ports::{ExecutionPort, NewOrder};
use crate::domain::trading::types::{OrderSide, OrderStatus, OrderType, PositionSide};
use crate::infrastructure::binance::common::{
    map_api_error, sign_query, ApiErrorBody, FUTURES_BASE_URL, FUTURES_TESTNET_BASE_URL,
};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

const TIMESTAMP_OFFSET_WARN_MS: i64 = 500;
const TIMESTAMP_OFFSET_ERROR_MS: i64 = 1000;
const RECV_WINDOW_MS: i64 = 5000;

#[derive(Debug, Deserialize)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "clientOrderId")]
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    status: String,
    price: String,
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    #[serde(rename = "reduceOnly")]
    reduce_only: bool,
    #[serde(rename = "updateTime")]
    update_time: i64,
}

#[derive(Debug, Deserialize)]
struct PositionRisk {
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
    leverage: String,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
}

#[derive(Debug, Deserialize)]
struct IncomeEntry {
    income: String,
}

/// Binance futures execution client. Maintains a running clock offset
/// against the exchange's server time so signed requests don't drift
/// outside the receive window.
pub struct BinanceExecutionClient {
    http: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: &'static str,
    clock_offset_ms: AtomicI64,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceExecutionClient {
    pub fn new(api_key: String, api_secret: String, testnet: bool) -> Self {
        BinanceExecutionClient {
            http: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url: if testnet {
                FUTURES_TESTNET_BASE_URL
            } else {
                FUTURES_BASE_URL
            },
            clock_offset_ms: AtomicI64::new(0),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "binance_execution",
                5,
                3,
                Duration::from_secs(60),
            )),
        }
    }

    /// Shares this client's circuit breaker so the caller can observe
    /// its state (e.g. in the metrics reporter) without routing calls
    /// through it.
    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.circuit_breaker.clone()
    }

    /// Fetches server time and records the offset against our local
    /// clock. Called at construction and again after a `-1021`.
    pub async fn sync_clock(&self) -> Result<(), ExchangeError> {
        let url = format!("{}/fapi/v1/time", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        let body: ServerTime = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        let local_now = Utc::now().timestamp_millis();
        let offset = body.server_time - local_now;
        self.clock_offset_ms.store(offset, Ordering::SeqCst);

        if offset.abs() >= TIMESTAMP_OFFSET_ERROR_MS {
            error!(offset_ms = offset, "clock offset against Binance exceeds 1s");
        } else if offset.abs() >= TIMESTAMP_OFFSET_WARN_MS {
            warn!(offset_ms = offset, "clock offset against Binance exceeds 500ms");
        }
        Ok(())
    }

    fn timestamp(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_offset_ms.load(Ordering::SeqCst)
    }

    fn sign(&self, params: &[(&str, String)]) -> String {
        let query_string = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_query(&self.api_secret, &query_string);
        format!("{query_string}&signature={signature}")
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<String, ExchangeError> {
        params.push(("timestamp", self.timestamp().to_string()));
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        let signed_query = self.sign(&params);
        let url = format!("{}{path}?{signed_query}", self.base_url);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ExchangeError::Network(e.to_string()))?;

        if status.is_success() {
            return Ok(text);
        }

        let body: Option<ApiErrorBody> = serde_json::from_str(&text).ok();
        Err(map_api_error(status.as_u16(), body.as_ref(), None))
    }

    /// Signed request with one automatic resync-and-retry on a
    /// timestamp-out-of-sync rejection.
    async fn send_signed_with_resync(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, ExchangeError> {
        match self.send_signed(method.clone(), path, params.clone()).await {
            Err(ExchangeError::TimestampOutOfSync { .. }) => {
                self.sync_clock().await?;
                let offset = self.clock_offset_ms.load(Ordering::SeqCst);
                let wait_secs = (offset.unsigned_abs() as f64 / 1000.0 + 0.5).max(1.5);
                tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
                self.send_signed(method, path, params).await
            }
            other => other,
        }
    }

    async fn guarded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ExchangeError>>,
    ) -> Result<T, ExchangeError> {
        self.circuit_breaker.call(fut).await.map_err(|e| match e {
            CircuitBreakerError::Open(msg) => ExchangeError::Generic {
                code: -1,
                message: msg,
            },
            CircuitBreakerError::Inner(inner) => inner,
        })
    }

    fn parse_order_record(resp: OrderResponse) -> Option<OrderRecord> {
        let side = match resp.side.as_str() {
            "BUY" => OrderSide::Buy,
            "SELL" => OrderSide::Sell,
            _ => return None,
        };
        let order_type = match resp.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            "STOP_MARKET" => OrderType::StopMarket,
            "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
            _ => return None,
        };
        let status = match resp.status.as_str() {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => return None,
        };
        let avg_price = resp
            .avg_price
            .and_then(|p| p.parse().ok())
            .unwrap_or(Decimal::ZERO);
        Some(OrderRecord {
            order_id: resp.order_id.to_string(),
            client_order_id: resp.client_order_id,
            symbol: resp.symbol,
            side,
            order_type,
            status,
            price: resp.price.parse().unwrap_or(Decimal::ZERO),
            avg_price,
            executed_qty: resp.executed_qty.parse().unwrap_or(Decimal::ZERO),
            commission: Decimal::ZERO,
            commission_asset: "USDT".to_string(),
            reduce_only: resp.reduce_only,
            timestamp: Utc::now(),
            update_time: chrono::DateTime::from_timestamp_millis(resp.update_time)
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ExecutionPort for BinanceExecutionClient {
    async fn place_order(&self, order: NewOrder) -> Result<OrderRecord, ExchangeError> {
        self.guarded(async {
            let mut params = vec![
                ("symbol", order.symbol.clone()),
                ("side", order.side.to_string()),
                ("type", order.order_type.to_string()),
                ("quantity", order.quantity.to_string()),
                ("newClientOrderId", order.client_order_id.clone()),
            ];
            if order.reduce_only {
                params.push(("reduceOnly", "true".to_string()));
            }
            if order.close_position {
                params.push(("closePosition", "true".to_string()));
            }
            if let Some(price) = order.price {
                params.push(("price", price.to_string()));
            }
            if let Some(stop_price) = order.stop_price {
                params.push(("stopPrice", stop_price.to_string()));
            }
            if matches!(order.order_type, OrderType::Limit) {
                params.push(("timeInForce", "GTC".to_string()));
            }

            let body = self
                .send_signed_with_resync(reqwest::Method::POST, "/fapi/v1/order", params)
                .await
                .map_err(|e| match e {
                    ExchangeError::DuplicateClientOrderId { .. } => {
                        ExchangeError::DuplicateClientOrderId {
                            client_order_id: order.client_order_id.clone(),
                        }
                    }
                    other => other,
                })?;
            let resp: OrderResponse =
                serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;

            // Market orders can report zero executed quantity in the
            // initial response under momentary latency; requery once.
            if matches!(order.order_type, OrderType::Market) && resp.executed_qty == "0" {
                let requeried = self
                    .get_order(&order.symbol, &order.client_order_id)
                    .await?;
                return Ok(requeried);
            }

            Self::parse_order_record(resp)
                .ok_or_else(|| ExchangeError::Network("unparseable order response".to_string()))
        })
        .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        self.guarded(async {
            let params = vec![
                ("symbol", symbol.to_string()),
                ("origClientOrderId", order_id.to_string()),
            ];
            self.send_signed_with_resync(reqwest::Method::DELETE, "/fapi/v1/order", params)
                .await?;
            Ok(())
        })
        .await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.guarded(async {
            let params = vec![("symbol", symbol.to_string())];
            self.send_signed_with_resync(reqwest::Method::DELETE, "/fapi/v1/allOpenOrders", params)
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, ExchangeError> {
        self.guarded(async {
            let params = vec![("symbol", symbol.to_string())];
            let body = self
                .send_signed_with_resync(reqwest::Method::GET, "/fapi/v1/openOrders", params)
                .await?;
            let raw: Vec<OrderResponse> =
                serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;
            Ok(raw.into_iter().filter_map(Self::parse_order_record).collect())
        })
        .await
    }

    async fn get_order(&self, symbol: &str, client_order_id: &str) -> Result<OrderRecord, ExchangeError> {
        self.guarded(async {
            let params = vec![
                ("symbol", symbol.to_string()),
                ("origClientOrderId", client_order_id.to_string()),
            ];
            let body = self
                .send_signed_with_resync(reqwest::Method::GET, "/fapi/v1/order", params)
                .await?;
            let resp: OrderResponse =
                serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;
            Self::parse_order_record(resp)
                .ok_or_else(|| ExchangeError::Network("unparseable order response".to_string()))
        })
        .await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        self.guarded(async {
            let params = vec![("symbol", symbol.to_string())];
            let body = self
                .send_signed_with_resync(reqwest::Method::GET, "/fapi/v2/positionRisk", params)
                .await?;
            let raw: Vec<PositionRisk> =
                serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;

            let Some(entry) = raw.into_iter().find(|p| p.symbol == symbol) else {
                return Ok(None);
            };
            let position_amt: Decimal = entry.position_amt.parse().unwrap_or(Decimal::ZERO);
            if position_amt == Decimal::ZERO {
                return Ok(None);
            }

            let side = if position_amt > Decimal::ZERO {
                Some(PositionSide::Long)
            } else {
                Some(PositionSide::Short)
            };

            Ok(Some(ExchangePosition {
                symbol: entry.symbol,
                side,
                entry_price: entry.entry_price.parse().ok(),
                position_amt,
                mark_price: entry.mark_price.parse().unwrap_or(Decimal::ZERO),
                unrealized_pnl: entry.unrealized_profit.parse().unwrap_or(Decimal::ZERO),
                leverage: entry.leverage.parse().unwrap_or(1),
            }))
        })
        .await
    }

    async fn get_account_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.guarded(async {
            let body = self
                .send_signed_with_resync(reqwest::Method::GET, "/fapi/v2/balance", vec![])
                .await?;
            let raw: Vec<BalanceEntry> =
                serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;
            Ok(raw
                .into_iter()
                .find(|b| b.asset == asset)
                .and_then(|b| b.wallet_balance.parse().ok())
                .unwrap_or(Decimal::ZERO))
        })
        .await
    }

    async fn close_position(&self, symbol: &str) -> Result<Option<OrderRecord>, ExchangeError> {
        let Some(position) = self.get_position(symbol).await? else {
            return Ok(None);
        };

        let closing_side = match position.side {
            Some(PositionSide::Long) => OrderSide::Sell,
            Some(PositionSide::Short) => OrderSide::Buy,
            None => return Ok(None),
        };

        let order = NewOrder {
            symbol: symbol.to_string(),
            side: closing_side,
            order_type: OrderType::Market,
            quantity: position.position_amt.abs(),
            price: None,
            stop_price: None,
            reduce_only: true,
            close_position: false,
            client_order_id: format!("close-{symbol}-{}", Utc::now().timestamp_millis()),
        };
        self.place_order(order).await.map(Some)
    }

    async fn get_funding_fees(&self, symbol: &str, since: DateTime<Utc>) -> Result<Decimal, ExchangeError> {
        let result = self
            .guarded(async {
                let params = vec![
                    ("symbol", symbol.to_string()),
                    ("incomeType", "FUNDING_FEE".to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                ];
                let body = self
                    .send_signed_with_resync(reqwest::Method::GET, "/fapi/v1/income", params)
                    .await?;
                let raw: Vec<IncomeEntry> =
                    serde_json::from_str(&body).map_err(|e| ExchangeError::Network(e.to_string()))?;
                Ok(raw
                    .into_iter()
                    .filter_map(|i| i.income.parse::<Decimal>().ok())
                    .sum())
            })
            .await;

        // Funding fee lookups are informational; a failure here should
        // never block position management.
        match result {
            Ok(total) => Ok(total),
            Err(err) => {
                warn!(symbol, %err, "funding fee lookup failed, reporting zero");
                Ok(Decimal::ZERO)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_order_record_maps_market_fields() {
        let resp = OrderResponse {
            order_id: 1,
            client_order_id: "abc".into(),
            symbol: "BTCUSDT".into(),
            side: "BUY".into(),
            order_type: "MARKET".into(),
            status: "FILLED".into(),
            price: "0".into(),
            avg_price: Some("50000.5".into()),
            executed_qty: "0.01".into(),
            reduce_only: false,
            update_time: 1_700_000_000_000,
        };
        let record = BinanceExecutionClient::parse_order_record(resp).unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.avg_price.to_string(), "50000.5");
    }

    #[test]
    fn parse_order_record_rejects_unknown_status() {
        let resp = OrderResponse {
            order_id: 1,
            client_order_id: "abc".into(),
            symbol: "BTCUSDT".into(),
            side: "BUY".into(),
            order_type: "MARKET".into(),
            status: "UNKNOWN_STATUS".into(),
            price: "0".into(),
            avg_price: None,
            executed_qty: "0".into(),
            reduce_only: false,
            update_time: 0,
        };
        assert!(BinanceExecutionClient::parse_order_record(resp).is_none());
    }

    #[tokio::test]
    async fn resync_wait_floor_is_one_point_five_seconds() {
        let client = BinanceExecutionClient::new("k".into(), "s".into(), true);
        client.clock_offset_ms.store(0, Ordering::SeqCst);
        let offset = client.clock_offset_ms.load(Ordering::SeqCst);
        let wait = (offset.unsigned_abs() as f64 / 1000.0 + 0.5).max(1.5);
        assert_eq!(wait, 1.5);
    }
}
