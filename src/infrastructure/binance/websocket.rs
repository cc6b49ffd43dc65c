//! Kline stream connection task (C3, the infrastructure half). One
//! task per `(symbol, interval)`, handed to the shared `WsManager` as
//! a [`KlineStreamPort`]. Testnet-first with a permanent mainnet
//! fallback after repeated testnet failures — market data is public,
//! so there's no authentication cost to switching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{watch, Notify};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::domain::kline::Kline;
use crate::domain::kline_buffer::KlineBuffer;
use crate::domain::ports::KlineStreamPort;
use crate::infrastructure::binance::common::{FUTURES_TESTNET_WS_BASE_URL, FUTURES_WS_BASE_URL};

const MAX_TESTNET_FAILURES: u32 = 3;
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const RESET_WAIT: Duration = Duration::from_secs(300);
const PING_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct KlineFrame {
    e: String,
    k: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    t: i64,
    #[serde(rename = "T")]
    close_time: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
    n: u64,
    #[serde(rename = "Q")]
    taker_buy_quote_volume: String,
    x: bool,
}

fn parse_kline(payload: &KlinePayload) -> Option<Kline> {
    Some(Kline {
        open_time: Utc.timestamp_millis_opt(payload.t).single()?,
        open: payload.o.parse().ok()?,
        high: payload.h.parse().ok()?,
        low: payload.l.parse().ok()?,
        close: payload.c.parse().ok()?,
        volume: payload.v.parse().ok()?,
        close_time: Utc.timestamp_millis_opt(payload.close_time).single()?,
        trade_count: payload.n,
        taker_buy_volume: payload.taker_buy_quote_volume.parse().unwrap_or(Decimal::ZERO),
    })
}

pub struct BinanceKlineStream {
    testnet: bool,
}

impl BinanceKlineStream {
    pub fn new(testnet: bool) -> Self {
        BinanceKlineStream { testnet }
    }

    fn testnet_url(symbol: &str, interval: &str) -> String {
        format!("{FUTURES_TESTNET_WS_BASE_URL}/{}@kline_{interval}", symbol.to_lowercase())
    }

    fn mainnet_url(symbol: &str, interval: &str) -> String {
        format!("{FUTURES_WS_BASE_URL}/{}@kline_{interval}", symbol.to_lowercase())
    }

    async fn connect_and_listen(
        url: &str,
        symbol: &str,
        interval: &str,
        buffer: &KlineBuffer,
        notify: &Notify,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| e.to_string())?;
        info!(symbol, interval, url, "kline websocket connected");
        let (_write, mut read) = ws_stream.split();
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        ping_timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return Ok(());
                    }
                }
                _ = ping_timer.tick() => {
                    debug!(symbol, interval, "kline websocket ping tick");
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                                handle_frame(&text, symbol, interval, buffer, notify).await;
                            }
                        }
                        Some(Err(e)) => return Err(e.to_string()),
                        None => return Err("stream ended".to_string()),
                    }
                }
            }
        }
    }
}

async fn handle_frame(text: &str, symbol: &str, interval: &str, buffer: &KlineBuffer, notify: &Notify) {
    let Ok(frame) = serde_json::from_str::<KlineFrame>(text) else {
        return;
    };
    if frame.e != "kline" || !frame.k.x {
        return;
    }
    let Some(kline) = parse_kline(&frame.k) else {
        warn!(symbol, interval, "failed to parse closed kline frame");
        return;
    };
    buffer.add_kline(kline).await;
    notify.notify_waiters();
}

#[async_trait]
impl KlineStreamPort for BinanceKlineStream {
    async fn run(
        &self,
        symbol: String,
        interval: String,
        buffer: Arc<KlineBuffer>,
        notify: Arc<Notify>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut use_mainnet = !self.testnet;
        let mut testnet_failures = 0u32;
        let mut reconnect_attempts = 0u32;

        loop {
            if *cancel.borrow() {
                return;
            }

            let url = if use_mainnet {
                Self::mainnet_url(&symbol, &interval)
            } else {
                Self::testnet_url(&symbol, &interval)
            };

            match Self::connect_and_listen(&url, &symbol, &interval, &buffer, &notify, &mut cancel).await {
                Ok(()) => return,
                Err(e) => {
                    if *cancel.borrow() {
                        return;
                    }

                    if self.testnet && !use_mainnet {
                        testnet_failures += 1;
                        if testnet_failures >= MAX_TESTNET_FAILURES {
                            info!(
                                symbol, interval,
                                "testnet kline stream failed {testnet_failures} times, switching to mainnet"
                            );
                            use_mainnet = true;
                            reconnect_attempts = 0;
                        }
                    }

                    reconnect_attempts += 1;
                    let wait = if reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                        error!(
                            symbol, interval,
                            "kline stream exhausted {MAX_RECONNECT_ATTEMPTS} reconnect attempts: {e}; backing off {RESET_WAIT:?}"
                        );
                        reconnect_attempts = 0;
                        RESET_WAIT
                    } else {
                        Duration::from_secs(2u64.saturating_pow(reconnect_attempts).min(60))
                    };
                    warn!(symbol, interval, %e, ?wait, "kline stream disconnected, reconnecting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
