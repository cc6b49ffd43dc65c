//! Process-wide WebSocket kline distribution manager (C3, the shared
//! half — the connection task itself lives in infrastructure and is
//! handed in as a [`KlineStreamPort`]).
//!
//! One entry per `(symbol, interval)`, reference-counted across every
//! runner subscribed to it. The short lock here only ever guards the
//! reference-count map, never an I/O call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify, RwLock};
use tracing::info;

use crate::domain::kline::Kline;
use crate::domain::kline_buffer::KlineBuffer;
use crate::domain::ports::KlineStreamPort;

const DEFAULT_BUFFER_CAPACITY: usize = 500;

struct StreamEntry {
    buffer: Arc<KlineBuffer>,
    notify: Arc<Notify>,
    cancel_tx: watch::Sender<bool>,
    subscriber_count: usize,
}

pub struct WsManager {
    connector: Arc<dyn KlineStreamPort>,
    streams: RwLock<HashMap<(String, String), StreamEntry>>,
}

impl WsManager {
    pub fn new(connector: Arc<dyn KlineStreamPort>) -> Self {
        WsManager {
            connector,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Registers interest in `(symbol, interval)`, spawning the
    /// connection task on first subscriber. Safe to call repeatedly
    /// from many runners sharing the same key.
    pub async fn subscribe(&self, symbol: &str, interval: &str) -> Arc<KlineBuffer> {
        let key = (symbol.to_string(), interval.to_string());
        let mut guard = self.streams.write().await;
        if let Some(entry) = guard.get_mut(&key) {
            entry.subscriber_count += 1;
            return entry.buffer.clone();
        }

        let buffer = Arc::new(KlineBuffer::new(DEFAULT_BUFFER_CAPACITY));
        let notify = Arc::new(Notify::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let connector = self.connector.clone();
        let task_buffer = buffer.clone();
        let task_notify = notify.clone();
        let task_symbol = symbol.to_string();
        let task_interval = interval.to_string();
        tokio::spawn(async move {
            connector
                .run(task_symbol, task_interval, task_buffer, task_notify, cancel_rx)
                .await;
        });

        info!(symbol, interval, "started kline stream");
        guard.insert(
            key,
            StreamEntry {
                buffer: buffer.clone(),
                notify,
                cancel_tx,
                subscriber_count: 1,
            },
        );
        buffer
    }

    /// Drops one subscriber's interest; cancels the connection task
    /// once the last subscriber leaves.
    pub async fn unsubscribe(&self, symbol: &str, interval: &str) {
        let key = (symbol.to_string(), interval.to_string());
        let mut guard = self.streams.write().await;
        if let Some(entry) = guard.get_mut(&key) {
            entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
            if entry.subscriber_count == 0 {
                let _ = entry.cancel_tx.send(true);
                guard.remove(&key);
                info!(symbol, interval, "stopped kline stream, no subscribers left");
            }
        }
    }

    /// Waits until the latch for `(symbol, interval)` fires (a new
    /// closed candle arrived) or `timeout` elapses. Returns `true` on
    /// a real notification, `false` on timeout — callers fall back to
    /// REST on `false`.
    pub async fn wait_for_new_closed_candle(
        &self,
        symbol: &str,
        interval: &str,
        timeout: Duration,
    ) -> bool {
        let key = (symbol.to_string(), interval.to_string());
        let notify = {
            let guard = self.streams.read().await;
            match guard.get(&key) {
                Some(entry) => entry.notify.clone(),
                None => return false,
            }
        };
        tokio::time::timeout(timeout, notify.notified()).await.is_ok()
    }

    pub async fn recent_closed_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Kline> {
        let key = (symbol.to_string(), interval.to_string());
        let guard = self.streams.read().await;
        match guard.get(&key) {
            Some(entry) => entry.buffer.get_klines(limit).await,
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl KlineStreamPort for CountingConnector {
        async fn run(
            &self,
            _symbol: String,
            _interval: String,
            _buffer: Arc<KlineBuffer>,
            _notify: Arc<Notify>,
            mut cancel: watch::Receiver<bool>,
        ) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _ = cancel.changed().await;
        }
    }

    #[tokio::test]
    async fn second_subscriber_reuses_existing_stream() {
        let runs = Arc::new(AtomicUsize::new(0));
        let manager = WsManager::new(Arc::new(CountingConnector { runs: runs.clone() }));
        manager.subscribe("BTCUSDT", "1m").await;
        manager.subscribe("BTCUSDT", "1m").await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_times_out_with_no_candle() {
        let runs = Arc::new(AtomicUsize::new(0));
        let manager = WsManager::new(Arc::new(CountingConnector { runs }));
        manager.subscribe("BTCUSDT", "1m").await;
        let fired = manager
            .wait_for_new_closed_candle("BTCUSDT", "1m", Duration::from_millis(20))
            .await;
        assert!(!fired);
    }

    #[tokio::test]
    async fn unsubscribe_without_subscribers_is_a_noop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let manager = WsManager::new(Arc::new(CountingConnector { runs }));
        manager.unsubscribe("BTCUSDT", "1m").await;
    }
}
