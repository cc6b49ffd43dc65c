//! Bounded, ordered ring buffer of closed candles for one
//! `(symbol, interval)` stream (C2). Holds no network connection of
//! its own — the WS manager and connection task (application /
//! infrastructure) own that; this type is just the shared buffer they
//! write into and strategies read from.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::kline::Kline;

pub struct KlineBuffer {
    max_size: usize,
    klines: RwLock<VecDeque<Kline>>,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl KlineBuffer {
    pub fn new(max_size: usize) -> Self {
        KlineBuffer {
            max_size,
            klines: RwLock::new(VecDeque::with_capacity(max_size)),
            last_update: RwLock::new(None),
        }
    }

    /// Appends a newly closed candle, or replaces the last one if it
    /// shares the same `close_time` (a re-delivered or corrected
    /// close). Evicts the oldest entry once `max_size` is exceeded.
    pub async fn add_kline(&self, kline: Kline) {
        let mut guard = self.klines.write().await;
        match guard.back() {
            Some(last) if last.close_time == kline.close_time => {
                *guard.back_mut().unwrap() = kline;
            }
            _ => {
                guard.push_back(kline);
                if guard.len() > self.max_size {
                    guard.pop_front();
                }
            }
        }
        drop(guard);
        *self.last_update.write().await = Some(Utc::now());
    }

    /// Returns up to the last `limit` closed candles, oldest first.
    pub async fn get_klines(&self, limit: usize) -> Vec<Kline> {
        let guard = self.klines.read().await;
        let len = guard.len();
        let skip = len.saturating_sub(limit);
        guard.iter().skip(skip).cloned().collect()
    }

    pub async fn get_latest_kline(&self) -> Option<Kline> {
        self.klines.read().await.back().cloned()
    }

    pub async fn clear(&self) {
        self.klines.write().await.clear();
        *self.last_update.write().await = None;
    }

    pub async fn size(&self) -> usize {
        self.klines.read().await.len()
    }

    pub async fn last_update_time(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline_at(close_time: DateTime<Utc>) -> Kline {
        Kline {
            open_time: close_time,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
            close_time,
            trade_count: 5,
            taker_buy_volume: dec!(5),
        }
    }

    #[tokio::test]
    async fn appends_new_close_times_in_order() {
        let buffer = KlineBuffer::new(10);
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::minutes(1);
        buffer.add_kline(kline_at(t1)).await;
        buffer.add_kline(kline_at(t2)).await;
        assert_eq!(buffer.size().await, 2);
        let latest = buffer.get_latest_kline().await.unwrap();
        assert_eq!(latest.close_time, t2);
    }

    #[tokio::test]
    async fn replaces_same_close_time_instead_of_appending() {
        let buffer = KlineBuffer::new(10);
        let t1 = Utc::now();
        buffer.add_kline(kline_at(t1)).await;
        let mut corrected = kline_at(t1);
        corrected.close = dec!(200);
        buffer.add_kline(corrected).await;
        assert_eq!(buffer.size().await, 1);
        assert_eq!(buffer.get_latest_kline().await.unwrap().close, dec!(200));
    }

    #[tokio::test]
    async fn evicts_oldest_beyond_capacity() {
        let buffer = KlineBuffer::new(2);
        let base = Utc::now();
        for i in 0..3 {
            buffer.add_kline(kline_at(base + chrono::Duration::minutes(i))).await;
        }
        assert_eq!(buffer.size().await, 2);
        let klines = buffer.get_klines(10).await;
        assert_eq!(klines[0].close_time, base + chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn get_klines_respects_limit() {
        let buffer = KlineBuffer::new(10);
        let base = Utc::now();
        for i in 0..5 {
            buffer.add_kline(kline_at(base + chrono::Duration::minutes(i))).await;
        }
        let klines = buffer.get_klines(2).await;
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].close_time, base + chrono::Duration::minutes(4));
    }
}
