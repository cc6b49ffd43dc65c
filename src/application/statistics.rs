//! Statistics (C12): FIFO lot-based PnL walk over an ordered order
//! journal, plus a short-lived cache of the aggregate.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::kline::{OrderRecord, PositionSide};
use crate::domain::trading::types::OrderSide;

const STATS_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Lot {
    qty: Decimal,
    entry_price: Decimal,
    side: PositionSide,
}

#[derive(Debug, Clone)]
pub struct CompletedTrade {
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub side: PositionSide,
    pub pnl: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyStats {
    pub total_trades: u64,
    pub completed_trades: u64,
    pub total_pnl: Decimal,
    pub win_rate: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub avg_pnl: Decimal,
}

/// Walks an order journal maintaining FIFO open lots, exactly as
/// documented: a BUY closes oldest SHORT lots first, then opens a LONG
/// lot for any residual quantity; SELL is symmetric.
pub fn calculate_strategy_stats(orders: &[OrderRecord]) -> StrategyStats {
    let mut lots: VecDeque<Lot> = VecDeque::new();
    let mut trades: Vec<CompletedTrade> = Vec::new();

    for order in orders {
        let mut remaining = order.executed_qty;
        let opposing_side = match order.side {
            OrderSide::Buy => PositionSide::Short,
            OrderSide::Sell => PositionSide::Long,
        };
        let opening_side = match order.side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };

        while remaining > Decimal::ZERO {
            match lots.front_mut() {
                Some(lot) if lot.side == opposing_side => {
                    let closed_qty = remaining.min(lot.qty);
                    let pnl = match lot.side {
                        PositionSide::Long => (order.avg_price - lot.entry_price) * closed_qty,
                        PositionSide::Short => (lot.entry_price - order.avg_price) * closed_qty,
                    };
                    trades.push(CompletedTrade {
                        qty: closed_qty,
                        entry_price: lot.entry_price,
                        exit_price: order.avg_price,
                        side: lot.side,
                        pnl,
                    });
                    lot.qty -= closed_qty;
                    remaining -= closed_qty;
                    if lot.qty.is_zero() {
                        lots.pop_front();
                    }
                }
                _ => {
                    lots.push_back(Lot {
                        qty: remaining,
                        entry_price: order.avg_price,
                        side: opening_side,
                    });
                    remaining = Decimal::ZERO;
                }
            }
        }
    }

    aggregate(orders.len() as u64, &trades)
}

fn aggregate(total_trades: u64, trades: &[CompletedTrade]) -> StrategyStats {
    if trades.is_empty() {
        return StrategyStats {
            total_trades,
            ..Default::default()
        };
    }
    let total_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();
    let wins = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count() as u64;
    let largest_win = trades.iter().map(|t| t.pnl).fold(Decimal::MIN, Decimal::max);
    let largest_loss = trades.iter().map(|t| t.pnl).fold(Decimal::MAX, Decimal::min);
    StrategyStats {
        total_trades,
        completed_trades: trades.len() as u64,
        total_pnl,
        win_rate: Decimal::from(wins) / Decimal::from(trades.len() as u64),
        largest_win: largest_win.max(Decimal::ZERO),
        largest_loss: largest_loss.min(Decimal::ZERO),
        avg_pnl: total_pnl / Decimal::from(trades.len() as u64),
    }
}

struct CachedStats {
    stats: StrategyStats,
    computed_at: Instant,
}

/// Caches the overall aggregate across all strategies for up to
/// [`STATS_CACHE_TTL`]; per-strategy recomputation is always exact.
pub struct StatisticsCache {
    overall: RwLock<Option<CachedStats>>,
    per_strategy: RwLock<HashMap<String, Vec<OrderRecord>>>,
}

impl Default for StatisticsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsCache {
    pub fn new() -> Self {
        StatisticsCache {
            overall: RwLock::new(None),
            per_strategy: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_order(&self, strategy_id: &str, order: OrderRecord) {
        let mut guard = self.per_strategy.write().await;
        guard.entry(strategy_id.to_string()).or_default().push(order);
        *self.overall.write().await = None;
    }

    pub async fn strategy_stats(&self, strategy_id: &str) -> StrategyStats {
        let guard = self.per_strategy.read().await;
        match guard.get(strategy_id) {
            Some(orders) => calculate_strategy_stats(orders),
            None => StrategyStats::default(),
        }
    }

    pub async fn overall_stats(&self) -> StrategyStats {
        if let Some(cached) = self.overall.read().await.as_ref() {
            if cached.computed_at.elapsed() < STATS_CACHE_TTL {
                return cached.stats.clone();
            }
        }
        let guard = self.per_strategy.read().await;
        let all_orders: Vec<OrderRecord> = guard.values().flatten().cloned().collect();
        drop(guard);
        let stats = calculate_strategy_stats(&all_orders);
        *self.overall.write().await = Some(CachedStats {
            stats: stats.clone(),
            computed_at: Instant::now(),
        });
        stats
    }
}
