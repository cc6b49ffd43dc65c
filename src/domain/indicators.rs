//! Pure technical-indicator functions shared by every strategy.
//!
//! These operate on `f64` series, not `Decimal` — they are statistical
//! smoothing, not ledger arithmetic, and every formula here is carried
//! over unchanged from the reference implementation rather than
//! reinvented: simple-average-seeded EMA (not Wilder's), a simplified
//! (non-Wilder) RSI, mean-of-true-range ATR, and a swing-window market
//! structure detector.

/// Exponential moving average, seeded with the simple mean of the
/// first `period` prices, then smoothed forward over the rest.
///
/// Returns `None` if fewer than `period` prices are supplied.
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    let smoothing = 2.0 / (period as f64 + 1.0);
    let mut value = mean(&prices[..period]);
    for &p in &prices[period..] {
        value = (p - value) * smoothing + value;
    }
    Some(value)
}

/// Relative strength index over the last `period` deltas, using a
/// simple (not Wilder-smoothed) average of gains and losses.
///
/// All gains with no losses returns 100; all flat (no gains, no
/// losses) returns 50 rather than dividing by zero.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - period - 1..];
    let mut gains = Vec::with_capacity(period);
    let mut losses = Vec::with_capacity(period);
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        gains.push(delta.max(0.0));
        losses.push((-delta).max(0.0));
    }
    let avg_gain = mean(&gains);
    let avg_loss = mean(&losses);
    if avg_loss == 0.0 {
        return Some(if avg_gain > 0.0 { 100.0 } else { 50.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// A single OHLCV bar, indexed the way indicator math needs it —
/// high/low/close only, volume handled separately by
/// [`volume_analysis`].
#[derive(Debug, Clone, Copy)]
pub struct Bar {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Average true range over the last `period` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }
    let start = bars.len() - period;
    let mut true_ranges = Vec::with_capacity(period);
    for i in start..bars.len() {
        let prev_close = bars[i - 1].close;
        let tr = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
        true_ranges.push(tr);
    }
    Some(mean(&true_ranges))
}

/// Trend direction inferred from swing highs/lows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct MarketStructure {
    pub structure: Structure,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
    pub previous_swing_high: Option<f64>,
    pub previous_swing_low: Option<f64>,
}

/// Finds swing highs/lows with a `swing_period`-wide confirmation
/// window on both sides, then classifies structure from the last two
/// of each.
///
/// Needs `2 * swing_period + 1` points at minimum; returns `Neutral`
/// with whatever partial swing data is available if fewer than two
/// swing highs or lows were found.
pub fn market_structure(highs: &[f64], lows: &[f64], swing_period: usize) -> Option<MarketStructure> {
    if highs.len() != lows.len() || highs.len() < swing_period * 2 + 1 {
        return None;
    }

    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();

    for i in swing_period..(highs.len() - swing_period) {
        let window = (i - swing_period)..=(i + swing_period);

        let is_swing_high = window
            .clone()
            .all(|j| j == i || highs[j] < highs[i]);
        if is_swing_high {
            swing_highs.push(highs[i]);
        }

        let is_swing_low = window.clone().all(|j| j == i || lows[j] > lows[i]);
        if is_swing_low {
            swing_lows.push(lows[i]);
        }
    }

    if swing_highs.len() < 2 || swing_lows.len() < 2 {
        return Some(MarketStructure {
            structure: Structure::Neutral,
            last_swing_high: swing_highs.last().copied(),
            last_swing_low: swing_lows.last().copied(),
            previous_swing_high: swing_highs.len().checked_sub(2).map(|i| swing_highs[i]),
            previous_swing_low: swing_lows.len().checked_sub(2).map(|i| swing_lows[i]),
        });
    }

    let last_high = swing_highs[swing_highs.len() - 1];
    let prev_high = swing_highs[swing_highs.len() - 2];
    let last_low = swing_lows[swing_lows.len() - 1];
    let prev_low = swing_lows[swing_lows.len() - 2];

    let higher_high = last_high > prev_high;
    let higher_low = last_low > prev_low;
    let lower_high = last_high < prev_high;
    let lower_low = last_low < prev_low;

    let structure = if higher_high && higher_low {
        Structure::Bullish
    } else if lower_high && lower_low {
        Structure::Bearish
    } else if higher_high && !lower_low {
        Structure::Bullish
    } else if lower_low && !higher_high {
        Structure::Bearish
    } else {
        Structure::Neutral
    };

    Some(MarketStructure {
        structure,
        last_swing_high: Some(last_high),
        last_swing_low: Some(last_low),
        previous_swing_high: Some(prev_high),
        previous_swing_low: Some(prev_low),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone)]
pub struct VolumeAnalysis {
    pub current_volume: f64,
    pub average_volume: f64,
    pub volume_ratio: f64,
    pub trend: VolumeTrend,
    pub is_high_volume: bool,
    pub is_low_volume: bool,
}

/// Current volume against the trailing average, plus a trend read
/// comparing the last `period` bars to the `period` before them (+/-5%
/// threshold before calling it a trend rather than noise).
pub fn volume_analysis(bars: &[Bar], period: usize) -> Option<VolumeAnalysis> {
    if bars.len() < period + 1 {
        return None;
    }
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let recent = &volumes[volumes.len() - period..];
    let current_volume = *volumes.last()?;
    let average_volume = mean(recent);
    let volume_ratio = if average_volume > 0.0 {
        current_volume / average_volume
    } else {
        1.0
    };

    let mut trend = VolumeTrend::Stable;
    if volumes.len() >= period * 2 {
        let previous_period = &volumes[volumes.len() - period * 2..volumes.len() - period];
        let previous_avg = mean(previous_period);
        let current_avg = mean(recent);
        if previous_avg > 0.0 {
            let change_pct = ((current_avg - previous_avg) / previous_avg) * 100.0;
            if change_pct > 5.0 {
                trend = VolumeTrend::Increasing;
            } else if change_pct < -5.0 {
                trend = VolumeTrend::Decreasing;
            }
        }
    }

    Some(VolumeAnalysis {
        current_volume,
        average_volume,
        volume_ratio,
        trend,
        is_high_volume: volume_ratio > 1.5,
        is_low_volume: volume_ratio < 0.5,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_with_simple_mean() {
        let prices = [100.0, 102.0, 101.0];
        assert_eq!(ema(&prices, 3), Some(101.0));
    }

    #[test]
    fn ema_smooths_forward_after_seed() {
        let prices = [100.0, 102.0, 101.0, 103.0];
        let value = ema(&prices, 3).unwrap();
        let smoothing = 2.0 / 4.0;
        let expected = (103.0 - 101.0) * smoothing + 101.0;
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn ema_insufficient_data_is_none() {
        assert_eq!(ema(&[100.0], 3), None);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let prices = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(rsi(&prices, 3), Some(100.0));
    }

    #[test]
    fn rsi_all_flat_is_50() {
        let prices = [1.0, 1.0, 1.0, 1.0];
        assert_eq!(rsi(&prices, 3), Some(50.0));
    }

    #[test]
    fn rsi_mixed() {
        let prices = [10.0, 12.0, 11.0, 13.0, 9.0];
        let value = rsi(&prices, 4).unwrap();
        assert!(value > 0.0 && value < 100.0);
    }

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar { high, low, close, volume: 0.0 }
    }

    #[test]
    fn atr_uses_true_range_with_gaps() {
        let bars = [bar(102.0, 99.0, 101.0), bar(103.0, 100.0, 102.0)];
        let value = atr(&bars, 1).unwrap();
        assert!((value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn market_structure_needs_minimum_points() {
        let highs = [1.0, 2.0, 3.0];
        let lows = [1.0, 2.0, 3.0];
        assert!(market_structure(&highs, &lows, 2).is_none());
    }

    #[test]
    fn market_structure_detects_bullish() {
        let highs = vec![
            100.0, 99.0, 98.0, 105.0, 98.0, 99.0, 100.0, 110.0, 100.0, 99.0, 98.0,
        ];
        let lows = vec![
            90.0, 89.0, 88.0, 95.0, 88.0, 92.0, 93.0, 102.0, 93.0, 92.0, 91.0,
        ];
        let result = market_structure(&highs, &lows, 2).unwrap();
        assert!(matches!(
            result.structure,
            Structure::Bullish | Structure::Neutral
        ));
    }

    #[test]
    fn volume_analysis_flags_high_volume() {
        let mut bars = vec![bar(1.0, 1.0, 1.0); 20];
        for b in bars.iter_mut() {
            b.volume = 1000.0;
        }
        bars.push(Bar { high: 1.0, low: 1.0, close: 1.0, volume: 2000.0 });
        let analysis = volume_analysis(&bars, 20).unwrap();
        assert!(analysis.is_high_volume);
        assert_eq!(analysis.volume_ratio, 2.0);
    }

    #[test]
    fn volume_analysis_insufficient_data_is_none() {
        let bars = vec![bar(1.0, 1.0, 1.0); 5];
        assert!(volume_analysis(&bars, 20).is_none());
    }
}
