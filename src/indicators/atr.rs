/// Average True Range (ATR) indicator
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// ATR here is the plain arithmetic mean of the most recent `period` true
/// ranges (a rolling window, no Wilder smoothing).

use crate::models::Candle;

/// True range of candle `i`, or None for the first candle (no previous close)
pub fn true_range(candles: &[Candle], i: usize) -> Option<f64> {
    if i == 0 || i >= candles.len() {
        return None;
    }

    let high = candles[i].high;
    let low = candles[i].low;
    let prev_close = candles[i - 1].close;

    Some(
        (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs()),
    )
}

/// Calculate ATR over the last `period` candles
///
/// Returns None if there are fewer than `period + 1` candles
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let last = candles.len() - 1;
    let sum: f64 = (last + 1 - period..=last)
        .filter_map(|i| true_range(candles, i))
        .sum();

    Some(sum / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_true_range_uses_previous_close_gap() {
        // Gap up: previous close 100, current range 105-110
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0), (106.0, 110.0, 105.0, 108.0)]);

        assert_eq!(true_range(&candles, 0), None);
        assert_eq!(true_range(&candles, 1), Some(10.0));
    }

    #[test]
    fn test_calculate_atr() {
        let candles = create_test_candles(&vec![(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr(&candles, 14);

        assert_eq!(atr, Some(2.0));
    }

    #[test]
    fn test_flat_market_has_zero_atr() {
        let candles = create_test_candles(&vec![(100.0, 100.0, 100.0, 100.0); 30]);

        for period in 1..30 {
            assert_eq!(calculate_atr(&candles, period), Some(0.0));
        }
    }

    #[test]
    fn test_atr_only_uses_recent_window() {
        // Ten volatile candles followed by five calm ones
        let mut prices = vec![(100.0, 110.0, 90.0, 100.0); 10];
        prices.extend(vec![(100.0, 101.0, 99.0, 100.0); 5]);
        let candles = create_test_candles(&prices);

        assert_eq!(calculate_atr(&candles, 4), Some(2.0));
        assert!(calculate_atr(&candles, 14).unwrap() > 2.0);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0), (100.0, 101.0, 99.0, 100.0)]);

        assert!(calculate_atr(&candles, 14).is_none());
        assert!(calculate_atr(&candles, 2).is_none());
        assert!(calculate_atr(&candles, 1).is_some());
    }
}
