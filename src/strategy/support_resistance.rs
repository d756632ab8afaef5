use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Signal, Strategy, TrendSource};
use crate::error::BotError;
use crate::execution::{MarketSeries, PriceField};
use crate::models::{Level, Side};
use crate::Result;

/// Price within 1% of a level counts as touching it
pub const PROXIMITY_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Trade only when price is near support or resistance
    #[default]
    Proximity,
    /// Always bracket the market with a long at support and a short at resistance
    DualRace,
}

impl FromStr for SignalMode {
    type Err = BotError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "proximity" => Ok(SignalMode::Proximity),
            "dual_race" | "dual" => Ok(SignalMode::DualRace),
            other => Err(BotError::Decode(format!("unknown signal mode: {}", other))),
        }
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalMode::Proximity => write!(f, "proximity"),
            SignalMode::DualRace => write!(f, "dual_race"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SrLevels {
    pub support: Level,
    pub resistance: Level,
}

/// Support/resistance signal generator
pub struct SignalDetector {
    window: usize,
    mode: SignalMode,
    trend_source: Option<Box<dyn TrendSource>>,
}

impl SignalDetector {
    pub fn new(window: usize, mode: SignalMode) -> Self {
        Self {
            window,
            mode,
            trend_source: None,
        }
    }

    /// Gate proximity signals by an injected trend
    pub fn with_trend_source(mut self, source: Box<dyn TrendSource>) -> Self {
        self.trend_source = Some(source);
        self
    }

    pub fn mode(&self) -> SignalMode {
        self.mode
    }

    /// Lowest low over the window
    pub fn support(&self, series: &MarketSeries) -> Result<Level> {
        Ok(Level {
            price: series.rolling_min(PriceField::Low, self.window)?,
            window: self.window,
        })
    }

    /// Highest high over the window
    pub fn resistance(&self, series: &MarketSeries) -> Result<Level> {
        Ok(Level {
            price: series.rolling_max(PriceField::High, self.window)?,
            window: self.window,
        })
    }

    pub fn levels(&self, series: &MarketSeries) -> Result<SrLevels> {
        Ok(SrLevels {
            support: self.support(series)?,
            resistance: self.resistance(series)?,
        })
    }

    /// Signal for already computed levels
    pub fn decide(&self, levels: &SrLevels, current_price: f64, series: &MarketSeries) -> Result<Signal> {
        let support = levels.support.price;
        let resistance = levels.resistance.price;

        match self.mode {
            SignalMode::DualRace => Ok(Signal::Race {
                long_entry: support,
                short_entry: resistance,
            }),
            SignalMode::Proximity => {
                let candidate = if current_price <= support * (1.0 + PROXIMITY_THRESHOLD) {
                    Some((Side::Long, support))
                } else if current_price >= resistance * (1.0 - PROXIMITY_THRESHOLD) {
                    Some((Side::Short, resistance))
                } else {
                    None
                };

                let Some((side, entry)) = candidate else {
                    return Ok(Signal::Hold);
                };

                if let Some(source) = &self.trend_source {
                    if !source.trend(series)?.allows(side) {
                        return Ok(Signal::Hold);
                    }
                }

                Ok(Signal::Enter { side, entry })
            }
        }
    }
}

impl Strategy for SignalDetector {
    fn generate_signal(&self, series: &MarketSeries, current_price: f64) -> Result<Signal> {
        let levels = self.levels(series)?;
        self.decide(&levels, current_price, series)
    }

    fn name(&self) -> &str {
        match self.mode {
            SignalMode::Proximity => "Support/Resistance Proximity",
            SignalMode::DualRace => "Support/Resistance Dual Race",
        }
    }

    fn min_candles_required(&self) -> usize {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use crate::strategy::Trend;
    use chrono::{TimeZone, Utc};

    struct FixedTrend(Trend);

    impl TrendSource for FixedTrend {
        fn trend(&self, _series: &MarketSeries) -> Result<Trend> {
            Ok(self.0)
        }
    }

    /// Candles oscillating between `low` and `high`
    fn range_bound(n: i64, low: f64, high: f64) -> MarketSeries {
        let candles = (0..n)
            .map(|i| {
                let mid = (low + high) / 2.0;
                Candle {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap(),
                    open: mid,
                    high: if i % 7 == 3 { high } else { mid + 10.0 },
                    low: if i % 5 == 2 { low } else { mid - 10.0 },
                    close: mid,
                    volume: 5.0,
                }
            })
            .collect();
        MarketSeries::from_candles(candles, 500)
    }

    #[test]
    fn test_levels_match_window_extremes() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(20, SignalMode::Proximity);

        let levels = detector.levels(&series).unwrap();
        assert_eq!(levels.support.price, 60000.0);
        assert_eq!(levels.resistance.price, 62000.0);
        assert_eq!(levels.support.window, 20);
    }

    #[test]
    fn test_levels_undefined_for_short_series() {
        let series = range_bound(10, 60000.0, 62000.0);
        let detector = SignalDetector::new(20, SignalMode::Proximity);

        assert!(detector.support(&series).is_err());
        assert!(detector.resistance(&series).is_err());
    }

    #[test]
    fn test_proximity_long_near_support() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(60, SignalMode::Proximity);

        let signal = detector.generate_signal(&series, 60050.0).unwrap();
        assert_eq!(
            signal,
            Signal::Enter {
                side: Side::Long,
                entry: 60000.0
            }
        );
    }

    #[test]
    fn test_proximity_short_near_resistance() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(60, SignalMode::Proximity);

        let signal = detector.generate_signal(&series, 61500.0).unwrap();
        assert_eq!(
            signal,
            Signal::Enter {
                side: Side::Short,
                entry: 62000.0
            }
        );
    }

    #[test]
    fn test_proximity_hold_mid_range() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(60, SignalMode::Proximity);

        // 1% above support is 60600, 1% below resistance is 61380
        assert_eq!(detector.generate_signal(&series, 61000.0).unwrap(), Signal::Hold);
        assert_eq!(detector.generate_signal(&series, 60601.0).unwrap(), Signal::Hold);
        assert!(matches!(
            detector.generate_signal(&series, 60600.0).unwrap(),
            Signal::Enter { side: Side::Long, .. }
        ));
    }

    #[test]
    fn test_trend_gate_blocks_counter_trend_entry() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(60, SignalMode::Proximity)
            .with_trend_source(Box::new(FixedTrend(Trend::Short)));

        assert_eq!(detector.generate_signal(&series, 60050.0).unwrap(), Signal::Hold);
        assert!(matches!(
            detector.generate_signal(&series, 61900.0).unwrap(),
            Signal::Enter { side: Side::Short, .. }
        ));
    }

    #[test]
    fn test_dual_race_always_brackets() {
        let series = range_bound(60, 60000.0, 62000.0);
        let detector = SignalDetector::new(60, SignalMode::DualRace);

        let signal = detector.generate_signal(&series, 61000.0).unwrap();
        assert_eq!(
            signal,
            Signal::Race {
                long_entry: 60000.0,
                short_entry: 62000.0
            }
        );
    }

    #[test]
    fn test_signal_mode_parsing() {
        assert_eq!("dual-race".parse::<SignalMode>().unwrap(), SignalMode::DualRace);
        assert_eq!("Proximity".parse::<SignalMode>().unwrap(), SignalMode::Proximity);
        assert!("breakout".parse::<SignalMode>().is_err());
    }
}
