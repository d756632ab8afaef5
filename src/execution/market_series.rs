use crate::error::BotError;
use crate::indicators;
use crate::models::Candle;
use crate::Result;

/// Candle field addressed by rolling queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl PriceField {
    fn read(&self, candle: &Candle) -> f64 {
        match self {
            PriceField::Open => candle.open,
            PriceField::High => candle.high,
            PriceField::Low => candle.low,
            PriceField::Close => candle.close,
            PriceField::Volume => candle.volume,
        }
    }
}

/// Ascending, duplicate-free candle sequence for one symbol
///
/// Keeps at most `max_candles`; the oldest candle is dropped on overflow.
#[derive(Debug, Clone)]
pub struct MarketSeries {
    candles: Vec<Candle>,
    max_candles: usize,
}

impl MarketSeries {
    /// Create an empty series
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_candles,
        }
    }

    /// Build a series from candles in any order
    ///
    /// Sorts ascending by timestamp and drops repeated timestamps, keeping the
    /// first occurrence.
    pub fn from_candles(mut candles: Vec<Candle>, max_candles: usize) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);

        let mut series = Self::new(max_candles);
        for candle in candles {
            series.push_unchecked(candle);
        }
        series
    }

    /// Append a candle newer than the current last one
    pub fn push(&mut self, candle: Candle) -> Result<()> {
        if let Some(last) = self.candles.last() {
            if candle.timestamp <= last.timestamp {
                return Err(BotError::Decode(format!(
                    "candle at {} is not after {}",
                    candle.timestamp, last.timestamp
                )));
            }
        }
        self.push_unchecked(candle);
        Ok(())
    }

    fn push_unchecked(&mut self, candle: Candle) {
        self.candles.push(candle);
        if self.candles.len() > self.max_candles {
            let excess = self.candles.len() - self.max_candles;
            self.candles.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candles oldest first
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    fn window(&self, window: usize) -> Result<&[Candle]> {
        if window == 0 || self.candles.len() < window {
            return Err(BotError::InsufficientData {
                needed: window.max(1),
                available: self.candles.len(),
            });
        }
        Ok(&self.candles[self.candles.len() - window..])
    }

    /// Minimum of `field` over the last `window` candles
    pub fn rolling_min(&self, field: PriceField, window: usize) -> Result<f64> {
        Ok(self
            .window(window)?
            .iter()
            .map(|c| field.read(c))
            .fold(f64::INFINITY, f64::min))
    }

    /// Maximum of `field` over the last `window` candles
    pub fn rolling_max(&self, field: PriceField, window: usize) -> Result<f64> {
        Ok(self
            .window(window)?
            .iter()
            .map(|c| field.read(c))
            .fold(f64::NEG_INFINITY, f64::max))
    }

    /// True range of candle `i`; fails for the first candle
    pub fn true_range(&self, i: usize) -> Result<f64> {
        indicators::true_range(&self.candles, i).ok_or(BotError::InsufficientData {
            needed: i.max(1) + 1,
            available: self.candles.len(),
        })
    }

    /// Mean true range over the last `period` candles (needs `period + 1`)
    pub fn average_true_range(&self, period: usize) -> Result<f64> {
        indicators::calculate_atr(&self.candles, period).ok_or(BotError::InsufficientData {
            needed: period + 1,
            available: self.candles.len(),
        })
    }
}
