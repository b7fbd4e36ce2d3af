use super::exchange::Exchange;
use super::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV record. `timestamp` is the candle open time in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub exchange: Exchange,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<u64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// Natural key used for idempotent storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    pub symbol: String,
    pub exchange: Exchange,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            timeframe: self.timeframe,
            timestamp: self.timestamp,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high`, all prices finite,
    /// volume finite and non-negative.
    pub fn has_valid_ohlc(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return false;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return false;
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high
    }

    pub fn is_zero_volume(&self) -> bool {
        self.volume == 0.0
    }

    pub fn is_aligned(&self) -> bool {
        self.timestamp.timestamp().rem_euclid(self.timeframe.step_seconds()) == 0
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}
