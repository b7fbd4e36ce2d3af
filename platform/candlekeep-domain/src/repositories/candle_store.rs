use crate::value_objects::candle::Candle;
use crate::value_objects::exchange::Exchange;
use crate::value_objects::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("candle store: {0}")]
pub struct StoreError(pub String);

/// Selects one series over the half-open range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleQuery {
    pub symbol: String,
    pub exchange: Exchange,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CandleQuery {
    pub fn contains(&self, candle: &Candle) -> bool {
        candle.symbol == self.symbol
            && candle.exchange == self.exchange
            && candle.timeframe == self.timeframe
            && candle.timestamp >= self.start
            && candle.timestamp < self.end
    }
}

/// Persistence port. Writes are upserts on (symbol, exchange, timeframe, timestamp).
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Returns the number of rows written (inserted or overwritten).
    async fn store_candles(&self, candles: &[Candle]) -> Result<u64, StoreError>;

    /// Ordered oldest first.
    async fn query_candles(&self, query: &CandleQuery) -> Result<Vec<Candle>, StoreError>;
}
