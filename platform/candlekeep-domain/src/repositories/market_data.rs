use crate::value_objects::candle::Candle;
use crate::value_objects::exchange::Exchange;
use crate::value_objects::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Classified adapter failure. The retry policy only looks at
/// [`FetchError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeframe {timeframe} not supported by {exchange}")]
    UnsupportedTimeframe {
        exchange: Exchange,
        timeframe: Timeframe,
    },
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited(_) | FetchError::Transport(_))
    }
}

/// Exchange adapter port.
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Candles whose open time falls in `[start, end)`, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::FetchError;
    use crate::value_objects::exchange::Exchange;
    use crate::value_objects::timeframe::Timeframe;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FetchError::RateLimited("429".into()).is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::NotFound("pair".into()).is_retryable());
        assert!(!FetchError::InvalidData("row".into()).is_retryable());
        assert!(!FetchError::UnsupportedTimeframe {
            exchange: Exchange::Kraken,
            timeframe: Timeframe::M3,
        }
        .is_retryable());
    }
}
