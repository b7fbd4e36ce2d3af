use super::timeframe::Timeframe;
use chrono::{DateTime, Utc};

/// One fetch-and-store unit. The exchange stays a raw name until the
/// orchestrator resolves it, so unknown names surface as task failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTask {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Canonical stored form of a symbol: trimmed, upper case.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl CollectionTask {
    /// Cross product in symbol, exchange, timeframe order. Symbols are
    /// normalized so stored rows match later queries.
    pub fn expand(
        symbols: &[String],
        exchanges: &[String],
        timeframes: &[Timeframe],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<CollectionTask> {
        let mut tasks = Vec::with_capacity(symbols.len() * exchanges.len() * timeframes.len());
        for symbol in symbols {
            for exchange in exchanges {
                for timeframe in timeframes {
                    tasks.push(CollectionTask {
                        symbol: normalize_symbol(symbol),
                        exchange: exchange.clone(),
                        timeframe: *timeframe,
                        window_start,
                        window_end,
                    });
                }
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_symbol, CollectionTask};
    use crate::value_objects::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};

    #[test]
    fn expands_full_cross_product() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let tasks = CollectionTask::expand(
            &["BTCUSD".to_string(), "ETHUSD".to_string()],
            &["kraken".to_string(), "kucoin".to_string()],
            &[Timeframe::M1, Timeframe::H1, Timeframe::D1],
            start,
            end,
        );
        assert_eq!(tasks.len(), 12);
        assert_eq!(tasks[0].symbol, "BTCUSD");
        assert_eq!(tasks[0].exchange, "kraken");
        assert_eq!(tasks[0].timeframe, Timeframe::M1);
        assert_eq!(tasks[11].symbol, "ETHUSD");
        assert_eq!(tasks[11].exchange, "kucoin");
        assert_eq!(tasks[11].timeframe, Timeframe::D1);
    }

    #[test]
    fn symbols_are_normalized_on_expansion() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let tasks = CollectionTask::expand(
            &[" btcusd ".to_string()],
            &["kraken".to_string()],
            &[Timeframe::H1],
            start,
            end,
        );
        assert_eq!(tasks[0].symbol, "BTCUSD");
        assert_eq!(normalize_symbol("eth-usdt"), "ETH-USDT");
    }
}
