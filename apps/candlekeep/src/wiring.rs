use candlekeep_application::collection::AdapterSet;
use candlekeep_application::config::{CollectorConfig, ExchangeEndpoint};
use candlekeep_domain::repositories::candle_store::{CandleQuery, CandleStore};
use candlekeep_domain::value_objects::collection_task::normalize_symbol;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use candlekeep_infrastructure::market_data::build_http_client;
use candlekeep_infrastructure::market_data::kraken::KrakenSource;
use candlekeep_infrastructure::market_data::kucoin::KucoinSource;
use candlekeep_infrastructure::persistence::memory::MemoryCandleStore;
use candlekeep_infrastructure::persistence::postgres::PostgresCandleStore;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// One adapter per supported exchange, whatever the config currently lists,
/// so an exchange added between cycles resolves without a restart. Only
/// endpoint settings come from `[exchanges.*]`.
pub fn build_adapters(config: &CollectorConfig) -> Result<AdapterSet, String> {
    let mut adapters = AdapterSet::new();
    for exchange in Exchange::ALL {
        match exchange {
            Exchange::Kraken => {
                let endpoint = config.exchanges.kraken.as_ref();
                let client = build_http_client(timeout(endpoint))?;
                adapters.insert(Arc::new(KrakenSource::new(client, base_url(endpoint))));
            }
            Exchange::Kucoin => {
                let endpoint = config.exchanges.kucoin.as_ref();
                let client = build_http_client(timeout(endpoint))?;
                adapters.insert(Arc::new(KucoinSource::new(client, base_url(endpoint))));
            }
        }
    }
    for name in &config.collector.exchanges {
        if Exchange::parse(name).is_none() {
            tracing::warn!(exchange = %name, "no adapter for exchange");
        }
    }
    tracing::info!(exchanges = ?adapters.exchanges(), "exchange adapters ready");
    Ok(adapters)
}

fn timeout(endpoint: Option<&ExchangeEndpoint>) -> Duration {
    Duration::from_millis(endpoint.map_or(DEFAULT_TIMEOUT_MS, |e| e.timeout_ms))
}

fn base_url(endpoint: Option<&ExchangeEndpoint>) -> Option<&str> {
    endpoint.and_then(|e| e.base_url.as_deref())
}

/// Postgres when `[db]` is configured, otherwise a process-local store.
/// Must run outside the async runtime: the pool connects eagerly.
pub fn build_store(config: &CollectorConfig) -> Result<Arc<dyn CandleStore>, String> {
    match &config.db {
        Some(_) => Ok(Arc::new(build_postgres(config)?)),
        None => {
            tracing::warn!("no [db] section; candles are kept in memory only");
            Ok(Arc::new(MemoryCandleStore::new()))
        }
    }
}

pub fn build_postgres(config: &CollectorConfig) -> Result<PostgresCandleStore, String> {
    let db = config
        .db
        .as_ref()
        .ok_or_else(|| "config has no [db] section".to_string())?;
    let url = db.resolve_url().map_err(|err| err.to_string())?;
    PostgresCandleStore::new(
        &url,
        db.ohlcv_table.clone(),
        db.pool_max_size.unwrap_or(DEFAULT_POOL_SIZE),
    )
}

pub fn series_query(
    symbol: &str,
    exchange: &str,
    timeframe: &str,
    start: &str,
    end: Option<&str>,
) -> Result<CandleQuery, String> {
    let exchange =
        Exchange::parse(exchange).ok_or_else(|| format!("unsupported exchange: {exchange}"))?;
    let timeframe = Timeframe::parse(timeframe)?;
    let start = parse_time_input(start)?;
    let end = match end {
        Some(end) => parse_time_input(end)?,
        None => Utc::now(),
    };
    if start >= end {
        return Err(format!("start {start} must be before end {end}"));
    }
    Ok(CandleQuery {
        symbol: normalize_symbol(symbol),
        exchange,
        timeframe,
        start,
        end,
    })
}

/// RFC 3339 or Unix epoch (seconds or milliseconds).
pub fn parse_time_input(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = value.parse::<i64>() {
        let seconds = if ts > 1_000_000_000_000 { ts / 1000 } else { ts };
        return Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| format!("invalid epoch: {value}"));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("unsupported timestamp format: {value}"))
}

#[cfg(test)]
mod tests {
    use super::{build_adapters, parse_time_input, series_query};
    use candlekeep_application::config::parse_config;
    use candlekeep_domain::value_objects::exchange::Exchange;
    use candlekeep_domain::value_objects::timeframe::Timeframe;

    #[test]
    fn time_inputs_accept_epoch_and_rfc3339() {
        let a = parse_time_input("1704067200").unwrap();
        let b = parse_time_input("1704067200000").unwrap();
        let c = parse_time_input("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_time_input("yesterday").is_err());
    }

    #[test]
    fn series_query_normalizes_inputs() {
        let query = series_query("btcusd", "Kraken", "1hour", "1704067200", Some("1704153600"))
            .unwrap();
        assert_eq!(query.symbol, "BTCUSD");
        assert_eq!(query.exchange, Exchange::Kraken);
        assert_eq!(query.timeframe, Timeframe::H1);
        assert!(series_query("btcusd", "binance", "1h", "1704067200", None).is_err());
        assert!(series_query("btcusd", "kraken", "1h", "1704153600", Some("1704067200")).is_err());
    }

    #[test]
    fn adapters_cover_every_exchange_regardless_of_config() {
        let config = parse_config(
            "[collector]\nsymbols = [\"BTCUSD\"]\nexchanges = [\"kraken\", \"binance\"]\n",
        )
        .unwrap();
        let adapters = build_adapters(&config).unwrap();
        assert_eq!(adapters.exchanges(), Exchange::ALL.to_vec());
        assert!(adapters.resolve("KRAKEN").is_some());
        assert!(adapters.resolve("kucoin").is_some());
        assert!(adapters.resolve("binance").is_none());
    }
}
