//! HTTP exchange adapters behind the `CandleSource` port.

pub mod kraken;
pub mod kucoin;

use candlekeep_domain::repositories::market_data::FetchError;
use candlekeep_domain::value_objects::candle::Candle;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Shared client for every adapter; per-call state lives on the stack.
pub fn build_http_client(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|err| format!("failed to build http client: {err}"))
}

/// Maps a non-success HTTP status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, context: &str) -> FetchError {
    let message = format!("{context}: status {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited(message)
    } else if status == StatusCode::NOT_FOUND {
        FetchError::NotFound(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        FetchError::Transport(message)
    } else {
        FetchError::InvalidData(message)
    }
}

pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        return classify_status(status, context);
    }
    FetchError::Transport(format!("{context}: {err}"))
}

/// Keeps candles with open time in `[start, end)`, sorted and deduplicated.
pub(crate) fn clamp_to_window(
    mut candles: Vec<Candle>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Candle> {
    candles.retain(|c| c.timestamp >= start && c.timestamp < end);
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

pub(crate) fn parse_f64(value: &str, field: &str) -> Result<f64, FetchError> {
    value
        .parse::<f64>()
        .map_err(|_| FetchError::InvalidData(format!("invalid {field}: {value}")))
}

/// Splits a compact pair such as `BTCUSD` into base and quote.
pub(crate) fn split_pair(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.trim().to_uppercase();
    if let Some((base, quote)) = upper.split_once(|c: char| matches!(c, '-' | '/' | '_')) {
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        return Some((base.to_string(), quote.to_string()));
    }
    const QUOTES: [&str; 6] = ["USDT", "USDC", "USD", "EUR", "BTC", "ETH"];
    QUOTES.iter().find_map(|quote| {
        let base = upper.strip_suffix(quote)?;
        (!base.is_empty()).then(|| (base.to_string(), quote.to_string()))
    })
}
