use super::{build_http_client, clamp_to_window, classify_status, parse_f64, split_pair, transport_error};
use async_trait::async_trait;
use candlekeep_domain::repositories::market_data::{CandleSource, FetchError};
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const KRAKEN_BASE: &str = "https://api.kraken.com";

#[derive(Debug, Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, Value>,
}

/// Kraken public OHLC (`/0/public/OHLC`). Kraken serves at most the latest
/// 720 candles per interval, so deep history comes back truncated.
#[derive(Debug, Clone)]
pub struct KrakenSource {
    client: Client,
    base_url: String,
}

impl KrakenSource {
    pub fn new(client: Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or(KRAKEN_BASE)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn with_timeout(base_url: Option<&str>, timeout: Duration) -> Result<Self, String> {
        Ok(Self::new(build_http_client(timeout)?, base_url))
    }
}

#[async_trait]
impl CandleSource for KrakenSource {
    fn exchange(&self) -> Exchange {
        Exchange::Kraken
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FetchError> {
        let interval = kraken_interval(timeframe).ok_or(FetchError::UnsupportedTimeframe {
            exchange: Exchange::Kraken,
            timeframe,
        })?;
        let pair = kraken_symbol(symbol);
        let url = format!("{}/0/public/OHLC", self.base_url);
        // `since` is exclusive on Kraken's side
        let since = start.timestamp() - 1;

        let request_start = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("pair", pair.as_str()),
                ("interval", &interval.to_string()),
                ("since", &since.to_string()),
            ])
            .send()
            .await
            .map_err(|err| transport_error("kraken request failed", err))?;

        let status = response.status();
        metrics::histogram!(
            "candlekeep.infra.exchange.request_ms",
            "exchange" => "kraken",
            "status" => status.as_u16().to_string()
        )
        .record(request_start.elapsed().as_secs_f64() * 1000.0);
        if !status.is_success() {
            return Err(classify_status(status, "kraken request failed"));
        }

        let payload: KrakenResponse = response
            .json()
            .await
            .map_err(|err| FetchError::InvalidData(format!("kraken response parse failed: {err}")))?;
        let candles = parse_kraken_payload(payload, symbol, timeframe)?;
        let candles = clamp_to_window(candles, start, end);
        tracing::debug!(
            exchange = "kraken",
            symbol = %symbol,
            pair = %pair,
            timeframe = %timeframe,
            candles = candles.len(),
            "fetched candles"
        );
        Ok(candles)
    }
}

pub fn kraken_interval(timeframe: Timeframe) -> Option<u32> {
    match timeframe {
        Timeframe::M1 => Some(1),
        Timeframe::M5 => Some(5),
        Timeframe::M15 => Some(15),
        Timeframe::M30 => Some(30),
        Timeframe::H1 => Some(60),
        Timeframe::H4 => Some(240),
        Timeframe::D1 => Some(1440),
        _ => None,
    }
}

/// `BTCUSD` → `XBTUSD`.
pub fn kraken_symbol(symbol: &str) -> String {
    match split_pair(symbol) {
        Some((base, quote)) => {
            let base = if base == "BTC" { "XBT".to_string() } else { base };
            format!("{base}{quote}")
        }
        None => symbol.trim().to_uppercase(),
    }
}

fn classify_errors(errors: &[String]) -> FetchError {
    let message = format!("kraken error: {}", errors.join(", "));
    let has = |needle: &str| errors.iter().any(|e| e.contains(needle));
    if has("Rate limit") || has("Too many requests") {
        FetchError::RateLimited(message)
    } else if has("Unknown asset pair") {
        FetchError::NotFound(message)
    } else if has("EService") {
        FetchError::Transport(message)
    } else {
        FetchError::InvalidData(message)
    }
}

fn parse_kraken_payload(
    payload: KrakenResponse,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, FetchError> {
    if !payload.error.is_empty() {
        return Err(classify_errors(&payload.error));
    }
    let rows = payload
        .result
        .iter()
        .find(|(key, value)| key.as_str() != "last" && value.is_array())
        .and_then(|(_, value)| value.as_array())
        .ok_or_else(|| FetchError::InvalidData("kraken response has no OHLC rows".to_string()))?;
    parse_kraken_rows(rows, symbol, timeframe)
}

/// Rows are `[time, open, high, low, close, vwap, volume, count]` with
/// prices as strings.
pub fn parse_kraken_rows(
    rows: &[Value],
    symbol: &str,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, FetchError> {
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row
            .as_array()
            .filter(|fields| fields.len() >= 7)
            .ok_or_else(|| FetchError::InvalidData("unexpected candle row shape".to_string()))?;

        let ts = fields[0]
            .as_i64()
            .ok_or_else(|| FetchError::InvalidData(format!("invalid time: {}", fields[0])))?;
        let timestamp = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| FetchError::InvalidData(format!("invalid timestamp: {ts}")))?;

        candles.push(Candle {
            symbol: symbol.to_string(),
            exchange: Exchange::Kraken,
            timeframe,
            timestamp,
            open: value_f64(&fields[1], "open")?,
            high: value_f64(&fields[2], "high")?,
            low: value_f64(&fields[3], "low")?,
            close: value_f64(&fields[4], "close")?,
            vwap: Some(value_f64(&fields[5], "vwap")?),
            volume: value_f64(&fields[6], "volume")?,
            trade_count: fields.get(7).and_then(Value::as_u64),
            bid: None,
            ask: None,
        });
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn value_f64(value: &Value, field: &str) -> Result<f64, FetchError> {
    match value {
        Value::String(text) => parse_f64(text, field),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| FetchError::InvalidData(format!("invalid {field}: {number}"))),
        other => Err(FetchError::InvalidData(format!("invalid {field}: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{kraken_interval, kraken_symbol, parse_kraken_payload, KrakenResponse};
    use candlekeep_domain::repositories::market_data::FetchError;
    use candlekeep_domain::value_objects::timeframe::Timeframe;

    #[test]
    fn payload_rows_become_candles() {
        let payload: KrakenResponse = serde_json::from_str(
            r#"{"error":[],"result":{"XXBTZUSD":[
                [1704067200,"42000.0","42100.0","41900.0","42050.0","42010.5","12.5",340],
                [1704070800,"42050.0","42200.0","42000.0","42150.0","42100.0","8.25",210]
            ],"last":1704070800}}"#,
        )
        .unwrap();
        let candles = parse_kraken_payload(payload, "BTCUSD", Timeframe::H1).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].symbol, "BTCUSD");
        assert_eq!(candles[0].close, 42050.0);
        assert_eq!(candles[0].volume, 12.5);
        assert_eq!(candles[0].vwap, Some(42010.5));
        assert_eq!(candles[1].trade_count, Some(210));
        assert!(candles.iter().all(|c| c.is_aligned() && c.has_valid_ohlc()));
    }

    #[test]
    fn api_errors_are_classified() {
        let payload: KrakenResponse =
            serde_json::from_str(r#"{"error":["EAPI:Rate limit exceeded"]}"#).unwrap();
        assert!(matches!(
            parse_kraken_payload(payload, "BTCUSD", Timeframe::H1),
            Err(FetchError::RateLimited(_))
        ));
        let payload: KrakenResponse =
            serde_json::from_str(r#"{"error":["EQuery:Unknown asset pair"]}"#).unwrap();
        assert!(matches!(
            parse_kraken_payload(payload, "FOOBAR", Timeframe::H1),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn unsupported_intervals_and_symbol_mapping() {
        assert_eq!(kraken_interval(Timeframe::H4), Some(240));
        assert_eq!(kraken_interval(Timeframe::M3), None);
        assert_eq!(kraken_interval(Timeframe::H12), None);
        assert_eq!(kraken_symbol("BTCUSD"), "XBTUSD");
        assert_eq!(kraken_symbol("eth/eur"), "ETHEUR");
    }
}
