use super::{build_http_client, clamp_to_window, classify_status, parse_f64, split_pair, transport_error};
use async_trait::async_trait;
use candlekeep_domain::repositories::market_data::{CandleSource, FetchError};
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub const KUCOIN_SPOT_BASE: &str = "https://api.kucoin.com";
const KUCOIN_SPOT_LIMIT: i64 = 1500;
const KUCOIN_OK: &str = "200000";

#[derive(Debug, Deserialize)]
struct KucoinResponse {
    code: String,
    #[serde(default)]
    data: Vec<Vec<String>>,
    #[serde(default)]
    msg: Option<String>,
}

/// KuCoin spot klines (`/api/v1/market/candles`).
#[derive(Debug, Clone)]
pub struct KucoinSource {
    client: Client,
    base_url: String,
}

impl KucoinSource {
    pub fn new(client: Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or(KUCOIN_SPOT_BASE)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn with_timeout(base_url: Option<&str>, timeout: Duration) -> Result<Self, String> {
        Ok(Self::new(build_http_client(timeout)?, base_url))
    }

    async fn fetch_window(
        &self,
        pair: &str,
        interval: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Vec<String>>, FetchError> {
        let url = format!("{}/api/v1/market/candles", self.base_url);
        let request_start = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", pair),
                ("type", interval),
                ("startAt", &start.to_string()),
                ("endAt", &end.to_string()),
            ])
            .send()
            .await
            .map_err(|err| transport_error("kucoin request failed", err))?;

        let status = response.status();
        metrics::histogram!(
            "candlekeep.infra.exchange.request_ms",
            "exchange" => "kucoin",
            "status" => status.as_u16().to_string()
        )
        .record(request_start.elapsed().as_secs_f64() * 1000.0);
        if !status.is_success() {
            return Err(classify_status(status, "kucoin request failed"));
        }

        let payload: KucoinResponse = response
            .json()
            .await
            .map_err(|err| FetchError::InvalidData(format!("kucoin response parse failed: {err}")))?;
        check_code(&payload)?;
        Ok(payload.data)
    }
}

#[async_trait]
impl CandleSource for KucoinSource {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FetchError> {
        let pair = kucoin_symbol(symbol);
        let interval = kucoin_interval(timeframe);
        let step = timeframe.step_seconds();
        let span = step * KUCOIN_SPOT_LIMIT;
        let end_s = end.timestamp();

        let mut candles = Vec::new();
        let mut window_start = start.timestamp();
        while window_start < end_s {
            let window_end = (window_start + span).min(end_s);
            let rows = self
                .fetch_window(&pair, interval, window_start, window_end)
                .await?;
            candles.extend(parse_kucoin_rows(&rows, symbol, timeframe)?);
            window_start = window_end;
        }

        let candles = clamp_to_window(candles, start, end);
        tracing::debug!(
            exchange = "kucoin",
            symbol = %symbol,
            pair = %pair,
            timeframe = %timeframe,
            candles = candles.len(),
            "fetched candles"
        );
        Ok(candles)
    }
}

pub fn kucoin_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1min",
        Timeframe::M3 => "3min",
        Timeframe::M5 => "5min",
        Timeframe::M15 => "15min",
        Timeframe::M30 => "30min",
        Timeframe::H1 => "1hour",
        Timeframe::H2 => "2hour",
        Timeframe::H4 => "4hour",
        Timeframe::H6 => "6hour",
        Timeframe::H8 => "8hour",
        Timeframe::H12 => "12hour",
        Timeframe::D1 => "1day",
    }
}

/// `BTCUSD` → `BTC-USDT`; KuCoin quotes dollar pairs in USDT.
pub fn kucoin_symbol(symbol: &str) -> String {
    match split_pair(symbol) {
        Some((base, quote)) => {
            let quote = if quote == "USD" { "USDT".to_string() } else { quote };
            format!("{base}-{quote}")
        }
        None => symbol.trim().to_uppercase(),
    }
}

fn check_code(payload: &KucoinResponse) -> Result<(), FetchError> {
    if payload.code == KUCOIN_OK {
        return Ok(());
    }
    let message = format!(
        "kucoin error code {}: {}",
        payload.code,
        payload.msg.as_deref().unwrap_or("no message")
    );
    Err(match payload.code.as_str() {
        "429000" => FetchError::RateLimited(message),
        "900001" => FetchError::NotFound(message),
        code if code.starts_with('5') => FetchError::Transport(message),
        _ => FetchError::InvalidData(message),
    })
}

/// Rows are `[time, open, close, high, low, volume, turnover]`, newest first.
pub fn parse_kucoin_rows(
    rows: &[Vec<String>],
    symbol: &str,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, FetchError> {
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < 6 {
            return Err(FetchError::InvalidData(
                "unexpected candle row length".to_string(),
            ));
        }

        let ts = parse_epoch_value(&row[0])?;
        let timestamp = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| FetchError::InvalidData(format!("invalid timestamp: {ts}")))?;

        let open = parse_f64(&row[1], "open")?;
        let close = parse_f64(&row[2], "close")?;
        let high = parse_f64(&row[3], "high")?;
        let low = parse_f64(&row[4], "low")?;
        let volume = parse_f64(&row[5], "volume")?;
        let turnover = match row.get(6) {
            Some(value) => Some(parse_f64(value, "turnover")?),
            None => None,
        };

        candles.push(Candle {
            symbol: symbol.to_string(),
            exchange: Exchange::Kucoin,
            timeframe,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            vwap: turnover.filter(|_| volume > 0.0).map(|t| t / volume),
            trade_count: None,
            bid: None,
            ask: None,
        });
    }

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_epoch_value(value: &str) -> Result<i64, FetchError> {
    let ts = value
        .parse::<i64>()
        .map_err(|_| FetchError::InvalidData(format!("invalid epoch: {value}")))?;
    if ts > 1_000_000_000_000 {
        Ok(ts / 1000)
    } else {
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::{check_code, kucoin_interval, kucoin_symbol, parse_kucoin_rows, KucoinResponse};
    use candlekeep_domain::repositories::market_data::FetchError;
    use candlekeep_domain::value_objects::timeframe::Timeframe;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn rows_parse_oldest_first() {
        let rows = vec![
            row(&["1704070800", "101", "102", "103", "100", "2", "204"]),
            row(&["1704067200", "100", "101", "102", "99", "0", "0"]),
        ];
        let candles = parse_kucoin_rows(&rows, "BTCUSD", Timeframe::H1).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp.timestamp(), 1_704_067_200);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[0].high, 102.0);
        assert_eq!(candles[0].vwap, None);
        assert_eq!(candles[1].vwap, Some(102.0));
        assert_eq!(candles[1].symbol, "BTCUSD");
        assert!(candles.iter().all(|c| c.has_valid_ohlc()));
    }

    #[test]
    fn malformed_rows_are_invalid_data() {
        let short = vec![row(&["1704067200", "1", "1"])];
        assert!(matches!(
            parse_kucoin_rows(&short, "BTCUSD", Timeframe::H1),
            Err(FetchError::InvalidData(_))
        ));
        let bad_number = vec![row(&["1704067200", "x", "1", "1", "1", "1"])];
        assert!(parse_kucoin_rows(&bad_number, "BTCUSD", Timeframe::H1).is_err());
    }

    #[test]
    fn error_codes_are_classified() {
        let payload: KucoinResponse =
            serde_json::from_str(r#"{"code":"429000","msg":"Too Many Requests"}"#).unwrap();
        assert!(matches!(check_code(&payload), Err(FetchError::RateLimited(_))));
        let payload: KucoinResponse =
            serde_json::from_str(r#"{"code":"200000","data":[]}"#).unwrap();
        assert!(check_code(&payload).is_ok());
    }

    #[test]
    fn symbols_and_intervals_map_to_kucoin_names() {
        assert_eq!(kucoin_symbol("BTCUSD"), "BTC-USDT");
        assert_eq!(kucoin_symbol("eth-btc"), "ETH-BTC");
        assert_eq!(kucoin_interval(Timeframe::H4), "4hour");
        assert_eq!(kucoin_interval(Timeframe::D1), "1day");
    }
}
