#![allow(dead_code)]

use async_trait::async_trait;
use candlekeep_application::cancel::CancelSignal;
use candlekeep_domain::repositories::market_data::{CandleSource, FetchError};
use candlekeep_domain::services::boundary::align_down;
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    Contiguous,
    Empty,
    AlwaysFail(FetchError),
    FailTimes(u32, FetchError),
    Panic,
}

/// Test double that counts calls and tracks how many fetches overlap.
pub struct ScriptedSource {
    exchange: Exchange,
    behavior: Behavior,
    delay: Duration,
    cancel_on_fetch: Option<CancelSignal>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<(String, Timeframe, DateTime<Utc>, DateTime<Utc>)>>,
}

impl ScriptedSource {
    pub fn new(exchange: Exchange, behavior: Behavior) -> Self {
        Self {
            exchange,
            behavior,
            delay: Duration::ZERO,
            cancel_on_fetch: None,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn cancelling(mut self, cancel: CancelSignal) -> Self {
        self.cancel_on_fetch = Some(cancel);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, Timeframe, DateTime<Utc>, DateTime<Utc>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CandleSource for ScriptedSource {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .push((symbol.to_string(), timeframe, start, end));
        if let Some(cancel) = &self.cancel_on_fetch {
            cancel.cancel();
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Contiguous => Ok(contiguous(symbol, self.exchange, timeframe, start, end)),
            Behavior::Empty => Ok(Vec::new()),
            Behavior::AlwaysFail(err) => Err(err.clone()),
            Behavior::FailTimes(times, err) if call <= *times => Err(err.clone()),
            Behavior::FailTimes(..) => Ok(contiguous(symbol, self.exchange, timeframe, start, end)),
            Behavior::Panic => panic!("adapter exploded"),
        }
    }
}

pub fn contiguous(
    symbol: &str,
    exchange: Exchange,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Candle> {
    let mut ts = align_down(start, timeframe);
    if ts < start {
        ts += timeframe.duration();
    }
    let mut candles = Vec::new();
    while ts < end {
        candles.push(candle(symbol, exchange, timeframe, ts, 100.0 + candles.len() as f64));
        ts += timeframe.duration();
    }
    candles
}

pub fn candle(
    symbol: &str,
    exchange: Exchange,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    close: f64,
) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        exchange,
        timeframe,
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 2.0,
        vwap: None,
        trade_count: None,
        bid: None,
        ask: None,
    }
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, h, m, 0).unwrap()
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
