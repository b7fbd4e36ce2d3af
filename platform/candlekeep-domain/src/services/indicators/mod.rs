//! Technical indicators computed over candle closes and ranges.
//!
//! Every `*_series` function returns one entry per input candle, `None` until
//! the indicator has enough history. The scalar variants return the last entry.

mod momentum;
mod rolling;
mod trend;
mod volatility;
mod volume;

pub use momentum::{rsi, rsi_series, DEFAULT_RSI_PERIOD};
pub use trend::{ema, ema_series, macd, macd_series, sma, sma_series};
pub use volatility::{
    atr, atr_series, bollinger, bollinger_series, true_range_series, DEFAULT_ATR_PERIOD,
    DEFAULT_BOLLINGER_K, DEFAULT_BOLLINGER_PERIOD,
};
pub use volume::{vwap, vwap_bands, vwap_bands_series, vwap_series};

use crate::value_objects::candle::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VwapBands {
    pub vwap: f64,
    pub upper: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorSettings {
    pub sma_period: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub atr_period: usize,
    /// Trailing window for VWAP; `None` anchors at the first candle.
    pub vwap_window: Option<usize>,
    pub vwap_band_k: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_period: 20,
            ema_period: 20,
            rsi_period: DEFAULT_RSI_PERIOD,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: DEFAULT_BOLLINGER_PERIOD,
            bollinger_k: DEFAULT_BOLLINGER_K,
            atr_period: DEFAULT_ATR_PERIOD,
            vwap_window: None,
            vwap_band_k: 2.0,
        }
    }
}

/// Latest value of every indicator for one candle series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub close: Option<f64>,
    pub sma: Option<f64>,
    pub ema: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BollingerBands>,
    pub atr: Option<f64>,
    pub vwap: Option<VwapBands>,
}

impl IndicatorSnapshot {
    pub fn compute(candles: &[Candle], settings: &IndicatorSettings) -> Self {
        let last = candles.last();
        Self {
            timestamp: last.map(|c| c.timestamp),
            close: last.map(|c| c.close),
            sma: sma(candles, settings.sma_period),
            ema: ema(candles, settings.ema_period),
            rsi: rsi(candles, settings.rsi_period),
            macd: macd(
                candles,
                settings.macd_fast,
                settings.macd_slow,
                settings.macd_signal,
            ),
            bollinger: bollinger(candles, settings.bollinger_period, settings.bollinger_k),
            atr: atr(candles, settings.atr_period),
            vwap: vwap_bands(candles, settings.vwap_window, settings.vwap_band_k),
        }
    }
}

pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
