use super::rolling::{RollingSma, RollingStd};
use super::BollingerBands;
use crate::value_objects::candle::Candle;

pub const DEFAULT_BOLLINGER_PERIOD: usize = 20;
pub const DEFAULT_BOLLINGER_K: f64 = 2.0;
pub const DEFAULT_ATR_PERIOD: usize = 14;

pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> Option<BollingerBands> {
    bollinger_series(candles, period, k)
        .last()
        .copied()
        .flatten()
}

pub fn bollinger_series(candles: &[Candle], period: usize, k: f64) -> Vec<Option<BollingerBands>> {
    let mut rolling = RollingStd::new(period);
    candles
        .iter()
        .map(|candle| {
            let (middle, std_dev) = rolling.update(candle.close)?;
            Some(BollingerBands {
                upper: middle + k * std_dev,
                middle,
                lower: middle - k * std_dev,
            })
        })
        .collect()
}

/// `max(high - low, |high - prev_close|, |low - prev_close|)`; the first
/// candle has no previous close and uses `high - low`.
pub fn true_range_series(candles: &[Candle]) -> Vec<f64> {
    let mut prev_close: Option<f64> = None;
    candles
        .iter()
        .map(|candle| {
            let range = candle.high - candle.low;
            let tr = match prev_close {
                Some(prev) => range
                    .max((candle.high - prev).abs())
                    .max((candle.low - prev).abs()),
                None => range,
            };
            prev_close = Some(candle.close);
            tr
        })
        .collect()
}

pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied().flatten()
}

pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut rolling = RollingSma::new(period);
    true_range_series(candles)
        .into_iter()
        .map(|tr| rolling.update(tr))
        .collect()
}
