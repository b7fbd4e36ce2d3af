use super::rolling::RollingSma;
use super::{closes, MacdValue};
use crate::value_objects::candle::Candle;

pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    sma_series(candles, period).last().copied().flatten()
}

pub fn sma_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    sma_values(&closes(candles), period)
}

pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    ema_series(candles, period).last().copied().flatten()
}

pub fn ema_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    ema_values(&closes(candles), period)
}

pub fn macd(candles: &[Candle], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    macd_series(candles, fast, slow, signal)
        .last()
        .copied()
        .flatten()
}

/// Present from the index where the signal line has its first value.
pub fn macd_series(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<Option<MacdValue>> {
    let values = closes(candles);
    let mut out = vec![None; values.len()];
    if fast == 0 || slow == 0 || signal == 0 {
        return out;
    }

    let fast_ema = ema_values(&values, fast);
    let slow_ema = ema_values(&values, slow);
    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let Some(first) = line.iter().position(Option::is_some) else {
        return out;
    };
    let line_history: Vec<f64> = line[first..].iter().flatten().copied().collect();
    let signal_line = ema_values(&line_history, signal);

    for (offset, signal_value) in signal_line.into_iter().enumerate() {
        let idx = first + offset;
        if let (Some(signal_value), Some(line_value)) = (signal_value, line[idx]) {
            out[idx] = Some(MacdValue {
                macd: line_value,
                signal: signal_value,
                histogram: line_value - signal_value,
            });
        }
    }
    out
}

pub(crate) fn sma_values(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rolling = RollingSma::new(period);
    values.iter().map(|v| rolling.update(*v)).collect()
}

/// Seeded with the SMA of the first `period` values.
pub(crate) fn ema_values(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for (idx, value) in values.iter().enumerate().skip(period) {
        prev = (value - prev) * alpha + prev;
        out[idx] = Some(prev);
    }
    out
}
