use super::closes;
use super::rolling::RollingDeltas;
use crate::value_objects::candle::Candle;

pub const DEFAULT_RSI_PERIOD: usize = 14;

pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    rsi_series(candles, period).last().copied().flatten()
}

/// Simple-average RSI over the trailing `period` deltas. The first value is
/// at index `period`, since `period` deltas need `period + 1` closes.
pub fn rsi_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut deltas = RollingDeltas::new(period);
    closes(candles)
        .into_iter()
        .map(|close| {
            let (avg_gain, avg_loss) = deltas.update(close)?;
            Some(rsi_from_averages(avg_gain, avg_loss))
        })
        .collect()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}
