use super::VwapBands;
use crate::value_objects::candle::Candle;

/// VWAP over the trailing `window` candles, or the whole slice when `None`.
pub fn vwap(candles: &[Candle], window: Option<usize>) -> Option<f64> {
    vwap_bands(candles, window, 0.0).map(|bands| bands.vwap)
}

/// VWAP with bands at `k` population standard deviations of typical price.
pub fn vwap_bands(candles: &[Candle], window: Option<usize>, k: f64) -> Option<VwapBands> {
    vwap_bands_series(candles, window, k).last().copied().flatten()
}

pub fn vwap_series(candles: &[Candle], window: Option<usize>) -> Vec<Option<f64>> {
    vwap_bands_series(candles, window, 0.0)
        .into_iter()
        .map(|bands| bands.map(|b| b.vwap))
        .collect()
}

/// With `window = None` every index is anchored at the first candle
/// (session-style cumulative VWAP).
pub fn vwap_bands_series(
    candles: &[Candle],
    window: Option<usize>,
    k: f64,
) -> Vec<Option<VwapBands>> {
    if window == Some(0) {
        return vec![None; candles.len()];
    }

    // prefix sums: price*volume, volume, typical, typical^2
    let mut prefix = Vec::with_capacity(candles.len() + 1);
    prefix.push([0.0f64; 4]);
    for candle in candles {
        let tp = candle.typical_price();
        let last = prefix[prefix.len() - 1];
        prefix.push([
            last[0] + tp * candle.volume,
            last[1] + candle.volume,
            last[2] + tp,
            last[3] + tp * tp,
        ]);
    }

    (0..candles.len())
        .map(|idx| {
            let end = idx + 1;
            let start = match window {
                Some(w) if end < w => return None,
                Some(w) => end - w,
                None => 0,
            };
            let pv = prefix[end][0] - prefix[start][0];
            let volume = prefix[end][1] - prefix[start][1];
            if volume <= 0.0 {
                return None;
            }
            let n = (end - start) as f64;
            let mean_tp = (prefix[end][2] - prefix[start][2]) / n;
            let var = (prefix[end][3] - prefix[start][3]) / n - mean_tp * mean_tp;
            let std_dev = var.max(0.0).sqrt();
            let vwap = pv / volume;
            Some(VwapBands {
                vwap,
                upper: vwap + k * std_dev,
                lower: vwap - k * std_dev,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{vwap, vwap_bands, vwap_series};
    use crate::services::indicators::test_support::ohlcv;

    #[test]
    fn weights_typical_price_by_volume() {
        let candles = vec![ohlcv(12.0, 9.0, 9.0, 1.0), ohlcv(21.0, 18.0, 21.0, 3.0)];
        // typical prices 10 and 20
        assert_eq!(vwap(&candles, None), Some(17.5));
        assert_eq!(vwap(&candles, Some(1)), Some(20.0));
        assert_eq!(vwap(&candles, Some(3)), None);
        assert_eq!(vwap_series(&candles, None), vec![Some(10.0), Some(17.5)]);
    }

    #[test]
    fn zero_volume_window_is_none() {
        let candles = vec![ohlcv(12.0, 9.0, 9.0, 0.0)];
        assert_eq!(vwap(&candles, None), None);
        assert_eq!(vwap(&candles, Some(0)), None);
    }

    #[test]
    fn bands_spread_by_typical_price_std_dev() {
        let candles = vec![ohlcv(12.0, 9.0, 9.0, 1.0), ohlcv(21.0, 18.0, 21.0, 1.0)];
        let bands = vwap_bands(&candles, None, 2.0).unwrap();
        assert!((bands.vwap - 15.0).abs() < 1e-12);
        assert!((bands.upper - 25.0).abs() < 1e-9);
        assert!((bands.lower - 5.0).abs() < 1e-9);
    }
}
