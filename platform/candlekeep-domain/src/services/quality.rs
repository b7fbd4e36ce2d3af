use crate::value_objects::candle::Candle;
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Missing candles `start..=end` (open times of the first and last missing slot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataGap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub missing_points: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_points: usize,
    pub unique_points: usize,
    pub expected_points: u64,
    pub completeness: f64,
    pub invalid_ohlc: usize,
    pub zero_volume: usize,
    pub duplicate_timestamps: usize,
    pub out_of_range: usize,
    pub missing_points: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub first_invalid_ohlc: Option<DateTime<Utc>>,
    pub first_duplicate: Option<DateTime<Utc>>,
    pub gaps: Vec<DataGap>,
}

impl QualityReport {
    /// Gaps and zero-volume candles lower completeness but do not invalidate.
    pub fn is_valid(&self) -> bool {
        self.invalid_ohlc == 0 && self.duplicate_timestamps == 0
    }
}

/// Number of whole candle slots in `[start, end)`, counted from the first
/// boundary at or after `start`.
pub fn expected_points(start: DateTime<Utc>, end: DateTime<Utc>, timeframe: Timeframe) -> u64 {
    let span = end.timestamp() - first_slot(start, timeframe);
    if span <= 0 {
        return 0;
    }
    (span / timeframe.step_seconds()) as u64
}

/// Open time (epoch seconds) of the first slot that starts at or after `start`.
fn first_slot(start: DateTime<Utc>, timeframe: Timeframe) -> i64 {
    let step = timeframe.step_seconds();
    let seconds = start.timestamp();
    match seconds.rem_euclid(step) {
        0 => seconds,
        rem => seconds - rem + step,
    }
}

/// Walks the series and reports every run of missing slots, including a gap
/// before the first and after the last stored candle. Candles outside
/// `[start, end)` and repeated timestamps are ignored.
pub fn detect_gaps(
    candles: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeframe: Timeframe,
) -> Vec<DataGap> {
    let expected = expected_points(start, end, timeframe);
    if expected == 0 {
        return Vec::new();
    }

    let step = timeframe.step_seconds();
    let start_s = first_slot(start, timeframe);
    let last_slot = start_s + (expected as i64 - 1) * step;

    let mut stamps = in_range_timestamps(candles, to_utc(start_s), end);
    stamps.sort_unstable();
    stamps.dedup();

    let mut gaps = Vec::new();
    let mut next_expected = start_s;
    for ts in stamps {
        if ts > next_expected {
            let missing = (ts - next_expected + step - 1) / step;
            gaps.push(gap(next_expected, next_expected + (missing - 1) * step, missing));
        }
        next_expected = next_expected.max(ts + step);
    }

    if next_expected <= last_slot {
        let missing = (last_slot - next_expected) / step + 1;
        gaps.push(gap(next_expected, last_slot, missing));
    }

    gaps
}

/// Per-candle anomaly counts plus completeness over `[start, end)`.
pub fn validate_quality(
    candles: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeframe: Timeframe,
) -> QualityReport {
    let mut report = QualityReport {
        total_points: candles.len(),
        expected_points: expected_points(start, end, timeframe),
        ..QualityReport::default()
    };

    let mut seen: HashSet<i64> = HashSet::with_capacity(candles.len());
    for candle in candles {
        let ts = candle.timestamp;

        if !candle.has_valid_ohlc() {
            report.invalid_ohlc += 1;
            if report.first_invalid_ohlc.is_none() {
                report.first_invalid_ohlc = Some(ts);
            }
        }
        if candle.is_zero_volume() {
            report.zero_volume += 1;
        }
        if ts < start || ts >= end {
            report.out_of_range += 1;
        }
        if !seen.insert(ts.timestamp()) {
            report.duplicate_timestamps += 1;
            if report.first_duplicate.is_none() {
                report.first_duplicate = Some(ts);
            }
        }

        report.first_timestamp = Some(report.first_timestamp.map_or(ts, |first| first.min(ts)));
        report.last_timestamp = Some(report.last_timestamp.map_or(ts, |last| last.max(ts)));
    }

    let mut unique = in_range_timestamps(candles, to_utc(first_slot(start, timeframe)), end);
    unique.sort_unstable();
    unique.dedup();
    report.unique_points = unique.len();

    report.completeness = if report.expected_points == 0 {
        1.0
    } else {
        (report.unique_points as f64 / report.expected_points as f64).clamp(0.0, 1.0)
    };

    report.gaps = detect_gaps(candles, start, end, timeframe);
    report.missing_points = report.gaps.iter().map(|g| g.missing_points).sum();
    report
}

fn in_range_timestamps(candles: &[Candle], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<i64> {
    candles
        .iter()
        .filter(|c| c.timestamp >= start && c.timestamp < end)
        .map(|c| c.timestamp.timestamp())
        .collect()
}

fn gap(start: i64, end: i64, missing: i64) -> DataGap {
    DataGap {
        start: to_utc(start),
        end: to_utc(end),
        missing_points: missing.max(0) as u64,
    }
}

fn to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
