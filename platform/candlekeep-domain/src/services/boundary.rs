use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Floors `ts` to the open time of the candle that contains it.
///
/// Every [`Timeframe`] divides a UTC day, and the Unix epoch starts at UTC
/// midnight, so flooring epoch seconds is the same as flooring the minutes
/// elapsed since midnight (and yields midnight itself for `1d`).
pub fn align_down(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let seconds = ts.timestamp();
    let floored = seconds - seconds.rem_euclid(timeframe.step_seconds());
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// First boundary strictly after `ts`.
pub fn next_boundary_after(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let aligned = align_down(ts, timeframe);
    aligned
        .checked_add_signed(timeframe.duration())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Latest instant up to which every candle of `timeframe` has fully closed,
/// pulled back by `buffer_minutes`.
///
/// The result is an exclusive window end: at exactly 10:00:00 on `1h` it is
/// 10:00, so the candle that just opened at 10:00 is left out and the newest
/// collectable candle is the 09:00 one.
pub fn safe_end_time(
    now: DateTime<Utc>,
    timeframe: Timeframe,
    buffer_minutes: u32,
) -> DateTime<Utc> {
    let boundary = align_down(now, timeframe);
    boundary
        .checked_sub_signed(Duration::minutes(i64::from(buffer_minutes)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
