//! Store-backed gap detection, quality checks and targeted backfill.

use crate::cancel::CancelSignal;
use crate::collection::{CollectionService, TaskOutcome};
use candlekeep_domain::repositories::candle_store::{CandleQuery, CandleStore, StoreError};
use candlekeep_domain::services::quality::{self, DataGap, QualityReport};
use candlekeep_domain::value_objects::collection_task::CollectionTask;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

pub async fn detect_gaps(
    store: &dyn CandleStore,
    query: &CandleQuery,
) -> Result<Vec<DataGap>, StoreError> {
    let candles = store.query_candles(query).await?;
    Ok(quality::detect_gaps(
        &candles,
        query.start,
        query.end,
        query.timeframe,
    ))
}

pub async fn validate_quality(
    store: &dyn CandleStore,
    query: &CandleQuery,
) -> Result<QualityReport, StoreError> {
    let candles = store.query_candles(query).await?;
    let report = quality::validate_quality(&candles, query.start, query.end, query.timeframe);
    tracing::info!(
        symbol = %query.symbol,
        exchange = %query.exchange,
        timeframe = %query.timeframe,
        completeness = report.completeness,
        gaps = report.gaps.len(),
        invalid_ohlc = report.invalid_ohlc,
        duplicates = report.duplicate_timestamps,
        "quality report"
    );
    Ok(report)
}

/// One fetch window `[start, end)` produced by splitting a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub points: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeOutcome {
    pub range: PendingRange,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub ranges: Vec<RangeOutcome>,
    pub points_added: u64,
    pub remaining_gaps: Vec<DataGap>,
    pub elapsed_ms: u64,
}

/// Splits every gap into windows of at most `max_points` candles.
pub fn plan_ranges(gaps: &[DataGap], query: &CandleQuery, max_points: u32) -> Vec<PendingRange> {
    let step = query.timeframe.step_seconds();
    let max_points = u64::from(max_points.max(1));
    let mut ranges = Vec::new();
    for gap in gaps {
        let mut offset = 0u64;
        while offset < gap.missing_points {
            let points = max_points.min(gap.missing_points - offset);
            let start = gap.start + ChronoDuration::seconds(offset as i64 * step);
            let end = start + ChronoDuration::seconds(points as i64 * step);
            ranges.push(PendingRange { start, end, points });
            offset += points;
        }
    }
    ranges
}

/// Fetches every missing range of one series through the collection path,
/// then recomputes the gaps that are still open.
pub async fn populate_missing_data(
    service: &CollectionService,
    query: &CandleQuery,
    max_points_per_request: u32,
    cancel: &CancelSignal,
) -> Result<BackfillReport, StoreError> {
    let started = Instant::now();
    let store = service.store().as_ref();
    let gaps = detect_gaps(store, query).await?;

    let arena = plan_ranges(&gaps, query, max_points_per_request);
    let mut queue: VecDeque<usize> = (0..arena.len()).collect();
    tracing::info!(
        symbol = %query.symbol,
        exchange = %query.exchange,
        timeframe = %query.timeframe,
        gaps = gaps.len(),
        ranges = arena.len(),
        "backfill planned"
    );

    let mut ranges = Vec::with_capacity(arena.len());
    let mut points_added = 0u64;
    while let Some(idx) = queue.pop_front() {
        let range = arena[idx];
        let task = CollectionTask {
            symbol: query.symbol.clone(),
            exchange: query.exchange.as_str().to_string(),
            timeframe: query.timeframe,
            window_start: range.start,
            window_end: range.end,
        };
        let report = service.run_task(task, cancel).await;
        if let Some(count) = report.outcome.stored() {
            points_added += count;
        }
        ranges.push(RangeOutcome {
            range,
            outcome: report.outcome,
        });
    }

    let remaining_gaps = detect_gaps(store, query).await?;
    let report = BackfillReport {
        ranges,
        points_added,
        remaining_gaps,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        points_added = report.points_added,
        remaining_gaps = report.remaining_gaps.len(),
        elapsed_ms = report.elapsed_ms,
        "backfill finished"
    );
    Ok(report)
}
