//! Hour-aligned collection cycles over the configured frequency tiers.

use crate::cancel::CancelSignal;
use crate::collection::{AdapterSet, CollectionRequest, CollectionService, CollectionSummary};
use crate::config::{CollectorConfig, ConfigError, ConfigProvider, TierConfig};
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::services::boundary::{align_down, next_boundary_after, safe_end_time};
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Sub-hour and hourly tiers run every tick, multi-hour tiers when the hour
/// is a multiple of their length (daily therefore only at midnight).
pub fn is_due(timeframe: Timeframe, hour: u32) -> bool {
    let minutes = timeframe.minutes();
    if minutes <= 60 {
        return true;
    }
    let hours = minutes / 60;
    i64::from(hour) % hours == 0
}

pub fn due_tiers(tiers: &[TierConfig], hour: u32) -> Vec<&TierConfig> {
    tiers
        .iter()
        .filter(|tier| tier.enabled && is_due(tier.timeframe, hour))
        .collect()
}

/// Next hourly fire time after a cycle that was fired at `fired_at` and
/// returned at `finished_at`, plus how many hourly ticks were skipped
/// because the cycle overran them.
pub fn next_fire_after(
    fired_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> (DateTime<Utc>, u32) {
    let planned = next_boundary_after(fired_at, Timeframe::H1);
    if finished_at < planned {
        return (planned, 0);
    }
    let next = next_boundary_after(finished_at, Timeframe::H1);
    let overrun = align_down(finished_at, Timeframe::H1) - planned;
    let skipped = overrun.num_hours() + 1;
    (next, u32::try_from(skipped).unwrap_or(u32::MAX))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierReport {
    pub timeframe: Timeframe,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub summary: Option<CollectionSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub fired_at: DateTime<Utc>,
    pub hour: u32,
    pub tiers: Vec<TierReport>,
    pub cancelled: bool,
}

/// Drives collection cycles. Configuration is loaded fresh for every cycle;
/// the only state carried between ticks is the next fire time.
pub struct Scheduler<P> {
    provider: P,
    adapters: AdapterSet,
    store: Arc<dyn CandleStore>,
    next_fire: Option<DateTime<Utc>>,
}

impl<P: ConfigProvider> Scheduler<P> {
    pub fn new(provider: P, adapters: AdapterSet, store: Arc<dyn CandleStore>) -> Self {
        Self {
            provider,
            adapters,
            store,
            next_fire: None,
        }
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire
    }

    /// One cycle at `now`: load and validate config, then run due tiers one
    /// after another. A tier error is recorded and the next tier still runs;
    /// a configuration error aborts the cycle.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> Result<CycleReport, ConfigError> {
        let config = self.provider.load()?;
        config.validate()?;
        Ok(run_tiers(&config, &self.adapters, &self.store, now, cancel).await)
    }

    /// Immediate cycle, then one per top of the hour until cancelled.
    /// Ticks that pass while a cycle is still running are skipped.
    pub async fn run(&mut self, cancel: &CancelSignal) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let fired_at = Utc::now();
            let span = tracing::info_span!("app.schedule.cycle", fired_at = %fired_at);
            match self.run_cycle(fired_at, cancel).instrument(span).await {
                Ok(report) => tracing::info!(
                    tiers = report.tiers.len(),
                    cancelled = report.cancelled,
                    "collection cycle finished"
                ),
                Err(err) => tracing::error!(error = %err, "collection cycle aborted"),
            }

            let (next, skipped) = next_fire_after(fired_at, Utc::now());
            if skipped > 0 {
                tracing::warn!(skipped, next_fire = %next, "cycle overran scheduled ticks");
            }
            self.next_fire = Some(next);

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next_fire = %next, wait_s = wait.as_secs(), "scheduler idle");
            if !cancel.sleep_or_cancel(wait).await {
                break;
            }
        }
        tracing::info!("scheduler stopped");
    }
}

async fn run_tiers(
    config: &CollectorConfig,
    adapters: &AdapterSet,
    store: &Arc<dyn CandleStore>,
    now: DateTime<Utc>,
    cancel: &CancelSignal,
) -> CycleReport {
    let hour = now.hour();
    let service = CollectionService::new(
        adapters.clone(),
        Arc::clone(store),
        config.collection_settings(),
    );
    let mut report = CycleReport {
        fired_at: now,
        hour,
        tiers: Vec::new(),
        cancelled: false,
    };

    for (idx, tier) in due_tiers(&config.tiers, hour).into_iter().enumerate() {
        if idx > 0 && !cancel.sleep_or_cancel(config.tier_pause()).await {
            report.cancelled = true;
            break;
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let window_end = safe_end_time(now, tier.timeframe, config.collector.safety_buffer_minutes);
        let window_start = window_end - ChronoDuration::minutes(i64::from(tier.lookback_minutes));
        let request = CollectionRequest {
            symbols: config.collector.symbols.clone(),
            exchanges: config.collector.exchanges.clone(),
            timeframes: vec![tier.timeframe],
            start: window_start,
            end: window_end,
        };

        let span = tracing::info_span!("app.schedule.tier", timeframe = %tier.timeframe);
        let result = service.collect_recent_data(&request, cancel).instrument(span).await;
        let tier_report = match result {
            Ok(summary) => TierReport {
                timeframe: tier.timeframe,
                window_start,
                window_end,
                summary: Some(summary),
                error: None,
            },
            Err(err) => {
                tracing::error!(timeframe = %tier.timeframe, error = %err, "tier failed");
                TierReport {
                    timeframe: tier.timeframe,
                    window_start,
                    window_end,
                    summary: None,
                    error: Some(err.to_string()),
                }
            }
        };
        report.tiers.push(tier_report);
    }

    report
}
