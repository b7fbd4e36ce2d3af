use crate::obs;
use crate::wiring;
use candlekeep_application::cancel::CancelSignal;
use candlekeep_application::collection::{CollectionRequest, CollectionService};
use candlekeep_application::config::{load_config, CollectorConfig, FileConfigProvider, TierConfig};
use candlekeep_application::integrity;
use candlekeep_application::schedule::{Scheduler, TierReport};
use candlekeep_domain::repositories::candle_store::{CandleQuery, CandleStore};
use candlekeep_domain::services::boundary::safe_end_time;
use candlekeep_domain::services::indicators::IndicatorSnapshot;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

pub struct SeriesArgs {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub start: String,
    pub end: Option<String>,
}

pub enum Command {
    Run,
    Collect { timeframes: Vec<String> },
    Gaps(SeriesArgs),
    Quality(SeriesArgs),
    Backfill(SeriesArgs),
    Indicators(SeriesArgs),
    Migrate { migrations_path: PathBuf },
}

pub fn run(config_path: &Path, command: Command, metrics_addr: Option<&str>) -> Result<(), String> {
    let config = load_config(config_path).map_err(|err| err.to_string())?;
    obs::init_tracing(&config)?;
    obs::init_metrics(obs::metrics_listen(metrics_addr, &config))?;

    match command {
        Command::Run => run_scheduler(config_path, &config),
        Command::Collect { timeframes } => run_collect(&config, &timeframes),
        Command::Gaps(args) => run_gaps(&config, &args),
        Command::Quality(args) => run_quality(&config, &args),
        Command::Backfill(args) => run_backfill(&config, &args),
        Command::Indicators(args) => run_indicators(&config, &args),
        Command::Migrate { migrations_path } => run_migrate(&config, &migrations_path),
    }
}

// The postgres pool is built before the runtime exists; its blocking client
// must not be driven from inside an async context.
fn runtime() -> Result<Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to start tokio runtime: {err}"))
}

fn cancel_on_interrupt() -> CancelSignal {
    let cancel = CancelSignal::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            watcher.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| format!("failed to encode output: {err}"))?;
    println!("{text}");
    Ok(())
}

fn series_query(args: &SeriesArgs) -> Result<CandleQuery, String> {
    wiring::series_query(
        &args.symbol,
        &args.exchange,
        &args.timeframe,
        &args.start,
        args.end.as_deref(),
    )
}

fn describe(query: &CandleQuery) -> serde_json::Value {
    json!({
        "symbol": query.symbol,
        "exchange": query.exchange.as_str(),
        "timeframe": query.timeframe.label(),
        "start": query.start,
        "end": query.end,
    })
}

/// Configuration is validated per cycle by the scheduler; a bad file only
/// aborts that cycle.
fn run_scheduler(config_path: &Path, config: &CollectorConfig) -> Result<(), String> {
    let store = wiring::build_store(config)?;
    let adapters = wiring::build_adapters(config)?;
    let provider = FileConfigProvider::new(config_path);

    runtime()?.block_on(async move {
        let cancel = cancel_on_interrupt();
        let mut scheduler = Scheduler::new(provider, adapters, store);
        scheduler.run(&cancel).await;
    });
    Ok(())
}

/// Enabled tiers matching `filter` (all enabled tiers when empty).
fn selected_tiers<'a>(
    config: &'a CollectorConfig,
    filter: &[String],
) -> Result<Vec<&'a TierConfig>, String> {
    let wanted = filter
        .iter()
        .map(|raw| Timeframe::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let tiers: Vec<&TierConfig> = config
        .tiers
        .iter()
        .filter(|tier| tier.enabled && (wanted.is_empty() || wanted.contains(&tier.timeframe)))
        .collect();
    if tiers.is_empty() {
        return Err("no enabled tier matches the requested timeframes".to_string());
    }
    Ok(tiers)
}

fn run_collect(config: &CollectorConfig, timeframes: &[String]) -> Result<(), String> {
    config.validate().map_err(|err| err.to_string())?;
    let tiers = selected_tiers(config, timeframes)?;
    let store = wiring::build_store(config)?;
    let adapters = wiring::build_adapters(config)?;
    let service = CollectionService::new(adapters, store, config.collection_settings());
    let now = Utc::now();

    let reports = runtime()?.block_on(async {
        let cancel = cancel_on_interrupt();
        let mut reports = Vec::with_capacity(tiers.len());
        for tier in tiers {
            if cancel.is_cancelled() {
                break;
            }
            let window_end =
                safe_end_time(now, tier.timeframe, config.collector.safety_buffer_minutes);
            let window_start =
                window_end - ChronoDuration::minutes(i64::from(tier.lookback_minutes));
            let request = CollectionRequest {
                symbols: config.collector.symbols.clone(),
                exchanges: config.collector.exchanges.clone(),
                timeframes: vec![tier.timeframe],
                start: window_start,
                end: window_end,
            };
            let (summary, error) = match service.collect_recent_data(&request, &cancel).await {
                Ok(summary) => (Some(summary), None),
                Err(err) => (None, Some(err.to_string())),
            };
            reports.push(TierReport {
                timeframe: tier.timeframe,
                window_start,
                window_end,
                summary,
                error,
            });
        }
        reports
    });

    print_json(&reports)
}

fn run_gaps(config: &CollectorConfig, args: &SeriesArgs) -> Result<(), String> {
    let query = series_query(args)?;
    let store = wiring::build_store(config)?;
    let gaps = runtime()?
        .block_on(integrity::detect_gaps(store.as_ref(), &query))
        .map_err(|err| err.to_string())?;
    let missing: u64 = gaps.iter().map(|gap| gap.missing_points).sum();
    print_json(&json!({
        "series": describe(&query),
        "missing_points": missing,
        "gaps": gaps,
    }))
}

fn run_quality(config: &CollectorConfig, args: &SeriesArgs) -> Result<(), String> {
    let query = series_query(args)?;
    let store = wiring::build_store(config)?;
    let report = runtime()?
        .block_on(integrity::validate_quality(store.as_ref(), &query))
        .map_err(|err| err.to_string())?;
    print_json(&json!({
        "series": describe(&query),
        "valid": report.is_valid(),
        "report": report,
    }))
}

fn run_backfill(config: &CollectorConfig, args: &SeriesArgs) -> Result<(), String> {
    let query = series_query(args)?;
    let store = wiring::build_store(config)?;
    let adapters = wiring::build_adapters(config)?;
    let service = CollectionService::new(adapters, store, config.collection_settings());
    let max_points = config.backfill.max_points_per_request;

    let report = runtime()?
        .block_on(async {
            let cancel = cancel_on_interrupt();
            integrity::populate_missing_data(&service, &query, max_points, &cancel).await
        })
        .map_err(|err| err.to_string())?;
    print_json(&json!({
        "series": describe(&query),
        "report": report,
    }))
}

fn run_indicators(config: &CollectorConfig, args: &SeriesArgs) -> Result<(), String> {
    let query = series_query(args)?;
    let store = wiring::build_store(config)?;
    let candles = runtime()?
        .block_on(store.query_candles(&query))
        .map_err(|err| err.to_string())?;
    let snapshot = IndicatorSnapshot::compute(&candles, &config.indicators);
    print_json(&json!({
        "series": describe(&query),
        "candles": candles.len(),
        "settings": config.indicators,
        "latest": snapshot,
    }))
}

fn run_migrate(config: &CollectorConfig, migrations_path: &Path) -> Result<(), String> {
    let sql = std::fs::read_to_string(migrations_path).map_err(|err| {
        format!(
            "failed to read migrations file {}: {}",
            migrations_path.display(),
            err
        )
    })?;
    let store = wiring::build_postgres(config)?;
    store.migrate(&sql)?;
    tracing::info!(path = %migrations_path.display(), table = %store.ohlcv_table, "migration applied");
    println!("migration applied: {}", migrations_path.display());
    Ok(())
}
