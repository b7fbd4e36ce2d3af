mod support;

use candlekeep_application::cancel::CancelSignal;
use candlekeep_application::collection::{
    AdapterSet, CollectError, CollectionRequest, CollectionService, FailureKind, TaskOutcome,
};
use candlekeep_application::config::CollectionSettings;
use candlekeep_application::integrity;
use candlekeep_domain::repositories::candle_store::CandleQuery;
use candlekeep_domain::repositories::market_data::FetchError;
use candlekeep_domain::services::boundary::safe_end_time;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use candlekeep_infrastructure::persistence::memory::MemoryCandleStore;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use support::{at, strings, Behavior, ScriptedSource};

fn settings(max_concurrency: usize, retry_attempts: u32, base_delay_ms: u64) -> CollectionSettings {
    CollectionSettings {
        max_concurrency,
        retry_attempts,
        retry_base_delay: Duration::from_millis(base_delay_ms),
    }
}

fn service_with(
    source: Arc<ScriptedSource>,
    settings: CollectionSettings,
) -> (CollectionService, Arc<MemoryCandleStore>) {
    let store = Arc::new(MemoryCandleStore::new());
    let service = CollectionService::new(
        AdapterSet::new().with_source(source),
        store.clone(),
        settings,
    );
    (service, store)
}

fn request(symbols: &[&str], exchanges: &[&str], timeframes: &[Timeframe]) -> CollectionRequest {
    CollectionRequest {
        symbols: strings(symbols),
        exchanges: strings(exchanges),
        timeframes: timeframes.to_vec(),
        start: at(7, 0),
        end: at(10, 0),
    }
}

#[tokio::test(start_paused = true)]
async fn btcusd_kraken_hourly_scenario_is_complete() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, store) = service_with(source.clone(), settings(4, 3, 100));

    let end = safe_end_time(at(10, 20), Timeframe::H1, 0);
    let start = end - ChronoDuration::hours(3);
    let request = CollectionRequest {
        symbols: strings(&["BTCUSD"]),
        exchanges: strings(&["kraken"]),
        timeframes: vec![Timeframe::H1],
        start,
        end,
    };

    let summary = service
        .collect_recent_data(&request, &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(summary.tasks, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.candles_stored, 3);
    assert_eq!(store.len(), 3);

    let query = CandleQuery {
        symbol: "BTCUSD".to_string(),
        exchange: Exchange::Kraken,
        timeframe: Timeframe::H1,
        start,
        end,
    };
    assert!(integrity::detect_gaps(store.as_ref(), &query)
        .await
        .unwrap()
        .is_empty());
    let report = integrity::validate_quality(store.as_ref(), &query)
        .await
        .unwrap();
    assert_eq!(report.completeness, 1.0);
    assert!(report.is_valid());
}

#[tokio::test(start_paused = true)]
async fn repeated_collection_does_not_duplicate_rows() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, store) = service_with(source, settings(2, 1, 0));
    let request = request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]);
    let cancel = CancelSignal::new();

    service.collect_recent_data(&request, &cancel).await.unwrap();
    let after_first = store.len();
    service.collect_recent_data(&request, &cancel).await.unwrap();
    assert_eq!(store.len(), after_first);
    assert_eq!(after_first, 3);
}

#[tokio::test(start_paused = true)]
async fn lower_case_config_symbols_are_found_by_series_queries() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, store) = service_with(source.clone(), settings(2, 3, 10));

    service
        .collect_recent_data(
            &request(&["btcusd"], &["kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(source.requests()[0].0, "BTCUSD");
    let query = CandleQuery {
        symbol: "BTCUSD".to_string(),
        exchange: Exchange::Kraken,
        timeframe: Timeframe::H1,
        start: at(7, 0),
        end: at(10, 0),
    };
    let gaps = integrity::detect_gaps(store.as_ref(), &query).await.unwrap();
    assert!(gaps.is_empty());
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn in_flight_fetches_never_exceed_the_bound() {
    let source = Arc::new(
        ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous)
            .with_delay(Duration::from_millis(50)),
    );
    let (service, _store) = service_with(source.clone(), settings(2, 1, 0));
    let request = request(
        &["BTCUSD", "ETHUSD", "SOLUSD"],
        &["kraken"],
        &[Timeframe::M15, Timeframe::H1],
    );

    let reports = service
        .collect_with_results(&request, &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(reports.len(), 6);
    assert!(reports.iter().all(|r| r.outcome.stored().is_some()));
    assert_eq!(source.calls(), 6);
    assert!(source.max_in_flight() <= 2);
    assert!(source.max_in_flight() >= 1);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_attempted_exactly_retry_attempts_times() {
    let source = Arc::new(ScriptedSource::new(
        Exchange::Kraken,
        Behavior::AlwaysFail(FetchError::Transport("connection reset".to_string())),
    ));
    let (service, store) = service_with(source.clone(), settings(2, 3, 1000));
    let started = tokio::time::Instant::now();

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(source.calls(), 3);
    let failure = reports[0].outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(failure.attempts, 3);
    assert!(failure.message.contains("connection reset"));
    // linear backoff: 1s after the first attempt, 2s after the second
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_within_the_attempt_budget() {
    let source = Arc::new(ScriptedSource::new(
        Exchange::Kraken,
        Behavior::FailTimes(2, FetchError::RateLimited("429".to_string())),
    ));
    let (service, store) = service_with(source.clone(), settings(1, 3, 10));

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, TaskOutcome::Stored { count: 3 });
    assert_eq!(source.calls(), 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_errors_stop_after_one_attempt() {
    let source = Arc::new(ScriptedSource::new(
        Exchange::Kraken,
        Behavior::AlwaysFail(FetchError::NotFound("unknown pair".to_string())),
    ));
    let (service, _store) = service_with(source.clone(), settings(1, 5, 10));

    let reports = service
        .collect_with_results(
            &request(&["FOOBAR"], &["kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();
    let failure = reports[0].outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::NonRetryable);
    assert_eq!(failure.attempts, 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_exchange_fails_only_its_own_tasks() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, store) = service_with(source.clone(), settings(2, 3, 10));

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD"], &["KRAKEN", "binance", "kucoin"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].exchange, "KRAKEN");
    assert_eq!(reports[0].outcome, TaskOutcome::Stored { count: 3 });
    for report in &reports[1..] {
        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::UnsupportedExchange);
        assert_eq!(failure.attempts, 0);
    }
    assert_eq!(source.calls(), 1);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn empty_results_are_successful_zero_counts() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Empty));
    let (service, store) = service_with(source, settings(1, 3, 10));
    let summary = service
        .collect_recent_data(
            &request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.candles_stored, 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_spawns_nothing() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, _store) = service_with(source.clone(), settings(2, 3, 10));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let summary = service
        .collect_recent_data(
            &request(&["BTCUSD", "ETHUSD"], &["kraken"], &[Timeframe::H1]),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.tasks, 2);
    assert_eq!(summary.cancelled, 2);
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_a_permit_starts_no_new_fetch() {
    let cancel = CancelSignal::new();
    let source = Arc::new(
        ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous)
            .with_delay(Duration::from_millis(50))
            .cancelling(cancel.clone()),
    );
    let (service, store) = service_with(source.clone(), settings(1, 3, 10));

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD", "ETHUSD", "SOLUSD"], &["kraken"], &[Timeframe::H1]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(source.calls(), 1);
    assert_eq!(reports[0].outcome, TaskOutcome::Stored { count: 3 });
    for report in &reports[1..] {
        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.attempts, 0);
    }
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn single_task_cancelled_while_queued_is_not_fetched() {
    let cancel = CancelSignal::new();
    let source = Arc::new(
        ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous)
            .with_delay(Duration::from_millis(50))
            .cancelling(cancel.clone()),
    );
    let (service, _store) = service_with(source.clone(), settings(1, 3, 10));
    let tasks = request(&["BTCUSD", "ETHUSD"], &["kraken"], &[Timeframe::H1]).tasks();

    let (first, second) = tokio::join!(
        service.run_task(tasks[0].clone(), &cancel),
        service.run_task(tasks[1].clone(), &cancel),
    );

    assert_eq!(first.outcome, TaskOutcome::Stored { count: 3 });
    assert_eq!(
        second.outcome.failure().map(|f| (f.kind, f.attempts)),
        Some((FailureKind::Cancelled, 0))
    );
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_retrying() {
    let source = Arc::new(ScriptedSource::new(
        Exchange::Kraken,
        Behavior::AlwaysFail(FetchError::Transport("timeout".to_string())),
    ));
    let (service, _store) = service_with(source.clone(), settings(1, 5, 60_000));
    let cancel = CancelSignal::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]),
            &cancel,
        )
        .await
        .unwrap();
    let failure = reports[0].outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.attempts, 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn adapter_panic_is_reported_and_siblings_finish() {
    let panicking = Arc::new(ScriptedSource::new(Exchange::Kucoin, Behavior::Panic));
    let healthy = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let store = Arc::new(MemoryCandleStore::new());
    let service = CollectionService::new(
        AdapterSet::new()
            .with_source(panicking)
            .with_source(healthy.clone()),
        store.clone(),
        settings(1, 3, 10),
    );

    let reports = service
        .collect_with_results(
            &request(&["BTCUSD"], &["kucoin", "kraken"], &[Timeframe::H1]),
            &CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        reports[0].outcome.failure().map(|f| f.kind),
        Some(FailureKind::Panicked)
    );
    assert_eq!(reports[1].outcome, TaskOutcome::Stored { count: 3 });
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn invalid_windows_are_rejected_up_front() {
    let source = Arc::new(ScriptedSource::new(Exchange::Kraken, Behavior::Contiguous));
    let (service, _store) = service_with(source.clone(), settings(1, 1, 0));
    let mut bad = request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]);
    bad.end = bad.start;

    let err = service
        .collect_with_results(&bad, &CancelSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::InvalidRequest(_)));

    let mut empty = request(&["BTCUSD"], &["kraken"], &[Timeframe::H1]);
    empty.symbols.clear();
    assert!(service
        .collect_recent_data(&empty, &CancelSignal::new())
        .await
        .is_err());
    assert_eq!(source.calls(), 0);
}
