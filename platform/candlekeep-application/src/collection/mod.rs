//! Fan-out of (symbol, exchange, timeframe) fetch tasks with bounded
//! concurrency, linear-backoff retries and per-task outcomes.

use crate::cancel::CancelSignal;
use crate::config::CollectionSettings;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::repositories::market_data::CandleSource;
use candlekeep_domain::value_objects::collection_task::CollectionTask;
use candlekeep_domain::value_objects::exchange::Exchange;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

const CANCELLED_BEFORE_START: &str = "cancelled before start";

/// Adapters resolved once at startup, keyed by exchange.
#[derive(Clone, Default)]
pub struct AdapterSet {
    sources: HashMap<Exchange, Arc<dyn CandleSource>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn CandleSource>) -> Self {
        self.insert(source);
        self
    }

    pub fn insert(&mut self, source: Arc<dyn CandleSource>) {
        self.sources.insert(source.exchange(), source);
    }

    /// Case-insensitive lookup by exchange name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CandleSource>> {
        let exchange = Exchange::parse(name)?;
        self.sources.get(&exchange).cloned()
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = self.sources.keys().copied().collect();
        exchanges.sort_by_key(|e| e.as_str());
        exchanges
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("exchanges", &self.exchanges())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub symbols: Vec<String>,
    pub exchanges: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CollectionRequest {
    pub fn tasks(&self) -> Vec<CollectionTask> {
        CollectionTask::expand(
            &self.symbols,
            &self.exchanges,
            &self.timeframes,
            self.start,
            self.end,
        )
    }

    fn validate(&self) -> Result<(), CollectError> {
        if self.start >= self.end {
            return Err(CollectError::InvalidRequest(format!(
                "window start {} is not before end {}",
                self.start, self.end
            )));
        }
        if self.symbols.is_empty() || self.exchanges.is_empty() || self.timeframes.is_empty() {
            return Err(CollectError::InvalidRequest(
                "symbols, exchanges and timeframes must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
    #[error("invalid collection request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedExchange,
    NonRetryable,
    RetriesExhausted,
    Cancelled,
    Panicked,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::UnsupportedExchange => "unsupported_exchange",
            FailureKind::NonRetryable => "non_retryable",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Panicked => "panicked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Stored { count: u64 },
    Failed(TaskFailure),
}

impl TaskOutcome {
    fn failed(kind: FailureKind, attempts: u32, message: impl Into<String>) -> Self {
        TaskOutcome::Failed(TaskFailure {
            kind,
            attempts,
            message: message.into(),
        })
    }

    pub fn stored(&self) -> Option<u64> {
        match self {
            TaskOutcome::Stored { count } => Some(*count),
            TaskOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskOutcome::Stored { .. } => None,
            TaskOutcome::Failed(failure) => Some(failure),
        }
    }

    fn result_label(&self) -> &'static str {
        match self {
            TaskOutcome::Stored { .. } => "stored",
            TaskOutcome::Failed(failure) => failure.kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    fn new(task: CollectionTask, outcome: TaskOutcome) -> Self {
        Self {
            symbol: task.symbol,
            exchange: task.exchange,
            timeframe: task.timeframe,
            window_start: task.window_start,
            window_end: task.window_end,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub candles_stored: u64,
    pub elapsed_ms: u64,
}

impl CollectionSummary {
    pub fn from_reports(reports: &[TaskReport], elapsed: Duration) -> Self {
        let mut summary = CollectionSummary {
            tasks: reports.len(),
            elapsed_ms: elapsed.as_millis() as u64,
            ..CollectionSummary::default()
        };
        for report in reports {
            match &report.outcome {
                TaskOutcome::Stored { count } => {
                    summary.succeeded += 1;
                    summary.candles_stored += count;
                }
                TaskOutcome::Failed(failure) if failure.kind == FailureKind::Cancelled => {
                    summary.cancelled += 1;
                }
                TaskOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs collection tasks against the adapter set and writes results to the
/// store. One semaphore bounds in-flight fetches across every call on the
/// same instance.
#[derive(Clone)]
pub struct CollectionService {
    adapters: AdapterSet,
    store: Arc<dyn CandleStore>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl CollectionService {
    pub fn new(
        adapters: AdapterSet,
        store: Arc<dyn CandleStore>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            adapters,
            store,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            retry: RetryPolicy {
                attempts: settings.retry_attempts.max(1),
                base_delay: settings.retry_base_delay,
            },
        }
    }

    pub fn store(&self) -> &Arc<dyn CandleStore> {
        &self.store
    }

    /// Runs the batch and folds it into counts. Individual failures are
    /// logged and counted, never returned as errors.
    pub async fn collect_recent_data(
        &self,
        request: &CollectionRequest,
        cancel: &CancelSignal,
    ) -> Result<CollectionSummary, CollectError> {
        let started = Instant::now();
        let reports = self.collect_with_results(request, cancel).await?;
        let summary = CollectionSummary::from_reports(&reports, started.elapsed());
        tracing::info!(
            tasks = summary.tasks,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            candles_stored = summary.candles_stored,
            elapsed_ms = summary.elapsed_ms,
            "collection batch finished"
        );
        Ok(summary)
    }

    /// Runs the batch and returns one report per task, in cross-product order.
    pub async fn collect_with_results(
        &self,
        request: &CollectionRequest,
        cancel: &CancelSignal,
    ) -> Result<Vec<TaskReport>, CollectError> {
        request.validate()?;
        let tasks = request.tasks();
        let span = tracing::info_span!(
            "app.collect.batch",
            tasks = tasks.len(),
            start = %request.start,
            end = %request.end
        );
        Ok(self.run_batch(tasks, cancel).instrument(span).await)
    }

    async fn run_batch(&self, tasks: Vec<CollectionTask>, cancel: &CancelSignal) -> Vec<TaskReport> {
        let mut slots: Vec<Option<TaskReport>> = vec![None; tasks.len()];
        let mut join_set = JoinSet::new();

        for (idx, task) in tasks.into_iter().enumerate() {
            let permit = match self.acquire(cancel).await {
                Ok(permit) => permit,
                Err(message) => {
                    slots[idx] = Some(self.finish(
                        task,
                        TaskOutcome::failed(FailureKind::Cancelled, 0, message),
                        Duration::ZERO,
                    ));
                    continue;
                }
            };
            let job = self.spawn_task(task, permit, cancel.clone());
            join_set.spawn(async move { (idx, job.await) });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(err) => tracing::error!(error = %err, "collection task wrapper failed"),
            }
        }

        slots.into_iter().flatten().collect()
    }

    /// Runs a single task through the same permit, retry and store path as
    /// a batch.
    pub async fn run_task(&self, task: CollectionTask, cancel: &CancelSignal) -> TaskReport {
        match self.acquire(cancel).await {
            Ok(permit) => self.spawn_task(task, permit, cancel.clone()).await,
            Err(message) => self.finish(
                task,
                TaskOutcome::failed(FailureKind::Cancelled, 0, message),
                Duration::ZERO,
            ),
        }
    }

    /// Waits for a concurrency permit unless cancellation comes first. A
    /// permit granted after cancellation is handed back unused.
    async fn acquire(&self, cancel: &CancelSignal) -> Result<OwnedSemaphorePermit, String> {
        if cancel.is_cancelled() {
            return Err(CANCELLED_BEFORE_START.to_string());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CANCELLED_BEFORE_START.to_string()),
            acquired = self.semaphore.clone().acquire_owned() => match acquired {
                Ok(_) if cancel.is_cancelled() => Err(CANCELLED_BEFORE_START.to_string()),
                Ok(permit) => Ok(permit),
                Err(err) => Err(err.to_string()),
            },
        }
    }

    /// Spawns the fetch onto the runtime so a panic inside an adapter or the
    /// store is caught here and turned into a failed report. The permit
    /// moves into the spawned task and is released however it ends.
    fn spawn_task(
        &self,
        task: CollectionTask,
        permit: OwnedSemaphorePermit,
        cancel: CancelSignal,
    ) -> impl std::future::Future<Output = TaskReport> + Send + 'static {
        let source = self.adapters.resolve(&task.exchange);
        let store = Arc::clone(&self.store);
        let retry = self.retry;
        let this = self.clone();
        let started = Instant::now();
        let handle = tokio::spawn({
            let task = task.clone();
            async move {
                let _permit = permit;
                execute_task(&task, source, store.as_ref(), retry, &cancel).await
            }
        });
        async move {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    TaskOutcome::failed(FailureKind::Panicked, 0, "collection task panicked")
                }
                Err(err) => TaskOutcome::failed(FailureKind::Cancelled, 0, err.to_string()),
            };
            this.finish(task, outcome, started.elapsed())
        }
    }

    fn finish(&self, task: CollectionTask, outcome: TaskOutcome, elapsed: Duration) -> TaskReport {
        metrics::counter!("candlekeep.collect.tasks_total", "result" => outcome.result_label())
            .increment(1);
        metrics::histogram!("candlekeep.collect.task_ms", "result" => outcome.result_label())
            .record(elapsed.as_millis() as f64);
        match &outcome {
            TaskOutcome::Stored { count } => {
                metrics::counter!("candlekeep.collect.candles_stored_total").increment(*count);
                tracing::debug!(
                    symbol = %task.symbol,
                    exchange = %task.exchange,
                    timeframe = %task.timeframe,
                    count,
                    "task stored candles"
                );
            }
            TaskOutcome::Failed(failure) => {
                tracing::warn!(
                    symbol = %task.symbol,
                    exchange = %task.exchange,
                    timeframe = %task.timeframe,
                    kind = failure.kind.as_str(),
                    attempts = failure.attempts,
                    error = %failure.message,
                    "task failed"
                );
            }
        }
        TaskReport::new(task, outcome)
    }
}

impl fmt::Debug for CollectionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionService")
            .field("adapters", &self.adapters)
            .field("available_permits", &self.semaphore.available_permits())
            .field("retry_attempts", &self.retry.attempts)
            .finish()
    }
}

async fn execute_task(
    task: &CollectionTask,
    source: Option<Arc<dyn CandleSource>>,
    store: &dyn CandleStore,
    retry: RetryPolicy,
    cancel: &CancelSignal,
) -> TaskOutcome {
    let Some(source) = source else {
        return TaskOutcome::failed(
            FailureKind::UnsupportedExchange,
            0,
            format!("unsupported exchange: {}", task.exchange),
        );
    };

    if cancel.is_cancelled() {
        return TaskOutcome::failed(FailureKind::Cancelled, 0, CANCELLED_BEFORE_START);
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let last_error = match source
            .fetch_candles(&task.symbol, task.timeframe, task.window_start, task.window_end)
            .await
        {
            Ok(candles) if candles.is_empty() => return TaskOutcome::Stored { count: 0 },
            Ok(candles) => match store.store_candles(&candles).await {
                Ok(count) => return TaskOutcome::Stored { count },
                Err(err) => err.to_string(),
            },
            Err(err) if !err.is_retryable() => {
                return TaskOutcome::failed(FailureKind::NonRetryable, attempt, err.to_string());
            }
            Err(err) => err.to_string(),
        };

        if attempt >= retry.attempts {
            return TaskOutcome::failed(FailureKind::RetriesExhausted, attempt, last_error);
        }
        if cancel.is_cancelled() {
            return TaskOutcome::failed(FailureKind::Cancelled, attempt, last_error);
        }
        let delay = retry.delay_for(attempt);
        tracing::debug!(
            symbol = %task.symbol,
            exchange = %task.exchange,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "retrying collection task"
        );
        if !cancel.sleep_or_cancel(delay).await {
            return TaskOutcome::failed(FailureKind::Cancelled, attempt, last_error);
        }
    }
}
