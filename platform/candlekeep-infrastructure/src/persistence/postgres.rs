use async_trait::async_trait;
use candlekeep_domain::repositories::candle_store::{CandleQuery, CandleStore, StoreError};
use candlekeep_domain::value_objects::candle::Candle;
use chrono::{DateTime, Utc};
use postgres::NoTls;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use std::time::Instant;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

#[derive(Debug, Clone)]
pub struct PostgresCandleStore {
    pool: PgPool,
    pub ohlcv_table: String,
}

impl PostgresCandleStore {
    pub fn new(db_url: &str, ohlcv_table: String, pool_max_size: u32) -> Result<Self, String> {
        if let Err(err) = validate_table_name(&ohlcv_table) {
            return Err(format!("invalid ohlcv_table '{}': {}", ohlcv_table, err));
        }

        let config = db_url
            .parse::<postgres::Config>()
            .map_err(|err| format!("invalid postgres db url: {err}"))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_max_size.max(1))
            .build(manager)
            .map_err(|err| format!("failed to build postgres pool: {err}"))?;

        Ok(Self { pool, ohlcv_table })
    }

    /// Applies a migration script as one batch.
    pub fn migrate(&self, sql: &str) -> Result<(), String> {
        let mut client = checkout(&self.pool).map_err(|err| err.0)?;
        client
            .batch_execute(sql)
            .map_err(|err| format!("failed to apply migrations: {err}"))?;
        tracing::info!(table = %self.ohlcv_table, "migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CandleStore for PostgresCandleStore {
    async fn store_candles(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        if candles.is_empty() {
            return Ok(0);
        }
        let pool = self.pool.clone();
        let table = self.ohlcv_table.clone();
        let candles = candles.to_vec();
        tokio::task::spawn_blocking(move || upsert_candles(&pool, &table, &candles))
            .await
            .map_err(|err| StoreError(format!("upsert task failed: {err}")))?
    }

    async fn query_candles(&self, query: &CandleQuery) -> Result<Vec<Candle>, StoreError> {
        let pool = self.pool.clone();
        let table = self.ohlcv_table.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || load_candles(&pool, &table, &query))
            .await
            .map_err(|err| StoreError(format!("query task failed: {err}")))?
    }
}

fn checkout(
    pool: &PgPool,
) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, StoreError> {
    let get_start = Instant::now();
    match pool.get() {
        Ok(client) => {
            metrics::histogram!("candlekeep.infra.postgres.pool.get_ms")
                .record(get_start.elapsed().as_secs_f64() * 1000.0);
            Ok(client)
        }
        Err(err) => {
            metrics::counter!("candlekeep.infra.postgres.pool.get.errors_total").increment(1);
            tracing::error!(error = %err, "failed to checkout postgres connection");
            Err(StoreError(format!(
                "failed to checkout postgres connection: {err}"
            )))
        }
    }
}

pub fn upsert_candles(pool: &PgPool, table: &str, candles: &[Candle]) -> Result<u64, StoreError> {
    let overall_start = Instant::now();
    let span = tracing::info_span!("infra.postgres.upsert", table = %table, rows = candles.len());
    let _enter = span.enter();

    validate_table_name(table).map_err(StoreError)?;
    let mut client = checkout(pool)?;

    let sql = format!(
        "INSERT INTO {} (
            exchange, symbol, timeframe, timestamp_utc,
            open, high, low, close, volume,
            vwap, trade_count, bid, ask
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (exchange, symbol, timeframe, timestamp_utc)
        DO UPDATE SET
            open = EXCLUDED.open,
            high = EXCLUDED.high,
            low = EXCLUDED.low,
            close = EXCLUDED.close,
            volume = EXCLUDED.volume,
            vwap = EXCLUDED.vwap,
            trade_count = EXCLUDED.trade_count,
            bid = EXCLUDED.bid,
            ask = EXCLUDED.ask,
            ingested_at = NOW()",
        table
    );

    let mut transaction = client
        .transaction()
        .map_err(|err| StoreError(format!("failed to start transaction: {err}")))?;
    let statement = transaction
        .prepare(&sql)
        .map_err(|err| StoreError(format!("failed to prepare upsert: {err}")))?;

    let mut total = 0u64;
    for candle in candles {
        let exchange = candle.exchange.as_str();
        let timeframe = candle.timeframe.label();
        let trade_count = candle.trade_count.map(|n| n.min(i64::MAX as u64) as i64);
        total += transaction
            .execute(
                &statement,
                &[
                    &exchange,
                    &candle.symbol,
                    &timeframe,
                    &candle.timestamp,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.volume,
                    &candle.vwap,
                    &trade_count,
                    &candle.bid,
                    &candle.ask,
                ],
            )
            .map_err(|err| StoreError(format!("upsert failed: {err}")))?;
    }

    transaction
        .commit()
        .map_err(|err| StoreError(format!("failed to commit: {err}")))?;

    metrics::counter!("candlekeep.infra.postgres.rows_upserted_total").increment(total);
    metrics::histogram!("candlekeep.infra.postgres.upsert_ms")
        .record(overall_start.elapsed().as_secs_f64() * 1000.0);
    tracing::debug!(rows = total, "upserted candles");
    Ok(total)
}

pub fn load_candles(
    pool: &PgPool,
    table: &str,
    query: &CandleQuery,
) -> Result<Vec<Candle>, StoreError> {
    let overall_start = Instant::now();
    let span = tracing::info_span!(
        "infra.postgres.load_candles",
        table = %table,
        exchange = %query.exchange,
        symbol = %query.symbol,
        timeframe = %query.timeframe
    );
    let _enter = span.enter();

    validate_table_name(table).map_err(StoreError)?;
    let mut client = checkout(pool)?;

    let sql = format!(
        "SELECT timestamp_utc, open, high, low, close, volume, vwap, trade_count, bid, ask \
         FROM {} \
         WHERE exchange=$1 AND symbol=$2 AND timeframe=$3 \
         AND timestamp_utc >= $4 AND timestamp_utc < $5 \
         ORDER BY timestamp_utc ASC",
        table
    );
    let exchange = query.exchange.as_str();
    let timeframe = query.timeframe.label();
    let rows = client
        .query(
            &sql,
            &[&exchange, &query.symbol, &timeframe, &query.start, &query.end],
        )
        .map_err(|err| {
            tracing::error!(error = %err, "failed to query candles");
            StoreError(format!("failed to query candles: {err}"))
        })?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let column = |err: postgres::Error| StoreError(format!("bad candle row: {err}"));
        let timestamp: DateTime<Utc> = row.try_get(0).map_err(column)?;
        let trade_count: Option<i64> = row.try_get(7).map_err(column)?;
        candles.push(Candle {
            symbol: query.symbol.clone(),
            exchange: query.exchange,
            timeframe: query.timeframe,
            timestamp,
            open: row.try_get(1).map_err(column)?,
            high: row.try_get(2).map_err(column)?,
            low: row.try_get(3).map_err(column)?,
            close: row.try_get(4).map_err(column)?,
            volume: row.try_get(5).map_err(column)?,
            vwap: row.try_get(6).map_err(column)?,
            trade_count: trade_count.map(|n| n.max(0) as u64),
            bid: row.try_get(8).map_err(column)?,
            ask: row.try_get(9).map_err(column)?,
        });
    }

    metrics::histogram!("candlekeep.infra.postgres.load_candles_ms")
        .record(overall_start.elapsed().as_secs_f64() * 1000.0);
    tracing::debug!(rows = candles.len(), "loaded candles");
    Ok(candles)
}

fn validate_table_name(table: &str) -> Result<(), String> {
    if table.is_empty() {
        return Err("table name is empty".to_string());
    }
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("invalid table name: {table}"));
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_first = chars
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
        if !valid_first || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(format!("invalid table name: {table}"));
        }
    }
    Ok(())
}
