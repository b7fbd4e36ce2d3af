use async_trait::async_trait;
use candlekeep_domain::repositories::candle_store::{CandleQuery, CandleStore, StoreError};
use candlekeep_domain::value_objects::candle::{Candle, CandleKey};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Process-local store keyed like the Postgres table; later writes win.
#[derive(Debug, Default)]
pub struct MemoryCandleStore {
    rows: Mutex<BTreeMap<CandleKey, Candle>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Candle> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn store_candles(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock();
        for candle in candles {
            rows.insert(candle.key(), candle.clone());
        }
        Ok(candles.len() as u64)
    }

    async fn query_candles(&self, query: &CandleQuery) -> Result<Vec<Candle>, StoreError> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|candle| query.contains(candle))
            .cloned()
            .collect())
    }
}
