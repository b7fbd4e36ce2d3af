pub mod candle;
pub mod collection_task;
pub mod exchange;
pub mod timeframe;
