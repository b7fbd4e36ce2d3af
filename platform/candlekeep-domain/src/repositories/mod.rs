pub mod candle_store;
pub mod market_data;
