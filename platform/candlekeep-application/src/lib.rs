pub mod cancel;
pub mod collection;
pub mod config;
pub mod integrity;
pub mod schedule;
