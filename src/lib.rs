pub mod backfill;
pub mod chain;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod store;
pub mod tailer;
