//! Typed error kinds for each component boundary.
//!
//! Retry and control-flow logic matches on these variants directly rather
//! than on stringly-typed messages; `main` and the CLI layer aggregate
//! everything behind `eyre::Result` for top-level reporting.

use thiserror::Error;

/// Errors surfaced by the Chain Client.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by backend: {0}")]
    RateLimit(String),

    #[error("requested block range too large: {0}")]
    RangeTooLarge(String),

    #[error("RPC call failed: {0}")]
    Rpc(String),
}

/// Errors surfaced by the Log Decoder.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("log has no event signature topic (anonymous event)")]
    AnonymousEvent,

    #[error("log signature matches but topic count {0} is not a supported ERC20 Transfer shape")]
    UnsupportedStandard(usize),

    #[error("log topic0 {0} is not the ERC20 Transfer signature")]
    UnrecognizedSignature(String),
}

/// Errors surfaced by the Store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Errors surfaced by the Tailer.
#[derive(Error, Debug)]
pub enum TailerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("subscription acknowledgment missing or malformed: {0}")]
    ProtocolMismatch(String),
}
