//! Pure domain records shared by the decoder, backfill engine, and tailer.
//!
//! These types carry no `sqlx`/`serde` coupling to persistence rows; the
//! store module owns the conversion at its boundary. Keeping the two
//! separate avoids the original implementation's cyclic dependency between
//! domain models and database schemas.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub const DECIMALS_DEFAULT: u32 = 18;

pub const DEFAULT_CHUNK: u64 = 2_000;
pub const MIN_CHUNK: u64 = 2_000;
pub const MAX_CHUNK: u64 = 50_000;
pub const CHUNK_INCREASE: f64 = 1.5;
pub const CHUNK_DECREASE: f64 = 0.5;
pub const LOGS_DECREASE_THRESHOLD: usize = 5_000;

pub const RETRIES: usize = 7;
pub const RETRY_DELAY_SECS: u64 = 1;

/// A documented approximation: a fixed height used as a backfill floor when
/// the contract's actual creation block is not known up front.
pub const INIT_BLOCK: u64 = 10_000_000;

/// A single EVM log as returned by the chain backend, normalized to the
/// shape the decoder needs.
#[derive(Debug, Clone)]
pub struct Log {
    pub chain_id: i64,
    pub block_number: u64,
    pub block_hash: String,
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub transaction_hash: String,
    pub log_index: u64,
    pub deleted: bool,
    pub block_time: Option<DateTime<Utc>>,
}

impl Log {
    /// `topics[0]`, the event signature hash, if present.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(|s| s.as_str())
    }
}

/// A decoded ERC20 Transfer event, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub chain_id: i64,
    pub block_num: u64,
    pub tx_hash: String,
    pub tx_from: String,
    pub tx_to: String,
    pub value: BigDecimal,
    pub r#type: &'static str,
    pub token_address: String,
    pub block_time: Option<DateTime<Utc>>,
}

/// A wallet's token balance snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub chain_id: i64,
    pub wallet_address: String,
    pub token_address: String,
    pub balance: BigDecimal,
}

/// Normalizes a `0x`-prefixed hex address/hash to lowercase.
pub fn normalize_hex(value: &str) -> String {
    value.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic0_of_empty_log_is_none() {
        let log = Log {
            chain_id: 1,
            block_number: 1,
            block_hash: "0x0".into(),
            address: "0x0".into(),
            topics: vec![],
            data: "0x".into(),
            transaction_hash: "0x0".into(),
            log_index: 0,
            deleted: false,
            block_time: None,
        };
        assert_eq!(log.topic0(), None);
    }

    #[test]
    fn normalize_hex_lowercases() {
        assert_eq!(
            normalize_hex("0xABCDEF1234567890abcdef1234567890ABCDEF12"),
            "0xabcdef1234567890abcdef1234567890abcdef12"
        );
    }
}
