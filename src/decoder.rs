//! Classifies a log as an ERC20 Transfer event and decodes it into a
//! [`Transfer`] domain record.

use std::str::FromStr;

use alloy::primitives::U256;
use bigdecimal::BigDecimal;

use crate::domain::{normalize_hex, Log, Transfer, DECIMALS_DEFAULT, TRANSFER_TOPIC};
use crate::error::DecodeError;

/// Decodes a log as an ERC20 Transfer event.
///
/// Classification rule: `topics[0]` must equal [`TRANSFER_TOPIC`] and the
/// log must carry exactly 3 topics (signature + indexed `from` + indexed
/// `to`). A log with no `topics[0]` is an anonymous event. A log whose
/// `topics[0]` is some other signature entirely is not recognized. A log
/// whose signature matches but that carries a different topic count — most
/// notably 4, the ERC721 `Transfer(address,address,uint256)` shape with an
/// additional indexed `tokenId` — is a standard this decoder does not
/// support.
pub fn decode_log(log: &Log) -> Result<Transfer, DecodeError> {
    let topic0 = log.topic0().ok_or(DecodeError::AnonymousEvent)?;

    if !topic0.eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Err(DecodeError::UnrecognizedSignature(topic0.to_string()));
    }
    if log.topics.len() != 3 {
        return Err(DecodeError::UnsupportedStandard(log.topics.len()));
    }

    let tx_from = word_to_address(&log.topics[1]);
    let tx_to = word_to_address(&log.topics[2]);
    let value = decode_value(&log.data);

    Ok(Transfer {
        chain_id: log.chain_id,
        block_num: log.block_number,
        tx_hash: normalize_hex(&log.transaction_hash),
        tx_from,
        tx_to,
        value,
        r#type: "Transfer",
        token_address: normalize_hex(&log.address),
        block_time: log.block_time,
    })
}

/// Extracts the lower 20 bytes of a 32-byte topic word as a lowercase
/// `0x`-prefixed address.
fn word_to_address(word: &str) -> String {
    let hex = word.trim_start_matches("0x");
    let tail = if hex.len() >= 40 {
        &hex[hex.len() - 40..]
    } else {
        hex
    };
    format!("0x{}", tail.to_ascii_lowercase())
}

/// Splits `data` into 32-byte words and decodes the first word (the
/// Transfer event's `value` argument) as an exact (54,18) decimal: the raw
/// 256-bit integer shifted 18 places, with no floating-point intermediate.
fn decode_value(data: &str) -> BigDecimal {
    let hex = data.trim_start_matches("0x");
    let first_word = if hex.len() >= 64 { &hex[..64] } else { hex };

    let raw = U256::from_str_radix(first_word, 16).unwrap_or_default();
    let divisor = BigDecimal::from(10u64.pow(DECIMALS_DEFAULT));
    BigDecimal::from_str(&raw.to_string()).unwrap_or_default() / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(topics: Vec<&str>, data: &str, address: &str) -> Log {
        Log {
            chain_id: 1,
            block_number: 15_941_856,
            block_hash: "0x5ce752bc54c89c97098bb1222d6fe499f6819820d06fccec057008a975ad8614"
                .into(),
            address: address.into(),
            topics: topics.into_iter().map(String::from).collect(),
            data: data.into(),
            transaction_hash: "0x3b2d2ed6638e0c0c9e53d84f463a4a3fc9de228d6e52356cf4e05537786313c0"
                .into(),
            log_index: 168,
            deleted: false,
            block_time: None,
        }
    }

    #[test]
    fn decodes_a_canonical_transfer() {
        let log = log_with(
            vec![
                TRANSFER_TOPIC,
                "0x00000000000000000000000020dc3024213990d0cae48313da541459648a9483",
                "0x000000000000000000000000861ff4c1aa2591dac7b24a0e80631f77f59a06dc",
            ],
            "0x0000000000000000000000000000000000000000000000000000000077359400",
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        );

        let transfer = decode_log(&log).expect("should decode");
        assert_eq!(transfer.tx_from, "0x20dc3024213990d0cae48313da541459648a9483");
        assert_eq!(transfer.tx_to, "0x861ff4c1aa2591dac7b24a0e80631f77f59a06dc");
        assert_eq!(
            transfer.value,
            BigDecimal::from_str("0.000000002000000000").unwrap()
        );
        assert_eq!(transfer.token_address, "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(transfer.r#type, "Transfer");
    }

    #[test]
    fn decodes_a_second_canonical_transfer() {
        let log = log_with(
            vec![
                TRANSFER_TOPIC,
                "0x000000000000000000000000c5be99a02c6857f9eac67bbce58df5572498f40c",
                "0x000000000000000000000000e6c4293235d11c9d241d6d204eb366f0afdbe3fa",
            ],
            "0x000000000000000000000000000000000000000000000000000000229d4309a6",
            "0xD46bA6D942050d489DBd938a2C909A5d5039A161",
        );

        let transfer = decode_log(&log).expect("should decode");
        assert_eq!(
            transfer.value,
            BigDecimal::from_str("148667304358").unwrap()
                / BigDecimal::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn rejects_a_four_topic_log_as_unsupported_standard() {
        let log = log_with(
            vec![
                TRANSFER_TOPIC,
                "0x0000000000000000000000000000000000000000000000000000000000000000",
                "0x000000000000000000000000a1d02d5d5d76bb3b75cbcfe05187eccbaf292a75",
                "0x0000000000000000000000000000000000000000000000000000000000001c24",
            ],
            "0x",
            "0xB54420149dBE2D5B2186A3e6dc6fC9d1A58316d4",
        );

        assert_eq!(
            decode_log(&log).unwrap_err(),
            DecodeError::UnsupportedStandard(4)
        );
    }

    #[test]
    fn rejects_a_log_with_no_topic0_as_anonymous() {
        let log = log_with(
            vec![],
            "0x0000000000000000000000000000000000000000000000000000000077359400",
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        );

        assert_eq!(decode_log(&log).unwrap_err(), DecodeError::AnonymousEvent);
    }

    #[test]
    fn rejects_a_non_transfer_signature_as_unrecognized() {
        let other_signature = "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";
        let log = log_with(
            vec![
                other_signature,
                "0x00000000000000000000000020dc3024213990d0cae48313da541459648a9483",
                "0x000000000000000000000000861ff4c1aa2591dac7b24a0e80631f77f59a06dc",
            ],
            "0x0000000000000000000000000000000000000000000000000000000077359400",
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        );

        assert_eq!(
            decode_log(&log).unwrap_err(),
            DecodeError::UnrecognizedSignature(other_signature.to_string())
        );
    }
}
