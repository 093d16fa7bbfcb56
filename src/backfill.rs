//! Adaptive historical backfill: chunked `eth_getLogs` scanning with
//! retry/split on failure, decoding, persistence, and a balance fold.

use std::collections::HashMap;
use std::time::Duration;

use bigdecimal::BigDecimal;

use crate::chain::{ChainClient, LogFilter};
use crate::decoder;
use crate::domain::{
    Balance, Transfer, CHUNK_DECREASE, CHUNK_INCREASE, DEFAULT_CHUNK, LOGS_DECREASE_THRESHOLD,
    MAX_CHUNK, MIN_CHUNK, NULL_ADDRESS, RETRIES, RETRY_DELAY_SECS, TRANSFER_TOPIC,
};
use crate::error::ChainError;
use crate::store::Store;

pub struct Backfill<'a> {
    chain: &'a ChainClient,
    store: &'a Store,
    chain_id: i64,
}

impl<'a> Backfill<'a> {
    pub fn new(chain: &'a ChainClient, store: &'a Store, chain_id: i64) -> Self {
        Self {
            chain,
            store,
            chain_id,
        }
    }

    /// Backfills `token_address` over `[start_block, end_block]`, replacing
    /// any previously persisted transfers/balances for that token.
    pub async fn run(
        &self,
        token_address: &str,
        start_block: u64,
        end_block: u64,
    ) -> eyre::Result<()> {
        tracing::info!(
            token = %token_address,
            start_block,
            end_block,
            "Truncating prior transfers and balances for token"
        );
        self.store
            .delete_token_balances(self.chain_id, token_address)
            .await?;
        self.store
            .delete_token_transfers(self.chain_id, token_address)
            .await?;

        let transfers = self
            .progressive_scan(token_address, start_block, end_block)
            .await?;

        let balances = fold_balances(self.chain_id, &transfers);
        tracing::info!(
            token = %token_address,
            transfers = transfers.len(),
            wallets = balances.len(),
            "Backfill scan complete, writing balance snapshot"
        );
        self.store.insert_balances(self.chain_id, &balances).await?;

        Ok(())
    }

    async fn progressive_scan(
        &self,
        token_address: &str,
        start_block: u64,
        end_block: u64,
    ) -> eyre::Result<Vec<Transfer>> {
        let mut cursor = start_block;
        let mut chunk = DEFAULT_CHUNK;
        let mut accum = Vec::new();
        let mut all_processed = 0usize;

        while cursor <= end_block {
            let window_end = std::cmp::min(cursor + chunk - 1, end_block);

            tracing::info!(
                from = cursor,
                to = window_end,
                chunk_size = chunk,
                "Scanning blocks"
            );

            let filter = LogFilter {
                from_block: cursor,
                to_block: window_end,
                address: Some(token_address.to_string()),
                topics: vec![TRANSFER_TOPIC.to_string()],
            };

            let (actual_end, logs) = retry_get_logs(
                |f| self.chain.get_logs(f),
                filter,
                RETRIES,
                RETRY_DELAY_SECS,
            )
            .await?;

            let mut transfers = Vec::with_capacity(logs.len());
            for log in logs.iter().filter(|l| !l.deleted) {
                let transfer = decoder::decode_log(log)?;
                transfers.push(transfer);
            }

            if !transfers.is_empty() {
                self.store.insert_transfers(&transfers).await?;
            }

            all_processed += transfers.len();
            tracing::info!(
                events_found = transfers.len(),
                accum = all_processed,
                "Chunk processed"
            );

            accum.extend(transfers);
            chunk = next_chunk_size(chunk, logs.len());
            cursor = actual_end + 1;
        }

        Ok(accum)
    }
}

/// Calls `get_logs` (via the supplied closure, so this loop can be driven
/// by a stub in tests without a live chain backend) through a retry loop
/// that halves the requested window on each failure (keeping `start`
/// fixed), sleeping `delay` between attempts. Returns the block actually
/// processed (which may be less than the originally requested `to_block`)
/// alongside the logs it returned, so the outer scan resumes exactly where
/// this call left off.
async fn retry_get_logs<F, Fut>(
    get_logs: F,
    mut filter: LogFilter,
    retries: usize,
    delay_secs: u64,
) -> Result<(u64, Vec<crate::domain::Log>), ChainError>
where
    F: Fn(&LogFilter) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<crate::domain::Log>, ChainError>>,
{
    let start = filter.from_block;
    let mut end = filter.to_block;

    for attempt in 0..retries {
        filter.to_block = end;
        match get_logs(&filter).await {
            Ok(logs) => return Ok((end, logs)),
            Err(e) => {
                if attempt < retries - 1 {
                    tracing::warn!(
                        from = start,
                        to = end,
                        width = end - start,
                        attempt,
                        error = %e,
                        "get_logs failed, halving window and retrying"
                    );
                    end = start + (end - start) / 2;
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                } else {
                    tracing::warn!(from = start, to = end, "Out of retries");
                    return Err(e);
                }
            }
        }
    }

    unreachable!("retries must be >= 1")
}

/// Applies the adaptive chunk-sizing rule: shrink when the last window
/// returned more than [`LOGS_DECREASE_THRESHOLD`] logs, otherwise grow,
/// clamped to `[MIN_CHUNK, MAX_CHUNK]`.
fn next_chunk_size(current: u64, logs_returned: usize) -> u64 {
    let factor = if logs_returned > LOGS_DECREASE_THRESHOLD {
        CHUNK_DECREASE
    } else {
        CHUNK_INCREASE
    };

    let next = (current as f64 * factor) as u64;
    next.clamp(MIN_CHUNK, MAX_CHUNK)
}

/// Folds a set of transfers into per-wallet balances: `+value` to `tx_to`,
/// `-value` to `tx_from`. Rows for the null address (mints/burns) are
/// dropped. Associative, so result is independent of transfer order.
fn fold_balances(chain_id: i64, transfers: &[Transfer]) -> Vec<Balance> {
    let mut deltas: HashMap<(String, String), BigDecimal> = HashMap::new();

    for t in transfers {
        if t.tx_to != NULL_ADDRESS {
            let entry = deltas
                .entry((t.token_address.clone(), t.tx_to.clone()))
                .or_insert_with(|| BigDecimal::from(0));
            *entry += &t.value;
        }
        if t.tx_from != NULL_ADDRESS {
            let entry = deltas
                .entry((t.token_address.clone(), t.tx_from.clone()))
                .or_insert_with(|| BigDecimal::from(0));
            *entry -= &t.value;
        }
    }

    deltas
        .into_iter()
        .map(|((token_address, wallet_address), balance)| Balance {
            chain_id,
            wallet_address,
            token_address,
            balance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn transfer(from: &str, to: &str, value: &str) -> Transfer {
        Transfer {
            chain_id: 1,
            block_num: 1,
            tx_hash: "0xhash".into(),
            tx_from: from.into(),
            tx_to: to.into(),
            value: BigDecimal::from_str(value).unwrap(),
            r#type: "Transfer",
            token_address: "0xtoken".into(),
            block_time: None,
        }
    }

    #[test]
    fn fold_computes_net_balances_and_drops_null_address() {
        let transfers = vec![
            transfer("0xa", "0xb", "10"),
            transfer("0xb", "0xc", "3"),
            transfer(NULL_ADDRESS, "0xa", "50"),
        ];

        let balances = fold_balances(1, &transfers);
        let mut by_wallet: HashMap<String, BigDecimal> = balances
            .into_iter()
            .map(|b| (b.wallet_address, b.balance))
            .collect();

        assert_eq!(
            by_wallet.remove("0xa").unwrap(),
            BigDecimal::from_str("40").unwrap()
        );
        assert_eq!(
            by_wallet.remove("0xb").unwrap(),
            BigDecimal::from_str("7").unwrap()
        );
        assert_eq!(
            by_wallet.remove("0xc").unwrap(),
            BigDecimal::from_str("3").unwrap()
        );
        assert!(by_wallet.is_empty());
        assert!(by_wallet.get(NULL_ADDRESS).is_none());
    }

    #[test]
    fn chunk_sizing_shrinks_on_large_result_sets() {
        assert_eq!(next_chunk_size(10_000, 6_000), 5_000);
    }

    #[test]
    fn chunk_sizing_grows_on_small_result_sets() {
        assert_eq!(next_chunk_size(10_000, 100), 15_000);
    }

    #[test]
    fn chunk_sizing_clamps_to_max() {
        assert_eq!(next_chunk_size(40_000, 100), 50_000);
    }

    #[test]
    fn chunk_sizing_clamps_to_min() {
        assert_eq!(next_chunk_size(1_500, 9_999), 2_000);
    }

    #[test]
    fn chunk_sizing_stays_within_bounds_for_any_input() {
        for chunk in [0u64, 1, 2_000, 25_000, 50_000, 1_000_000] {
            for logs in [0usize, 1, 5_000, 5_001, 1_000_000] {
                let next = next_chunk_size(chunk, logs);
                assert!(next >= MIN_CHUNK && next <= MAX_CHUNK);
            }
        }
    }

    #[tokio::test]
    async fn retry_wrapper_halves_the_window_and_resumes_after_the_processed_end() {
        // [100, 200] fails once, then [100, 150] succeeds: the outer scan
        // must resume at 151, never re-touching or skipping a block.
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let filter = LogFilter {
            from_block: 100,
            to_block: 200,
            address: None,
            topics: vec![],
        };

        let (actual_end, logs) = retry_get_logs(
            |f| {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let to_block = f.to_block;
                async move {
                    if n == 0 {
                        Err(ChainError::RangeTooLarge("range too large".into()))
                    } else {
                        assert_eq!(to_block, 150);
                        Ok(Vec::new())
                    }
                }
            },
            filter,
            RETRIES,
            0,
        )
        .await
        .expect("second attempt should succeed");

        assert_eq!(actual_end, 150);
        assert!(logs.is_empty());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_wrapper_propagates_the_error_after_exhausting_retries() {
        let filter = LogFilter {
            from_block: 10,
            to_block: 20,
            address: None,
            topics: vec![],
        };

        let result = retry_get_logs(
            |_f| async { Err(ChainError::Transport("connection refused".into())) },
            filter,
            3,
            0,
        )
        .await;

        assert!(result.is_err());
    }
}
