//! Wraps the JSON-RPC and streaming subscription endpoints of an
//! EVM-compatible chain backend. No persistence happens here — only
//! network I/O and the translation from `alloy`'s wire types into the
//! crate's own [`Log`] domain record.

use alloy::network::Ethereum;
use alloy::primitives::{Address, B256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log as RpcLog};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::str::FromStr;

use crate::config::Config;
use crate::domain::Log;
use crate::error::ChainError;

/// HTTP provider type, with the recommended fillers `ProviderBuilder::new()`
/// installs (gas, blob gas, nonce, chain id).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// A block range and optional address/topic filter for `eth_getLogs`.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Option<String>,
    pub topics: Vec<String>,
}

/// Thin wrapper around an `alloy` HTTP provider for request/response calls,
/// plus the WebSocket URL needed to open a streaming subscription on
/// demand (a fresh connection per `subscribe_logs` call, matching the
/// original's one-shot `websockets.connect` per indexing run).
pub struct ChainClient {
    chain_id: i64,
    http: HttpProvider,
    ws_url: String,
}

impl ChainClient {
    pub async fn connect(config: &Config) -> eyre::Result<Self> {
        let http = ProviderBuilder::new()
            .connect_http(config.rpc_http_url().parse()?);

        Ok(Self {
            chain_id: config.chain_id as i64,
            http,
            ws_url: config.rpc_ws_url(),
        })
    }

    /// Returns the current chain head.
    pub async fn get_latest_block(&self) -> Result<u64, ChainError> {
        self.http
            .get_block_number()
            .await
            .map_err(classify_transport_error)
    }

    /// Returns decoded logs matching `filter`.
    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        let mut f = Filter::new()
            .from_block(filter.from_block)
            .to_block(filter.to_block);

        if let Some(address) = &filter.address {
            let addr =
                Address::from_str(address).map_err(|e| ChainError::Rpc(e.to_string()))?;
            f = f.address(addr);
        }

        let topics: Result<Vec<B256>, _> =
            filter.topics.iter().map(|t| B256::from_str(t)).collect();
        let topics = topics.map_err(|e| ChainError::Rpc(e.to_string()))?;
        if !topics.is_empty() {
            f = f.event_signature(topics);
        }

        let logs = self.http.get_logs(&f).await.map_err(classify_range_error)?;

        let mut out = Vec::with_capacity(logs.len());
        for log in &logs {
            out.push(self.to_domain_log(log).await?);
        }
        Ok(out)
    }

    /// Opens a fresh streaming subscription for `filter`, yielding decoded
    /// logs as they occur. Reorg-retracted logs arrive with `deleted=true`.
    pub async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<impl Stream<Item = Result<Log, ChainError>> + '_, ChainError> {
        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(classify_transport_error)?;

        let mut f = Filter::new();
        if let Some(address) = &filter.address {
            let addr =
                Address::from_str(address).map_err(|e| ChainError::Rpc(e.to_string()))?;
            f = f.address(addr);
        }
        let topics: Result<Vec<B256>, _> =
            filter.topics.iter().map(|t| B256::from_str(t)).collect();
        let topics = topics.map_err(|e| ChainError::Rpc(e.to_string()))?;
        if !topics.is_empty() {
            f = f.event_signature(topics);
        }

        let sub = provider
            .subscribe_logs(&f)
            .await
            .map_err(classify_transport_error)?;

        let chain_id = self.chain_id;
        let stream = sub
            .into_stream()
            .then(move |log| async move { Ok(rpc_log_to_domain(&log, chain_id, None)) });

        Ok(stream)
    }

    /// Normalizes a hex address to mixed-case checksum form (EIP-55).
    pub fn to_checksum(&self, addr: &str) -> Result<String, ChainError> {
        let address = Address::from_str(addr).map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(address.to_checksum(None))
    }

    async fn to_domain_log(&self, log: &RpcLog) -> Result<Log, ChainError> {
        let block_time = if let Some(block_num) = log.block_number {
            self.block_timestamp(block_num).await?
        } else {
            None
        };
        Ok(rpc_log_to_domain(log, self.chain_id, block_time))
    }

    async fn block_timestamp(&self, block_num: u64) -> Result<Option<DateTime<Utc>>, ChainError> {
        let block = self
            .http
            .get_block_by_number(BlockNumberOrTag::Number(block_num))
            .await
            .map_err(classify_transport_error)?;
        Ok(block.and_then(|b| DateTime::from_timestamp(b.header.timestamp as i64, 0)))
    }
}

fn rpc_log_to_domain(log: &RpcLog, chain_id: i64, block_time: Option<DateTime<Utc>>) -> Log {
    let topics: Vec<String> = log
        .inner
        .data
        .topics()
        .iter()
        .map(|t| format!("{:#x}", t))
        .collect();

    Log {
        chain_id,
        block_number: log.block_number.unwrap_or(0),
        block_hash: log
            .block_hash
            .map(|h| format!("{:#x}", h))
            .unwrap_or_default(),
        address: format!("{:#x}", log.inner.address),
        topics,
        data: format!("0x{}", hex::encode(log.inner.data.data.as_ref())),
        transaction_hash: log
            .transaction_hash
            .map(|h| format!("{:#x}", h))
            .unwrap_or_default(),
        log_index: log.log_index.unwrap_or(0),
        deleted: log.removed,
        block_time,
    }
}

/// Classifies a transport-layer failure (connection refused, timeout, DNS).
fn classify_transport_error<E: std::fmt::Display>(e: E) -> ChainError {
    let msg = e.to_string();
    if msg.contains("429") || msg.to_ascii_lowercase().contains("rate limit") {
        ChainError::RateLimit(msg)
    } else {
        ChainError::Transport(msg)
    }
}

/// Classifies an `eth_getLogs` failure, distinguishing a backend-rejected
/// range (too many blocks/results in one query) from a plain transport
/// failure.
fn classify_range_error<E: std::fmt::Display>(e: E) -> ChainError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("block range")
        || lower.contains("too many")
        || lower.contains("query returned more than")
        || lower.contains("range too large")
    {
        ChainError::RangeTooLarge(msg)
    } else {
        classify_transport_error(msg)
    }
}
