//! Real-time tailer: subscribes to new logs for a token and applies each
//! decoded transfer to the Store as it arrives.
//!
//! State machine: `Disconnected -> Connecting -> Subscribed -> Processing`.
//! A dropped subscription or stream error sends the tailer back to
//! `Disconnected`, from which the caller may reconnect.

use futures::StreamExt;

use crate::chain::{ChainClient, LogFilter};
use crate::decoder;
use crate::domain::TRANSFER_TOPIC;
use crate::error::TailerError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    Disconnected,
    Connecting,
    Subscribed,
    Processing,
}

pub struct Tailer<'a> {
    chain: &'a ChainClient,
    store: &'a Store,
    token_address: String,
    state: TailerState,
}

impl<'a> Tailer<'a> {
    pub fn new(chain: &'a ChainClient, store: &'a Store, token_address: impl Into<String>) -> Self {
        Self {
            chain,
            store,
            token_address: token_address.into(),
            state: TailerState::Disconnected,
        }
    }

    pub fn state(&self) -> TailerState {
        self.state
    }

    /// Subscribes and processes logs until the stream ends or is cancelled.
    /// Runs until `cancel` resolves or the underlying subscription closes.
    pub async fn run(&mut self, cancel: tokio_util::sync::CancellationToken) -> Result<(), TailerError> {
        self.state = TailerState::Connecting;

        let filter = LogFilter {
            from_block: 0,
            to_block: 0,
            address: Some(self.token_address.clone()),
            topics: vec![TRANSFER_TOPIC.to_string()],
        };

        let stream = self.chain.subscribe_logs(&filter).await?;
        self.state = TailerState::Subscribed;
        tracing::info!(token = %self.token_address, "Subscribed to live transfer logs");

        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Tailer cancelled, shutting down");
                    self.state = TailerState::Disconnected;
                    return Ok(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(log)) => {
                            self.state = TailerState::Processing;
                            if log.deleted {
                                tracing::warn!(
                                    tx_hash = %log.transaction_hash,
                                    log_index = log.log_index,
                                    "Dropping reorg-retracted log"
                                );
                                self.state = TailerState::Subscribed;
                                continue;
                            }

                            // A log reaching here was already filtered by
                            // topics=[TRANSFER_TOPIC]; a decode failure means
                            // the backend sent something it shouldn't have.
                            let transfer = decoder::decode_log(&log).map_err(|e| {
                                tracing::error!(
                                    tx_hash = %log.transaction_hash,
                                    log_index = log.log_index,
                                    error = %e,
                                    "Decoder rejected a log that matched the Transfer topic filter"
                                );
                                e
                            })?;
                            self.store.apply_transfer(&transfer).await?;
                            tracing::info!(
                                tx_hash = %transfer.tx_hash,
                                from = %transfer.tx_from,
                                to = %transfer.tx_to,
                                "Applied live transfer"
                            );
                            self.state = TailerState::Subscribed;
                        }
                        Some(Err(e)) => {
                            self.state = TailerState::Disconnected;
                            return Err(e.into());
                        }
                        None => {
                            self.state = TailerState::Disconnected;
                            return Err(TailerError::ProtocolMismatch(
                                "subscription stream closed unexpectedly".into(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

