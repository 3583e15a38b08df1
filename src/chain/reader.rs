use crate::error::ServiceError;
use crate::events::{decode_log, ChainEvent, RawLog};
use crate::types::BlockNumber;
use alloy::primitives::{Address, B256};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;

use super::provider::ReceiptStatus;
use super::ChainProvider;

/// Polls a [`ChainProvider`] for confirmed logs and turns them into an
/// ordered, decoded event stream (§4.A). Knows nothing about channel
/// state — it only tracks which addresses to filter on and how deep a log
/// must be buried before it is trusted.
pub struct ChainReader {
    provider: Arc<dyn ChainProvider>,
    required_confirmations: u64,
}

impl ChainReader {
    pub fn new(provider: Arc<dyn ChainProvider>, required_confirmations: u64) -> Self {
        Self { provider, required_confirmations }
    }

    /// The highest block number that is safe to treat as confirmed right
    /// now, or `None` if the chain hasn't produced enough blocks yet.
    pub async fn confirmed_head(&self) -> Result<Option<BlockNumber>, ServiceError> {
        let head = self.with_retry(|| self.provider.latest_block_number()).await?;
        Ok(head.checked_sub(self.required_confirmations))
    }

    /// Fetches and decodes every log in `(from, to]` emitted by `addresses`,
    /// in canonical `(block, tx_index, log_index)` order, followed by a
    /// synthetic [`ChainEvent::TickAdvanced`] for `to` (§4.D).
    ///
    /// Returns no events at all (not a partial prefix) if the underlying
    /// fetch fails after exhausting retries — a tick that can't complete
    /// simply doesn't commit (§5 "Timeouts").
    pub async fn poll(&self, from: BlockNumber, to: BlockNumber, addresses: &[Address]) -> Result<Vec<ChainEvent>, ServiceError> {
        if from >= to {
            return Ok(vec![ChainEvent::TickAdvanced(to)]);
        }

        let mut logs: Vec<RawLog> = self
            .with_retry(|| self.provider.get_logs(from + 1, to, addresses))
            .await?;
        logs.sort_by_key(|log| log.position);

        let mut events = Vec::with_capacity(logs.len() + 1);
        for log in &logs {
            match decode_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, address = %log.address, "dropping malformed log"),
            }
        }
        events.push(ChainEvent::TickAdvanced(to));
        Ok(events)
    }

    /// Looks up a submitted action's receipt, retrying transient RPC
    /// failures the same way `poll` does (§4.E reconciliation).
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<ReceiptStatus, ServiceError> {
        self.with_retry(|| self.provider.transaction_receipt(tx_hash)).await
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..ExponentialBackoff::default()
        };
        retry(backoff, || async {
            op().await.map_err(|err| match err {
                ServiceError::TransientRpc(_) => backoff::Error::transient(err),
                other => backoff::Error::permanent(other),
            })
        })
        .await
    }
}
