//! The off-chain message transport boundary (§1 Non-goals: "the pub/sub
//! transport used to receive off-chain messages ... a trait boundary is
//! defined; no concrete transport is implemented").
//!
//! The companion *Request Collector* this service expects upstream is
//! likewise out of scope; this trait is the entire contract between it
//! and the main loop.

use crate::types::MonitorRequest;
use async_trait::async_trait;

/// Fire-and-forget inbound channel for `MonitorRequest` blobs (§4.F, §6).
/// The sender is never notified of validation outcomes; intake increments
/// a rejection counter instead (§7 `InvalidRequest`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Waits for the next request. Returning `None` signals the transport
    /// has shut down and the main loop should stop polling it.
    async fn recv(&mut self) -> Option<MonitorRequest>;
}

/// Test double backed by an in-memory queue.
pub struct ChannelTransport {
    receiver: tokio::sync::mpsc::UnboundedReceiver<MonitorRequest>,
}

impl ChannelTransport {
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<MonitorRequest>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (tx, Self { receiver: rx })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<MonitorRequest> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};

    fn sample() -> MonitorRequest {
        MonitorRequest {
            token_network: Address::ZERO,
            channel_id: U256::from(1u64),
            non_closing_participant: Address::ZERO,
            nonce: U256::from(1u64),
            balance_hash: B256::ZERO,
            additional_hash: B256::ZERO,
            closing_signature: vec![0; 65],
            non_closing_signature: vec![0; 65],
            reward_amount: U256::ZERO,
            monitoring_service_contract_address: Address::ZERO,
            chain_id: 1,
            reward_proof_signature: vec![0; 65],
        }
    }

    #[tokio::test]
    async fn delivers_sent_requests_in_order() {
        let (tx, mut transport) = ChannelTransport::new();
        tx.send(sample()).unwrap();
        assert!(transport.recv().await.is_some());
    }

    #[tokio::test]
    async fn recv_returns_none_once_sender_dropped() {
        let (tx, mut transport) = ChannelTransport::new();
        drop(tx);
        assert!(transport.recv().await.is_none());
    }
}
