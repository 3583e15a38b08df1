use crate::engine::ChainIntent;
use crate::error::ServiceError;
use alloy::primitives::{Address, B256};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{ClaimRewardCallArgs, MonitorCallArgs};
use super::ChainProvider;

/// Turns a [`ChainIntent`] into a signed, submitted transaction (§4.G).
/// Does not wait for a receipt: the chain follower closing the loop by
/// observing `MonitoringAssistedByMS` is what tells the reducer the
/// submission landed.
pub struct ChainWriter {
    provider: Arc<dyn ChainProvider>,
    monitor_contract: Address,
}

impl ChainWriter {
    pub fn new(provider: Arc<dyn ChainProvider>, monitor_contract: Address) -> Self {
        Self { provider, monitor_contract }
    }

    pub async fn submit(&self, intent: &ChainIntent) -> Result<B256, ServiceError> {
        let result = match intent {
            ChainIntent::SubmitMonitor { request, .. } => {
                let call = MonitorCallArgs {
                    non_closing_participant: request.non_closing_participant,
                    balance_hash: request.balance_hash,
                    nonce: request.nonce,
                    additional_hash: request.additional_hash,
                    closing_signature: request.closing_signature.clone(),
                    non_closing_signature: request.non_closing_signature.clone(),
                    reward_amount: request.reward_amount,
                    token_network: request.token_network,
                    reward_proof_signature: request.reward_proof_signature.clone(),
                };
                self.with_retry(|| self.provider.submit_monitor(self.monitor_contract, call.clone())).await
            }
            ChainIntent::ClaimReward { channel, closing_participant, non_closing_participant } => {
                let call = ClaimRewardCallArgs {
                    channel_identifier: channel.channel_id,
                    token_network: channel.token_network,
                    closing_participant: *closing_participant,
                    non_closing_participant: *non_closing_participant,
                };
                self.with_retry(|| self.provider.submit_claim_reward(self.monitor_contract, call.clone())).await
            }
        };

        if let Err(ServiceError::TransientRpc(ref msg)) = result {
            tracing::warn!(error = %msg, "chain writer exhausted retries; action will be retried next tick");
        }
        result
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
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
