//! The JSON-RPC provider boundary (§1 Non-goals: "the low-level RPC
//! transport ... we depend on a JSON-RPC provider crate for this").
//!
//! [`ChainProvider`] is the narrow surface `reader.rs` and `writer.rs`
//! actually need; [`AlloyProvider`] is the only production implementation,
//! backed by `alloy`'s HTTP provider and a local signer. Tests substitute a
//! hand-rolled double instead of this trait's production impl.

use crate::error::ServiceError;
use crate::events::{LogPosition, RawLog};
use crate::types::BlockNumber;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

sol! {
    #[sol(rpc)]
    interface IMonitoringService {
        function monitor(
            address non_closing_participant,
            uint256 balance_hash,
            uint256 nonce,
            uint256 additional_hash,
            bytes closing_signature,
            bytes non_closing_signature,
            uint256 reward_amount,
            address token_network,
            bytes reward_proof_signature
        ) external returns (uint256);

        function claimReward(
            uint256 channel_identifier,
            address token_network,
            address closing_participant,
            address non_closing_participant
        ) external returns (uint256);
    }
}

/// Everything the reader and writer need from a live node, abstracted so
/// the main loop never names `alloy` types directly outside this module.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ServiceError>;
    async fn latest_block_number(&self) -> Result<BlockNumber, ServiceError>;
    async fn get_logs(&self, from: BlockNumber, to: BlockNumber, addresses: &[Address]) -> Result<Vec<RawLog>, ServiceError>;

    /// Submits a signed `monitor(...)` call and returns its transaction
    /// hash. Does not wait for inclusion (§4.G: "not responsible for
    /// receipt confirmation").
    async fn submit_monitor(&self, monitor_contract: Address, call: MonitorCallArgs) -> Result<B256, ServiceError>;

    async fn submit_claim_reward(&self, monitor_contract: Address, call: ClaimRewardCallArgs) -> Result<B256, ServiceError>;

    /// Looks up whether `tx_hash` has landed on-chain yet (§4.E:
    /// "completion (transaction hash observed on-chain) deletes the action
    /// row"). `Pending` covers both "not yet mined" and "node doesn't have
    /// it" — the caller treats both the same way: check again next tick.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<ReceiptStatus, ServiceError>;
}

/// Outcome of looking up a submitted transaction's receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Success,
    Reverted,
}

/// Arguments to `monitor(...)`, already validated/signed by the time they
/// reach the provider (§4.F built the [`crate::types::MonitorRequest`] this
/// is derived from).
#[derive(Debug, Clone)]
pub struct MonitorCallArgs {
    pub non_closing_participant: Address,
    pub balance_hash: B256,
    pub nonce: U256,
    pub additional_hash: B256,
    pub closing_signature: Vec<u8>,
    pub non_closing_signature: Vec<u8>,
    pub reward_amount: U256,
    pub token_network: Address,
    pub reward_proof_signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ClaimRewardCallArgs {
    pub channel_identifier: U256,
    pub token_network: Address,
    pub closing_participant: Address,
    pub non_closing_participant: Address,
}

/// Production [`ChainProvider`] backed by `alloy`'s HTTP JSON-RPC
/// transport and a local wallet for signing outbound transactions.
pub struct AlloyProvider {
    inner: Box<dyn Provider + Send + Sync>,
    signer_address: Address,
}

impl AlloyProvider {
    pub async fn connect(rpc_url: &str, private_key: &str) -> Result<Self, ServiceError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| ServiceError::SignatureFailure(format!("invalid private key: {e}")))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let url = rpc_url
            .parse()
            .map_err(|e| ServiceError::ConfigMismatch(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        Ok(Self { inner: Box::new(provider), signer_address })
    }

    pub fn address(&self) -> Address {
        self.signer_address
    }
}

#[async_trait]
impl ChainProvider for AlloyProvider {
    async fn chain_id(&self) -> Result<u64, ServiceError> {
        self.inner
            .get_chain_id()
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))
    }

    async fn latest_block_number(&self) -> Result<BlockNumber, ServiceError> {
        self.inner
            .get_block_number()
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))
    }

    async fn get_logs(&self, from: BlockNumber, to: BlockNumber, addresses: &[Address]) -> Result<Vec<RawLog>, ServiceError> {
        let filter = Filter::new().from_block(from).to_block(to).address(addresses.to_vec());
        let logs = self
            .inner
            .get_logs(&filter)
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))?;

        logs.into_iter()
            .map(|log| {
                let block_number = log
                    .block_number
                    .ok_or_else(|| ServiceError::MalformedEvent("log missing block_number".into()))?;
                let transaction_index = log
                    .transaction_index
                    .ok_or_else(|| ServiceError::MalformedEvent("log missing transaction_index".into()))?;
                let log_index = log
                    .log_index
                    .ok_or_else(|| ServiceError::MalformedEvent("log missing log_index".into()))?;
                Ok(RawLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.to_vec(),
                    position: LogPosition { block_number, transaction_index, log_index },
                })
            })
            .collect()
    }

    async fn submit_monitor(&self, monitor_contract: Address, call: MonitorCallArgs) -> Result<B256, ServiceError> {
        let data = IMonitoringService::monitorCall {
            non_closing_participant: call.non_closing_participant,
            balance_hash: U256::from_be_bytes(call.balance_hash.0),
            nonce: call.nonce,
            additional_hash: U256::from_be_bytes(call.additional_hash.0),
            closing_signature: call.closing_signature.into(),
            non_closing_signature: call.non_closing_signature.into(),
            reward_amount: call.reward_amount,
            token_network: call.token_network,
            reward_proof_signature: call.reward_proof_signature.into(),
        }
        .abi_encode();

        let tx = TransactionRequest::default().with_to(monitor_contract).with_input(data);
        let pending = self
            .inner
            .send_transaction(tx)
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn submit_claim_reward(&self, monitor_contract: Address, call: ClaimRewardCallArgs) -> Result<B256, ServiceError> {
        let data = IMonitoringService::claimRewardCall {
            channel_identifier: call.channel_identifier,
            token_network: call.token_network,
            closing_participant: call.closing_participant,
            non_closing_participant: call.non_closing_participant,
        }
        .abi_encode();

        let tx = TransactionRequest::default().with_to(monitor_contract).with_input(data);
        let pending = self
            .inner
            .send_transaction(tx)
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<ReceiptStatus, ServiceError> {
        let receipt = self
            .inner
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ServiceError::TransientRpc(e.to_string()))?;
        Ok(match receipt {
            None => ReceiptStatus::Pending,
            Some(receipt) if receipt.status() => ReceiptStatus::Success,
            Some(_) => ReceiptStatus::Reverted,
        })
    }
}
