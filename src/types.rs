//! Domain entities shared by the decoder, reducer, and database.
//!
//! Everything here is plain data: no I/O, no async. `alloy`'s primitive
//! types (`Address`, `U256`, `B256`) are reused directly rather than
//! wrapped, since they already round-trip through hex strings the way the
//! database and the JSON-RPC layer both want.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Block height. The chain itself never produces more than 2^64 blocks in
/// any network this service targets, so a plain `u64` is used everywhere
/// instead of `U256`.
pub type BlockNumber = u64;

/// `(token_network, channel_id)` uniquely identifies a channel across its
/// whole lifetime, independent of which participant is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub token_network: Address,
    pub channel_id: U256,
}

impl ChannelKey {
    pub fn new(token_network: Address, channel_id: U256) -> Self {
        Self { token_network, channel_id }
    }
}

/// The lifecycle state of a channel, per §4.D of the spec. There is no
/// `Unknown`/default variant on purpose: a channel row only ever exists
/// once it has been opened, and `ChannelOpened` is the only handler that
/// inserts a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Opened,
    Closed,
    Settled,
}

/// Materialized channel row. Participants are stored already ordered
/// lexicographically (`participant1 < participant2`) so that comparisons
/// and signature-recovery checks never have to re-sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub key: ChannelKey,
    pub participant1: Address,
    pub participant2: Address,
    pub settle_timeout: u64,
    pub state: ChannelState,
    pub closing_block: Option<BlockNumber>,
    pub closing_participant: Option<Address>,
    pub closing_tx_hash: Option<B256>,
    /// Highest nonce we've observed on-chain for this channel, via
    /// `NonClosingBalanceProofUpdated`. Used by the action scheduler's
    /// precondition re-check.
    pub onchain_nonce: Option<U256>,
    pub monitor_tx_hash: Option<B256>,
    pub claim_tx_hash: Option<B256>,
    /// Set once `MonitoringAssistedByMS` names this service's address for
    /// the channel; gates `ActionClaimRewardTriggered` eligibility.
    pub ms_submitted: bool,
}

impl Channel {
    pub fn new(
        key: ChannelKey,
        participant1: Address,
        participant2: Address,
        settle_timeout: u64,
    ) -> Self {
        let (participant1, participant2) = order_participants(participant1, participant2);
        Self {
            key,
            participant1,
            participant2,
            settle_timeout,
            state: ChannelState::Opened,
            closing_block: None,
            closing_participant: None,
            closing_tx_hash: None,
            onchain_nonce: None,
            monitor_tx_hash: None,
            claim_tx_hash: None,
            ms_submitted: false,
        }
    }

    pub fn participants(&self) -> (Address, Address) {
        (self.participant1, self.participant2)
    }

    pub fn other_participant(&self, participant: Address) -> Option<Address> {
        if participant == self.participant1 {
            Some(self.participant2)
        } else if participant == self.participant2 {
            Some(self.participant1)
        } else {
            None
        }
    }
}

/// Orders two addresses the way the channel contract does: lexicographic
/// on the byte representation, lower first.
pub fn order_participants(p1: Address, p2: Address) -> (Address, Address) {
    match p1.cmp(&p2) {
        Ordering::Greater => (p2, p1),
        _ => (p1, p2),
    }
}

/// A stored balance proof plus the signatures and reward terms that make
/// it a valid delegation to this service, per §3/§6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRequest {
    pub token_network: Address,
    pub channel_id: U256,
    pub non_closing_participant: Address,

    pub nonce: U256,
    pub balance_hash: B256,
    pub additional_hash: B256,
    /// Signature of the closing participant over the balance proof.
    pub closing_signature: Vec<u8>,
    /// Signature of the non-closing participant countersigning the same
    /// balance proof, authorizing this service to submit it on their
    /// behalf.
    pub non_closing_signature: Vec<u8>,

    pub reward_amount: U256,
    pub monitoring_service_contract_address: Address,
    pub chain_id: u64,
    /// Signature over the reward terms, authorizing this service to claim
    /// `reward_amount` from the non-closer's deposit after settlement.
    pub reward_proof_signature: Vec<u8>,
}

impl MonitorRequest {
    pub fn key(&self) -> (Address, U256, Address) {
        (self.token_network, self.channel_id, self.non_closing_participant)
    }

    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey::new(self.token_network, self.channel_id)
    }
}

/// Singleton row tracked by the database; see §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
    pub latest_confirmed_block: BlockNumber,
    pub chain_id: u64,
    pub token_network_registry_address: Address,
    pub monitor_contract_address: Address,
    pub monitoring_service_address: Address,
    pub token_networks: Vec<Address>,
}

impl BlockchainState {
    pub fn knows_token_network(&self, address: Address) -> bool {
        self.token_networks.iter().any(|a| *a == address)
    }
}

/// The two kinds of scheduled on-chain reaction, per §4.D/§4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    MonitoringTriggered,
    ClaimRewardTriggered,
}

impl ActionKind {
    fn tag(self) -> &'static str {
        match self {
            ActionKind::MonitoringTriggered => "monitor",
            ActionKind::ClaimRewardTriggered => "claim",
        }
    }
}

/// A timed on-chain reaction. `id` is derived deterministically from
/// `(kind, channel_key)` rather than from a random UUID or a counter, so
/// that replaying the same event log always produces the same action ids
/// (Invariant, §8) and rescheduling the same `(kind, channel_key)` at a new
/// trigger block overwrites the previous row instead of coexisting with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: String,
    pub trigger_block: BlockNumber,
    pub kind: ActionKind,
    pub channel_key: ChannelKey,
    /// Set once the chain writer's submission returns a transaction hash;
    /// `None` while pending or after a failed/reverted submission. Used to
    /// reconcile in-flight rows against on-chain receipts on restart
    /// (§4.E).
    pub submitted_tx_hash: Option<B256>,
}

impl ScheduledAction {
    pub fn new(kind: ActionKind, channel_key: ChannelKey, trigger_block: BlockNumber) -> Self {
        let id = derive_action_id(kind, channel_key);
        Self { id, trigger_block, kind, channel_key, submitted_tx_hash: None }
    }
}

/// `(kind, channel_key)` is the deduplication key from §3: two actions of
/// the same kind for the same channel must never coexist, so the id is
/// derived from `kind` and `channel_key` alone.
pub fn derive_action_id(kind: ActionKind, channel_key: ChannelKey) -> String {
    format!("{}:{:#x}:{}", kind.tag(), channel_key.token_network, channel_key.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn order_participants_is_symmetric() {
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");
        assert_eq!(order_participants(a, b), order_participants(b, a));
    }

    #[test]
    fn action_id_depends_only_on_kind_and_channel() {
        let key = ChannelKey::new(Address::ZERO, U256::from(3u64));
        let a = derive_action_id(ActionKind::MonitoringTriggered, key);
        let b = derive_action_id(ActionKind::MonitoringTriggered, key);
        assert_eq!(a, b);
        let c = derive_action_id(ActionKind::ClaimRewardTriggered, key);
        assert_ne!(a, c);
    }

    #[test]
    fn rescheduling_same_kind_and_channel_at_a_new_trigger_block_reuses_the_id() {
        let key = ChannelKey::new(Address::ZERO, U256::from(3u64));
        let first = ScheduledAction::new(ActionKind::MonitoringTriggered, key, 26);
        let rescheduled = ScheduledAction::new(ActionKind::MonitoringTriggered, key, 40);
        assert_eq!(first.id, rescheduled.id, "same (kind, channel_key) must never coexist as two rows");
    }
}
