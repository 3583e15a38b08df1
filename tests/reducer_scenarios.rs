//! End-to-end scenarios over a real (in-memory sqlite) `Store`, each
//! standing up a fresh database and feeding it a literal event sequence.

use alloy::primitives::{address, Address, B256, U256};
use monitoring_service::db::Store;
use monitoring_service::engine::{apply, due_actions, ChainIntent, ReducerConfig};
use monitoring_service::events::ChainEvent;
use monitoring_service::types::{ActionKind, ChannelKey, MonitorRequest};

const REGISTRY: Address = address!("0000000000000000000000000000000000000a");
const MS: Address = address!("0000000000000000000000000000000000000b");
const C1: Address = address!("0000000000000000000000000000000000000001");
const C2: Address = address!("0000000000000000000000000000000000000002");

async fn fresh_store() -> Store {
    let store = Store::connect_in_memory().await.unwrap();
    store.ensure_blockchain_state(1, REGISTRY, MS, MS, 0).await.unwrap();
    store
}

fn monitor_request(channel: ChannelKey, non_closing: Address, nonce: u64) -> MonitorRequest {
    MonitorRequest {
        token_network: channel.token_network,
        channel_id: channel.channel_id,
        non_closing_participant: non_closing,
        nonce: U256::from(nonce),
        balance_hash: B256::repeat_byte(0xAA),
        additional_hash: B256::repeat_byte(0xBB),
        closing_signature: vec![1; 65],
        non_closing_signature: vec![2; 65],
        reward_amount: U256::from(5u64),
        monitoring_service_contract_address: MS,
        chain_id: 1,
        reward_proof_signature: vec![3; 65],
    }
}

#[tokio::test]
async fn happy_monitor_schedules_and_fires_monitor_call() {
    let store = fresh_store().await;
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    apply(&mut snapshot, &ChainEvent::TokenNetworkCreated { token_network_address: REGISTRY, block: 1 }, &cfg).unwrap();
    apply(
        &mut snapshot,
        &ChainEvent::ChannelOpened { channel, participant1: C1, participant2: C2, settle_timeout: 20, block: 2 },
        &cfg,
    )
    .unwrap();
    snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel, C2, 1));
    apply(&mut snapshot, &ChainEvent::ChannelClosed { channel, closing_participant: C1, nonce: U256::ZERO, block: 10 }, &cfg).unwrap();
    store.commit(&snapshot, &[]).await.unwrap();

    let mut snapshot = store.load_snapshot().await.unwrap();
    let action = snapshot.actions_for_channel(channel, ActionKind::MonitoringTriggered).unwrap();
    assert_eq!(action.trigger_block, 26);

    let fired = due_actions(&mut snapshot, 26);
    assert_eq!(fired.len(), 1);
    assert!(matches!(fired[0].1, ChainIntent::SubmitMonitor { .. }));
    store.commit(&snapshot, &[fired[0].0.clone()]).await.unwrap();
}

#[tokio::test]
async fn preempted_by_counterparty_cancels_pending_action_before_it_fires() {
    let store = fresh_store().await;
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    apply(&mut snapshot, &ChainEvent::ChannelOpened { channel, participant1: C1, participant2: C2, settle_timeout: 20, block: 2 }, &cfg).unwrap();
    snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel, C2, 1));
    apply(&mut snapshot, &ChainEvent::ChannelClosed { channel, closing_participant: C1, nonce: U256::ZERO, block: 10 }, &cfg).unwrap();
    apply(
        &mut snapshot,
        &ChainEvent::NonClosingBalanceProofUpdated { channel, closing_participant: C1, nonce: U256::from(1u64), block: 15 },
        &cfg,
    )
    .unwrap();
    store.commit(&snapshot, &[]).await.unwrap();

    let mut snapshot = store.load_snapshot().await.unwrap();
    assert!(snapshot.actions_for_channel(channel, ActionKind::MonitoringTriggered).is_none());
    let fired = due_actions(&mut snapshot, 26);
    assert!(fired.is_empty(), "no monitor() call should be made once preempted");
}

#[tokio::test]
async fn reward_claim_scheduled_after_settlement_following_ms_submission() {
    let store = fresh_store().await;
    let cfg = ReducerConfig { monitor_fraction: 0.8, claim_delay_blocks: 5 };
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    apply(&mut snapshot, &ChainEvent::ChannelOpened { channel, participant1: C1, participant2: C2, settle_timeout: 20, block: 2 }, &cfg).unwrap();
    snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel, C2, 1));
    apply(&mut snapshot, &ChainEvent::ChannelClosed { channel, closing_participant: C1, nonce: U256::ZERO, block: 10 }, &cfg).unwrap();
    apply(&mut snapshot, &ChainEvent::MonitoringAssistedByMS { channel, non_closing_participant: C2, ms_address: MS, block: 27 }, &cfg).unwrap();
    apply(&mut snapshot, &ChainEvent::ChannelSettled { channel, block: 30 }, &cfg).unwrap();
    store.commit(&snapshot, &[]).await.unwrap();

    let snapshot = store.load_snapshot().await.unwrap();
    let claim = snapshot.actions_for_channel(channel, ActionKind::ClaimRewardTriggered).unwrap();
    assert_eq!(claim.trigger_block, 35);
    assert!(snapshot.actions_for_channel(channel, ActionKind::MonitoringTriggered).is_none());
}

#[tokio::test]
async fn stale_request_leaves_stored_state_unchanged() {
    let store = fresh_store().await;
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    apply(&mut snapshot, &ChainEvent::ChannelOpened { channel, participant1: C1, participant2: C2, settle_timeout: 20, block: 2 }, &cfg).unwrap();
    snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel, C2, 5));
    store.commit(&snapshot, &[]).await.unwrap();

    let mut snapshot = store.load_snapshot().await.unwrap();
    let stale = monitor_request(channel, C2, 3);
    if stale.nonce <= snapshot.monitor_requests[&(channel.token_network, channel.channel_id, C2)].nonce {
        // monotone nonce law (§8): the lower-nonce request is simply never applied
    } else {
        snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), stale);
    }
    store.commit(&snapshot, &[]).await.unwrap();

    let reloaded = store.load_snapshot().await.unwrap();
    assert_eq!(reloaded.monitor_requests[&(channel.token_network, channel.channel_id, C2)].nonce, U256::from(5u64));
}

#[tokio::test]
async fn unknown_channel_close_is_invariant_violation_and_tick_is_not_committed() {
    let store = fresh_store().await;
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(999u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    let result = apply(&mut snapshot, &ChainEvent::ChannelClosed { channel, closing_participant: C1, nonce: U256::ZERO, block: 1 }, &cfg);
    assert!(result.is_err());
    // The caller (service.rs) never calls `commit` on this snapshot; confirm the
    // database still reflects nothing having happened.
    let reloaded = store.load_snapshot().await.unwrap();
    assert!(reloaded.channels.is_empty());
}
