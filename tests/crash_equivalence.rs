//! Crash-equivalence law (§8): committing after every event must produce
//! the same final materialized state as committing once at the end, for
//! the same event sequence.

use alloy::primitives::{address, Address, B256, U256};
use monitoring_service::db::Store;
use monitoring_service::engine::{apply, ReducerConfig};
use monitoring_service::events::ChainEvent;
use monitoring_service::types::{ChannelKey, MonitorRequest};

const REGISTRY: Address = address!("0000000000000000000000000000000000000a");
const MS: Address = address!("0000000000000000000000000000000000000b");
const C1: Address = address!("0000000000000000000000000000000000000001");
const C2: Address = address!("0000000000000000000000000000000000000002");

fn event_sequence() -> Vec<ChainEvent> {
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));
    vec![
        ChainEvent::TokenNetworkCreated { token_network_address: REGISTRY, block: 1 },
        ChainEvent::ChannelOpened { channel, participant1: C1, participant2: C2, settle_timeout: 20, block: 2 },
        ChainEvent::ChannelClosed { channel, closing_participant: C1, nonce: U256::ZERO, block: 10 },
        ChainEvent::TickAdvanced(12),
    ]
}

fn monitor_request(channel: ChannelKey) -> MonitorRequest {
    MonitorRequest {
        token_network: channel.token_network,
        channel_id: channel.channel_id,
        non_closing_participant: C2,
        nonce: U256::from(1u64),
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

/// Commits once per event. Simulates a process that might crash between
/// any two ticks -- every intermediate state is durable.
async fn run_committing_every_tick() -> Store {
    let store = Store::connect_in_memory().await.unwrap();
    store.ensure_blockchain_state(1, REGISTRY, MS, MS, 0).await.unwrap();
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut inserted_request = false;
    for event in event_sequence() {
        let mut snapshot = store.load_snapshot().await.unwrap();
        if matches!(event, ChainEvent::ChannelOpened { .. }) {
            apply(&mut snapshot, &event, &cfg).unwrap();
            snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel));
            inserted_request = true;
        } else {
            apply(&mut snapshot, &event, &cfg).unwrap();
        }
        store.commit(&snapshot, &[]).await.unwrap();
    }
    assert!(inserted_request);
    store
}

/// Folds the whole sequence in memory and commits exactly once.
async fn run_committing_once() -> Store {
    let store = Store::connect_in_memory().await.unwrap();
    store.ensure_blockchain_state(1, REGISTRY, MS, MS, 0).await.unwrap();
    let cfg = ReducerConfig::default();
    let channel = ChannelKey::new(REGISTRY, U256::from(3u64));

    let mut snapshot = store.load_snapshot().await.unwrap();
    for event in event_sequence() {
        apply(&mut snapshot, &event, &cfg).unwrap();
        if matches!(event, ChainEvent::ChannelOpened { .. }) {
            snapshot.monitor_requests.insert((channel.token_network, channel.channel_id, C2), monitor_request(channel));
        }
    }
    store.commit(&snapshot, &[]).await.unwrap();
    store
}

#[tokio::test]
async fn committing_every_tick_matches_committing_once() {
    let incremental = run_committing_every_tick().await;
    let single_shot = run_committing_once().await;

    let incremental_snapshot = incremental.load_snapshot().await.unwrap();
    let single_shot_snapshot = single_shot.load_snapshot().await.unwrap();

    assert_eq!(incremental_snapshot, single_shot_snapshot);
}
