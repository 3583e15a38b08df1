//! Request intake (§4.F): validates inbound `MonitorRequest`s against the
//! current snapshot and upserts the survivors. Runs inside the same
//! per-tick transaction boundary as everything else in `service.rs` — it
//! never causes on-chain activity directly.

use crate::db::Snapshot;
use crate::error::{InvalidRequestReason, ServiceError};
use crate::signatures::{balance_proof_hash, SignatureVerifier};
use crate::types::{ChannelState, MonitorRequest};

/// Validates `request` against `snapshot` and, on success, upserts it.
/// Returns the specific [`InvalidRequestReason`] on rejection so callers
/// can log/metric on it without string-matching.
pub fn validate_and_upsert(
    snapshot: &mut Snapshot,
    request: MonitorRequest,
    verifier: &dyn SignatureVerifier,
    our_msc_address: alloy::primitives::Address,
    our_chain_id: u64,
) -> Result<(), ServiceError> {
    validate_structural(&request)?;

    if request.monitoring_service_contract_address != our_msc_address {
        return Err(InvalidRequestReason::WrongMonitoringServiceContract.into());
    }
    if request.chain_id != our_chain_id {
        return Err(InvalidRequestReason::WrongChainId { got: request.chain_id, expected: our_chain_id }.into());
    }

    let channel_key = request.channel_key();
    let channel = snapshot
        .channels
        .get(&channel_key)
        .ok_or(InvalidRequestReason::UnknownChannel(channel_key))?;

    match channel.state {
        ChannelState::Settled => return Err(InvalidRequestReason::ChannelSettled.into()),
        ChannelState::Closed => {
            if let Some(onchain) = channel.onchain_nonce {
                if request.nonce <= onchain {
                    return Err(InvalidRequestReason::NonceNotIncreasing {
                        got: request.nonce.to_string(),
                        highest: onchain.to_string(),
                    }
                    .into());
                }
            }
        }
        ChannelState::Opened => {}
    }

    let hash = balance_proof_hash(
        request.token_network,
        request.chain_id,
        request.channel_id,
        request.balance_hash,
        request.nonce,
        request.additional_hash,
    );

    let closing_signer = verifier
        .recover(hash, &request.closing_signature)
        .map_err(|_| InvalidRequestReason::ClosingSignatureInvalid)?;
    if channel.other_participant(closing_signer).is_none() {
        return Err(InvalidRequestReason::ClosingSignatureInvalid.into());
    }
    let expected_non_closer = channel
        .other_participant(closing_signer)
        .expect("checked above");
    if expected_non_closer != request.non_closing_participant {
        return Err(InvalidRequestReason::NonClosingSignatureInvalid.into());
    }

    let non_closing_signer = verifier
        .recover(hash, &request.non_closing_signature)
        .map_err(|_| InvalidRequestReason::NonClosingSignatureInvalid)?;
    if non_closing_signer != request.non_closing_participant {
        return Err(InvalidRequestReason::NonClosingSignatureInvalid.into());
    }

    if let Some(existing) = snapshot.monitor_requests.get(&request.key()) {
        if request.nonce <= existing.nonce {
            // Monotone nonce law (§8): a stale request is silently a no-op,
            // not an error — the sender doesn't get feedback either way.
            return Ok(());
        }
    }

    snapshot.monitor_requests.insert(request.key(), request);
    Ok(())
}

fn validate_structural(request: &MonitorRequest) -> Result<(), ServiceError> {
    if request.closing_signature.len() != 65 {
        return Err(InvalidRequestReason::Structural("closing_signature must be 65 bytes".into()).into());
    }
    if request.non_closing_signature.len() != 65 {
        return Err(InvalidRequestReason::Structural("non_closing_signature must be 65 bytes".into()).into());
    }
    if request.reward_proof_signature.len() != 65 {
        return Err(InvalidRequestReason::Structural("reward_proof_signature must be 65 bytes".into()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::tests::StubVerifier;
    use crate::types::{BlockchainState, Channel, ChannelKey};
    use alloy::primitives::{address, Address, B256, U256};
    use std::collections::HashMap;

    fn snapshot_with_channel(c1: Address, c2: Address) -> (Snapshot, ChannelKey) {
        let token_network = address!("0000000000000000000000000000000000000a");
        let key = ChannelKey::new(token_network, U256::from(3u64));
        let mut channels = HashMap::new();
        channels.insert(key, Channel::new(key, c1, c2, 20));
        let snapshot = Snapshot {
            blockchain_state: BlockchainState {
                latest_confirmed_block: 0,
                chain_id: 1,
                token_network_registry_address: Address::ZERO,
                monitor_contract_address: Address::ZERO,
                monitoring_service_address: Address::ZERO,
                token_networks: vec![token_network],
            },
            channels,
            monitor_requests: HashMap::new(),
            scheduled_actions: HashMap::new(),
        };
        (snapshot, key)
    }

    fn request_for(key: ChannelKey, non_closing: Address, nonce: u64) -> MonitorRequest {
        MonitorRequest {
            token_network: key.token_network,
            channel_id: key.channel_id,
            non_closing_participant: non_closing,
            nonce: U256::from(nonce),
            balance_hash: B256::repeat_byte(0xAA),
            additional_hash: B256::repeat_byte(0xBB),
            closing_signature: vec![1; 65],
            non_closing_signature: vec![2; 65],
            reward_amount: U256::from(5u64),
            monitoring_service_contract_address: Address::ZERO,
            chain_id: 1,
            reward_proof_signature: vec![3; 65],
        }
    }

    #[test]
    fn valid_request_is_upserted() {
        let c1 = address!("0000000000000000000000000000000000000001");
        let c2 = address!("0000000000000000000000000000000000000002");
        let (mut snapshot, key) = snapshot_with_channel(c1, c2);
        let request = request_for(key, c2, 1);

        let hash = crate::signatures::balance_proof_hash(
            request.token_network,
            request.chain_id,
            request.channel_id,
            request.balance_hash,
            request.nonce,
            request.additional_hash,
        );
        let verifier = StubVerifier::default();
        verifier.expect(hash, &request.closing_signature, c1);
        verifier.expect(hash, &request.non_closing_signature, c2);

        validate_and_upsert(&mut snapshot, request.clone(), &verifier, Address::ZERO, 1).unwrap();
        assert_eq!(snapshot.monitor_requests.get(&request.key()), Some(&request));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let c1 = address!("0000000000000000000000000000000000000001");
        let c2 = address!("0000000000000000000000000000000000000002");
        let (mut snapshot, _) = snapshot_with_channel(c1, c2);
        let other_key = ChannelKey::new(address!("0000000000000000000000000000000000000b"), U256::from(1u64));
        let request = request_for(other_key, c2, 1);
        let verifier = StubVerifier::default();

        let err = validate_and_upsert(&mut snapshot, request, &verifier, Address::ZERO, 1).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(InvalidRequestReason::UnknownChannel(_))));
    }

    #[test]
    fn stale_nonce_is_a_no_op_not_an_error() {
        let c1 = address!("0000000000000000000000000000000000000001");
        let c2 = address!("0000000000000000000000000000000000000002");
        let (mut snapshot, key) = snapshot_with_channel(c1, c2);

        let fresh = request_for(key, c2, 5);
        let hash = crate::signatures::balance_proof_hash(
            fresh.token_network,
            fresh.chain_id,
            fresh.channel_id,
            fresh.balance_hash,
            fresh.nonce,
            fresh.additional_hash,
        );
        let verifier = StubVerifier::default();
        verifier.expect(hash, &fresh.closing_signature, c1);
        verifier.expect(hash, &fresh.non_closing_signature, c2);
        validate_and_upsert(&mut snapshot, fresh.clone(), &verifier, Address::ZERO, 1).unwrap();

        let stale = request_for(key, c2, 3);
        validate_and_upsert(&mut snapshot, stale, &verifier, Address::ZERO, 1).unwrap();
        assert_eq!(snapshot.monitor_requests.get(&fresh.key()).unwrap().nonce, U256::from(5u64));
    }
}
