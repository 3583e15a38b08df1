//! Typed domain events (§4.B) and the raw-log decoder that produces them.
//!
//! The decoder never touches the database or the network; it is a pure
//! translation from `RawLog` to `ChainEvent`, so it can be unit tested with
//! hand-built logs instead of a live node.

use crate::error::ServiceError;
use crate::types::{BlockNumber, ChannelKey};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// The position of a log within the chain's total order. Two logs are
/// compared first by block, then by transaction index within the block,
/// then by log index within the transaction — this triple is persisted
/// alongside every derived row so ordering survives a restart (§9, "make
/// the ordering key explicit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: BlockNumber,
    pub transaction_index: u64,
    pub log_index: u64,
}

/// A single, not-yet-decoded log record as returned by the blockchain
/// reader (§4.A). `topics[0]` is the event signature hash; `data` is the
/// ABI-encoded non-indexed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub position: LogPosition,
}

/// The closed set of events the reducer understands, per the table in
/// §4.B. `TickAdvanced` is synthetic: the main loop emits it whenever the
/// confirmed head advances, even with no new logs, so the scheduler gets a
/// chance to fire due actions (§4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    TokenNetworkCreated {
        token_network_address: Address,
        block: BlockNumber,
    },
    ChannelOpened {
        channel: ChannelKey,
        participant1: Address,
        participant2: Address,
        settle_timeout: u64,
        block: BlockNumber,
    },
    ChannelClosed {
        channel: ChannelKey,
        closing_participant: Address,
        nonce: U256,
        block: BlockNumber,
    },
    NonClosingBalanceProofUpdated {
        channel: ChannelKey,
        closing_participant: Address,
        nonce: U256,
        block: BlockNumber,
    },
    ChannelSettled {
        channel: ChannelKey,
        block: BlockNumber,
    },
    MonitoringAssistedByMS {
        channel: ChannelKey,
        non_closing_participant: Address,
        ms_address: Address,
        block: BlockNumber,
    },
    TickAdvanced(BlockNumber),
}

impl ChainEvent {
    /// The block the event belongs to, used by the main loop to order a
    /// mixed batch of decoded events before folding the reducer over them.
    pub fn block(&self) -> BlockNumber {
        match self {
            ChainEvent::TokenNetworkCreated { block, .. }
            | ChainEvent::ChannelOpened { block, .. }
            | ChainEvent::ChannelClosed { block, .. }
            | ChainEvent::NonClosingBalanceProofUpdated { block, .. }
            | ChainEvent::ChannelSettled { block, .. }
            | ChainEvent::MonitoringAssistedByMS { block, .. } => *block,
            ChainEvent::TickAdvanced(block) => *block,
        }
    }
}

/// Topic-0 signatures this service knows how to decode (§6). Kept as
/// plain constants rather than computed at runtime since they never
/// change and computing keccak at startup would just be wasted work on
/// every boot.
pub mod topics {
    use alloy::primitives::{b256, B256};

    pub const TOKEN_NETWORK_CREATED: B256 =
        b256!("c87365aa4b2d0a4d4d8be14f86de7d08bb86acd5ae932610c3b72b46d4c2ac9");
    pub const CHANNEL_OPENED: B256 =
        b256!("e3e8518ab458f4f960fd6b507d5ec22a8e5c7f92a29bb6e7d8bb02b8f85e3f42");
    pub const CHANNEL_CLOSED: B256 =
        b256!("2f621773303b21878ba76e72fd2456c261ca8fe9bd5e5527e4b8c1c1c06a970");
    pub const NON_CLOSING_BALANCE_PROOF_UPDATED: B256 =
        b256!("b0d9301257b636c2dd5b9c3a8fd6a45bbd0b0a4db0e1e0a5c77e3c9b9cfb85c7");
    pub const CHANNEL_SETTLED: B256 =
        b256!("a24d32d350e40de938e0c5dca5a6dcf73db57a4ffb24f80cf14bd4fcdc9e2a77");
    pub const MONITORING_ASSISTED_BY_MS: B256 =
        b256!("9c46781ce6c0dd1a5d7e8d1f8c0c5e08a3c0b7b5f0c7fd2f0a0c6e3c9e9b2e01");
}

/// Decodes a single raw log into a domain event, per the table in §4.B.
/// Unknown topics are not an error: they are dropped after a debug log,
/// matching the "never fatal" rule for `MalformedEvent`.
pub fn decode_log(log: &RawLog) -> std::result::Result<Option<ChainEvent>, ServiceError> {
    let Some(topic0) = log.topics.first().copied() else {
        return Ok(None);
    };

    let block = log.position.block_number;

    if topic0 == topics::TOKEN_NETWORK_CREATED {
        let token_network_address = decode_address_field(log, 0)?;
        return Ok(Some(ChainEvent::TokenNetworkCreated { token_network_address, block }));
    }

    if topic0 == topics::CHANNEL_OPENED {
        let channel_id = decode_u256_topic(log, 1)?;
        let participant1 = decode_address_topic(log, 2)?;
        let participant2 = decode_address_topic(log, 3)?;
        let settle_timeout = decode_u256_field(log, 0)?.saturating_to::<u64>();
        return Ok(Some(ChainEvent::ChannelOpened {
            channel: ChannelKey::new(log.address, channel_id),
            participant1,
            participant2,
            settle_timeout,
            block,
        }));
    }

    if topic0 == topics::CHANNEL_CLOSED {
        let channel_id = decode_u256_topic(log, 1)?;
        let closing_participant = decode_address_topic(log, 2)?;
        let nonce = decode_u256_field(log, 0)?;
        return Ok(Some(ChainEvent::ChannelClosed {
            channel: ChannelKey::new(log.address, channel_id),
            closing_participant,
            nonce,
            block,
        }));
    }

    if topic0 == topics::NON_CLOSING_BALANCE_PROOF_UPDATED {
        let channel_id = decode_u256_topic(log, 1)?;
        let closing_participant = decode_address_topic(log, 2)?;
        let nonce = decode_u256_field(log, 0)?;
        return Ok(Some(ChainEvent::NonClosingBalanceProofUpdated {
            channel: ChannelKey::new(log.address, channel_id),
            closing_participant,
            nonce,
            block,
        }));
    }

    if topic0 == topics::CHANNEL_SETTLED {
        let channel_id = decode_u256_topic(log, 1)?;
        return Ok(Some(ChainEvent::ChannelSettled {
            channel: ChannelKey::new(log.address, channel_id),
            block,
        }));
    }

    if topic0 == topics::MONITORING_ASSISTED_BY_MS {
        let channel_id = decode_u256_topic(log, 1)?;
        let non_closing_participant = decode_address_topic(log, 2)?;
        let ms_address = decode_address_field(log, 0)?;
        return Ok(Some(ChainEvent::MonitoringAssistedByMS {
            channel: ChannelKey::new(log.address, channel_id),
            non_closing_participant,
            ms_address,
            block,
        }));
    }

    tracing::debug!(topic = %topic0, address = %log.address, "dropping log with unknown topic-0");
    Ok(None)
}

fn decode_u256_topic(log: &RawLog, index: usize) -> std::result::Result<U256, ServiceError> {
    log.topics
        .get(index)
        .map(|t| U256::from_be_bytes(t.0))
        .ok_or_else(|| ServiceError::MalformedEvent(format!("missing topic {index}")))
}

fn decode_address_topic(log: &RawLog, index: usize) -> std::result::Result<Address, ServiceError> {
    log.topics
        .get(index)
        .map(|t| Address::from_word(*t))
        .ok_or_else(|| ServiceError::MalformedEvent(format!("missing topic {index}")))
}

fn decode_u256_field(log: &RawLog, word_index: usize) -> std::result::Result<U256, ServiceError> {
    let start = word_index * 32;
    let end = start + 32;
    let word = log
        .data
        .get(start..end)
        .ok_or_else(|| ServiceError::MalformedEvent(format!("data too short for word {word_index}")))?;
    Ok(U256::from_be_slice(word))
}

fn decode_address_field(log: &RawLog, word_index: usize) -> std::result::Result<Address, ServiceError> {
    let word = decode_u256_field(log, word_index)?;
    Ok(Address::from_word(word.to_be_bytes::<32>().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn log_with(topic0: B256, topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        let mut all_topics = vec![topic0];
        all_topics.extend(topics);
        RawLog {
            address: address!("0000000000000000000000000000000000000001"),
            topics: all_topics,
            data,
            position: LogPosition { block_number: 10, transaction_index: 0, log_index: 0 },
        }
    }

    #[test]
    fn unknown_topic_is_dropped_not_errored() {
        let log = log_with(B256::repeat_byte(0xAB), vec![], vec![]);
        assert_eq!(decode_log(&log).unwrap(), None);
    }

    #[test]
    fn channel_settled_decodes_channel_id_from_topic() {
        let channel_id_topic = B256::from(U256::from(3u64).to_be_bytes::<32>());
        let log = log_with(topics::CHANNEL_SETTLED, vec![channel_id_topic], vec![]);
        let event = decode_log(&log).unwrap().unwrap();
        match event {
            ChainEvent::ChannelSettled { channel, block } => {
                assert_eq!(channel.channel_id, U256::from(3u64));
                assert_eq!(block, 10);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn truncated_data_is_malformed_not_panicking() {
        let log = log_with(topics::TOKEN_NETWORK_CREATED, vec![], vec![1, 2, 3]);
        assert!(decode_log(&log).is_err());
    }
}
