use crate::error::ServiceError;
use crate::events::ChainEvent;
use crate::types::{ActionKind, Channel, ChannelState, ScheduledAction};
use crate::db::Snapshot;

/// Knobs the reducer needs that aren't part of persisted state — both are
/// operator policy, not protocol (§6 configuration table).
#[derive(Debug, Clone, Copy)]
pub struct ReducerConfig {
    /// Fraction of `settle_timeout` to wait after `ChannelClosed` before
    /// firing `ActionMonitoringTriggered`. Default 0.8 per §4.D.
    pub monitor_fraction: f64,
    /// Blocks to wait after `ChannelSettled` before firing
    /// `ActionClaimRewardTriggered`.
    pub claim_delay_blocks: u64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self { monitor_fraction: 0.8, claim_delay_blocks: 0 }
    }
}

/// Folds a single event into `snapshot`, per the handler table in §4.D.
/// Deterministic: the same `(snapshot, event)` pair always produces the
/// same mutation and the same set of scheduled-action ids (Invariant,
/// §8) — nothing here reads the clock, RNG, or network.
pub fn apply(snapshot: &mut Snapshot, event: &ChainEvent, cfg: &ReducerConfig) -> Result<(), ServiceError> {
    match event {
        ChainEvent::TokenNetworkCreated { token_network_address, .. } => {
            if !snapshot.blockchain_state.knows_token_network(*token_network_address) {
                snapshot.blockchain_state.token_networks.push(*token_network_address);
            }
            Ok(())
        }

        ChainEvent::ChannelOpened { channel, participant1, participant2, settle_timeout, .. } => {
            if snapshot.channels.contains_key(channel) {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "ChannelOpened for already-open channel {channel:?}"
                )));
            }
            snapshot
                .channels
                .insert(*channel, Channel::new(*channel, *participant1, *participant2, *settle_timeout));
            // A MonitorRequest may have arrived before ChannelOpened was
            // confirmed; it was stored but inert. No action is needed here
            // beyond the insert above — the request is simply usable from
            // now on, per §4.D.
            Ok(())
        }

        ChainEvent::ChannelClosed { channel, closing_participant, nonce, block } => {
            let Some(existing) = snapshot.channels.get(channel) else {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "ChannelClosed for unknown channel {channel:?}"
                )));
            };
            if existing.state != ChannelState::Opened {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "ChannelClosed for channel {channel:?} already in state {:?}",
                    existing.state
                )));
            }
            let non_closing_participant = existing.other_participant(*closing_participant);

            let chan = snapshot.channels.get_mut(channel).expect("checked above");
            chan.state = ChannelState::Closed;
            chan.closing_block = Some(*block);
            chan.closing_participant = Some(*closing_participant);
            let settle_timeout = chan.settle_timeout;

            let Some(non_closing_participant) = non_closing_participant else {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "ChannelClosed closing_participant {closing_participant:?} is not a participant of {channel:?}"
                )));
            };

            if let Some(request) = snapshot.monitor_request_for(*channel, non_closing_participant) {
                let request_is_usable = match snapshot.channels[channel].onchain_nonce {
                    Some(onchain) => request.nonce > onchain,
                    None => true,
                };
                if request_is_usable {
                    let delay = (settle_timeout as f64 * cfg.monitor_fraction).floor() as u64;
                    let trigger_block = block + delay;
                    let action = ScheduledAction::new(ActionKind::MonitoringTriggered, *channel, trigger_block);
                    snapshot.scheduled_actions.insert(action.id.clone(), action);
                }
            }
            let _ = nonce; // the closing nonce itself carries no action of its own; see NonClosingBalanceProofUpdated
            Ok(())
        }

        ChainEvent::NonClosingBalanceProofUpdated { channel, closing_participant, nonce, .. } => {
            let Some(chan) = snapshot.channels.get_mut(channel) else {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "NonClosingBalanceProofUpdated for unknown channel {channel:?}"
                )));
            };
            chan.onchain_nonce = Some(chan.onchain_nonce.map_or(*nonce, |prev| prev.max(*nonce)));

            let closing_participant = *closing_participant;
            let other = snapshot.channels[channel].other_participant(closing_participant);
            if let Some(non_closing_participant) = other {
                if let Some(request) = snapshot.monitor_request_for(*channel, non_closing_participant) {
                    if *nonce >= request.nonce {
                        cancel_action(snapshot, ActionKind::MonitoringTriggered, *channel);
                    }
                }
            }
            Ok(())
        }

        ChainEvent::ChannelSettled { channel, block } => {
            let Some(chan) = snapshot.channels.get_mut(channel) else {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "ChannelSettled for unknown channel {channel:?}"
                )));
            };
            chan.state = ChannelState::Settled;
            let ms_submitted = chan.ms_submitted;
            cancel_action(snapshot, ActionKind::MonitoringTriggered, *channel);

            if ms_submitted {
                let trigger_block = block + cfg.claim_delay_blocks;
                let action = ScheduledAction::new(ActionKind::ClaimRewardTriggered, *channel, trigger_block);
                snapshot.scheduled_actions.insert(action.id.clone(), action);
            }
            Ok(())
        }

        ChainEvent::MonitoringAssistedByMS { channel, ms_address, .. } => {
            let is_us = *ms_address == snapshot.blockchain_state.monitoring_service_address;
            let Some(chan) = snapshot.channels.get_mut(channel) else {
                return Err(ServiceError::StateInvariantViolation(format!(
                    "MonitoringAssistedByMS for unknown channel {channel:?}"
                )));
            };
            if is_us {
                chan.ms_submitted = true;
            }
            Ok(())
        }

        ChainEvent::TickAdvanced(block) => {
            snapshot.blockchain_state.latest_confirmed_block = (*block).max(snapshot.blockchain_state.latest_confirmed_block);
            Ok(())
        }
    }
}

fn cancel_action(snapshot: &mut Snapshot, kind: ActionKind, channel: crate::types::ChannelKey) {
    if let Some(action) = snapshot.actions_for_channel(channel, kind).cloned() {
        snapshot.scheduled_actions.remove(&action.id);
    }
}
