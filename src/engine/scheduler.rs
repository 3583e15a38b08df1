use super::ChainIntent;
use crate::db::Snapshot;
use crate::types::{ActionKind, BlockNumber, ScheduledAction};

/// Pops every action whose `trigger_block` has arrived, re-checks its
/// precondition against the *current* snapshot, and returns the ones that
/// still make sense to fire paired with the intent the chain writer should
/// submit (§4.E).
///
/// Popped actions are removed from `snapshot.scheduled_actions` regardless
/// of whether they pass the precondition check: a stale action (e.g. the
/// channel settled before the monitor delay elapsed) is simply dropped, not
/// retried, since retrying it would never become valid. `service.rs` is
/// responsible for persisting the fired ones as in-flight via
/// [`crate::db::Store::commit`] before invoking the chain writer.
pub fn due_actions(snapshot: &mut Snapshot, current_block: BlockNumber) -> Vec<(ScheduledAction, ChainIntent)> {
    let due_ids: Vec<String> = snapshot
        .scheduled_actions
        .values()
        .filter(|a| a.trigger_block <= current_block)
        .map(|a| a.id.clone())
        .collect();

    let mut fired = Vec::new();
    for id in due_ids {
        let Some(action) = snapshot.scheduled_actions.remove(&id) else { continue };
        if let Some(intent) = intent_for(snapshot, &action) {
            fired.push((action, intent));
        }
    }
    fired
}

fn intent_for(snapshot: &Snapshot, action: &ScheduledAction) -> Option<ChainIntent> {
    let channel = snapshot.channels.get(&action.channel_key)?;

    match action.kind {
        ActionKind::MonitoringTriggered => {
            if channel.state != crate::types::ChannelState::Closed {
                return None;
            }
            let non_closing_participant = channel.other_participant(channel.closing_participant?)?;
            let request = snapshot.monitor_request_for(action.channel_key, non_closing_participant)?;
            let still_usable = match channel.onchain_nonce {
                Some(onchain) => request.nonce > onchain,
                None => true,
            };
            if !still_usable {
                return None;
            }
            Some(ChainIntent::SubmitMonitor { channel: action.channel_key, request: request.clone() })
        }

        ActionKind::ClaimRewardTriggered => {
            if channel.state != crate::types::ChannelState::Settled || !channel.ms_submitted {
                return None;
            }
            let closing_participant = channel.closing_participant?;
            let non_closing_participant = channel.other_participant(closing_participant)?;
            Some(ChainIntent::ClaimReward {
                channel: action.channel_key,
                closing_participant,
                non_closing_participant,
            })
        }
    }
}
