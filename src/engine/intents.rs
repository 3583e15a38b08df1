use crate::types::{ChannelKey, MonitorRequest};
use alloy::primitives::Address;

/// A side-effect the scheduler wants the chain writer (§4.G) to perform.
/// Produced only by [`super::due_actions`], never by the reducer directly
/// — scheduling and firing are deliberately two separate steps so that
/// firing can re-check preconditions against the latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIntent {
    SubmitMonitor {
        channel: ChannelKey,
        request: MonitorRequest,
    },
    ClaimReward {
        channel: ChannelKey,
        closing_participant: Address,
        non_closing_participant: Address,
    },
}
