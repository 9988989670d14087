//! Assertion helpers over conversation masks and relay state.

use lag_proto::relay::DistributedRelay;
use lag_types::{ConversationId, ConversationMask, CONVERSATION_ID_COUNT};

/// True when no conversation ID is set in both masks.
pub fn masks_disjoint(left: &ConversationMask, right: &ConversationMask) -> bool {
    conversation_ids().all(|cid| !(left.get(cid) && right.get(cid)))
}

/// True when every conversation ID is set in exactly one of the masks.
pub fn masks_partition(left: &ConversationMask, right: &ConversationMask) -> bool {
    conversation_ids().all(|cid| left.get(cid) != right.get(cid))
}

/// The home/neighbor pairs of the four forwarding masks never overlap;
/// checked every cycle by the portal scenarios.
pub fn relay_masks_exclusive(relay: &DistributedRelay) -> bool {
    masks_disjoint(&relay.home_gateway_mask, &relay.nbor_gateway_mask)
        && masks_disjoint(&relay.home_aggregator_mask, &relay.nbor_aggregator_mask)
}

/// True when the neighbor has reflected every home sequence number.
pub fn relay_settled(relay: &DistributedRelay) -> bool {
    relay.home_agg_state.sequence == relay.reflected_agg_sequence
        && relay.home_gw_state.sequence == relay.reflected_gw_sequence
        && relay.home_gw_preference.sequence == relay.reflected_gp_sequence
}

fn conversation_ids() -> impl Iterator<Item = ConversationId> {
    0..CONVERSATION_ID_COUNT as ConversationId
}
