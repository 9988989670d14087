//! The gateway/aggregator machine.
//!
//! Runs once per cycle after the Receive machine. The first half tracks
//! portal membership: `dr_solo` follows the two `irc_sync` bits, and a
//! membership change re-elects the operational aggregator identity the
//! selection logic pushes out to the LAG. The second half reacts to the
//! update flags the Receive machine raised: it versions the home state
//! vectors, reselects a portal side for every conversation ID, and
//! finally rewrites the four forwarding masks. A conversation's mask bit
//! can only assert once every home sequence number has been reflected by
//! the neighbor, so both systems move each conversation through a
//! none-forwarding step instead of ever forwarding it twice.

use tracing::{debug, trace};

use lag_types::{ConversationId, ConversationMask, CONVERSATION_ID_COUNT};

use crate::aggregator::Aggregator;
use crate::engine::cscd;
use crate::observer::{LagContext, LagEvent};

use super::types::{DistributedRelay, PortalSide};

pub(crate) fn run(relay: &mut DistributedRelay, agg: &mut Aggregator, ctx: &LagContext) {
    let both_synced = relay.home_irp_state.irc_sync && relay.nbor_irp_state.irc_sync;
    if relay.dr_solo == both_synced {
        relay.dr_solo = !both_synced;
        relay.home_irp_state.drni = !relay.dr_solo;
        debug!(
            "{}: {}",
            relay.index,
            if relay.dr_solo { "solo" } else { "paired" }
        );
        ctx.notify(LagEvent::PortalStateChanged {
            relay: relay.index,
            solo: relay.dr_solo,
        });
        update_system_and_key(relay, agg, ctx);
    }

    // A paired system that loses the election must not attach links the
    // neighbor's partner would refuse.
    if !relay.dr_solo
        && agg.actor_admin_system > relay.nbor_system
        && !relay.nbor_agg_state.active_links.is_empty()
    {
        if agg.drni_partner_restriction.is_none()
            && !relay.nbor_agg_state.partner_system.is_zero()
        {
            debug!(
                "{}: restricting partner to {} key {:#06x}",
                relay.index,
                relay.nbor_agg_state.partner_system,
                relay.nbor_agg_state.partner_key
            );
            agg.drni_partner_restriction = Some((
                relay.nbor_agg_state.partner_system,
                relay.nbor_agg_state.partner_key,
            ));
        }
    } else if agg.drni_partner_restriction.take().is_some() {
        debug!("{}: partner restriction removed", relay.index);
    }

    let irc_usable = relay.home_irp_state.irc_data
        && relay.nbor_irp_state.irc_data
        && relay.home_irp_state.irc_sync
        && relay.nbor_irp_state.irc_sync
        && relay.home_irp_state.drni
        && relay.nbor_irp_state.drni;
    if irc_usable != relay.enable_irc_data {
        debug!("{}: irc data {}", relay.index, irc_usable);
        relay.enable_irc_data = irc_usable;
    }

    // One pass over the flags as they stood on entry; anything raised
    // below waits for the next cycle.
    relay.new_home_info |= agg.change_relay_agg_state;
    agg.change_relay_agg_state = false;
    let home_vector_update = relay.new_home_info || relay.new_nbor_state;
    let nbor_vector_update = relay.new_nbor_state || relay.new_reflected_state;
    relay.new_nbor_state = false;
    relay.new_reflected_state = false;
    if relay.new_home_info {
        relay.new_home_info = false;
        update_home_state(relay, agg);
    }
    if home_vector_update {
        update_aggregator_selection(relay, agg);
        update_gateway_selection(relay, agg);
    }
    if home_vector_update || nbor_vector_update {
        update_masks(relay);
    }

    relay.tx_hold = false;
}

/// Elects the operational aggregator identity for the portal and hands it
/// to the selection logic.
fn update_system_and_key(
    relay: &mut DistributedRelay,
    agg: &mut Aggregator,
    ctx: &LagContext,
) {
    let chosen = if relay.dr_solo {
        // No neighbor, so gateway selection counts as fully synchronized.
        relay.gateway_sync_mask.set_all();
        (agg.actor_admin_system, agg.admin_key)
    } else {
        // Freshly paired; every conversation resynchronizes from scratch.
        relay.gateway_sync_mask.clear_all();
        if !relay.portal_system.addr.is_zero() {
            (relay.portal_system, relay.portal_key)
        } else if relay.nbor_system < agg.actor_admin_system {
            (relay.nbor_system, relay.nbor_key)
        } else {
            (agg.actor_admin_system, agg.admin_key)
        }
    };
    if chosen != (agg.actor_oper_system, agg.oper_key) {
        debug!(
            "{}: electing {} key {:#06x}",
            relay.index, chosen.0, chosen.1
        );
        ctx.notify(LagEvent::PortalElected {
            relay: relay.index,
            system: chosen.0,
            key: chosen.1,
        });
    }
    agg.drni_system = chosen.0;
    agg.drni_key = chosen.1;

    if relay.dr_solo != agg.drni_solo {
        agg.drni_solo = relay.dr_solo;
        agg.change_drni_solo = true;
        relay.new_nbor_state = true;
    }
}

/// Picks the next sequence number for a home vector that changed content.
///
/// The number must be new to the neighbor (past whatever it reflected)
/// and must not collide with one already transmitted under old content.
fn bump_sequence(sequence: &mut u32, reflected: u32, last_tx: u32) {
    if reflected > *sequence || *sequence == 0 {
        *sequence = reflected + 1;
    }
    if *sequence == last_tx {
        *sequence += 1;
    }
}

/// Re-versions any home state vector whose content no longer matches the
/// aggregator and administrative inputs.
fn update_home_state(relay: &mut DistributedRelay, agg: &Aggregator) {
    let home = &relay.home_agg_state;
    if relay.reflected_agg_sequence > home.sequence
        || home.algorithm != agg.actor_algorithm
        || home.service_digest != agg.service_digest
        || home.link_digest != agg.link_digest
        || home.partner_system != agg.partner_system
        || home.partner_key != agg.partner_oper_key
        || home.cscd_state.cscd_gateway_control != relay.cscd_gateway_control
        || home.cscd_state.oper_dwc != agg.oper_dwc
        || home.cscd_state.partner_algorithm_differs != agg.partner_algorithm_differs
        || home.cscd_state.partner_service_digest_differs != agg.partner_service_digest_differs
        || home.cscd_state.partner_link_digest_differs != agg.partner_link_digest_differs
        || home.active_links != agg.active_lag_links
    {
        bump_sequence(
            &mut relay.home_agg_state.sequence,
            relay.reflected_agg_sequence,
            relay.last_tx_agg_sequence,
        );
        trace!(
            "{}: aggregator state sequence {} (reflected {})",
            relay.index,
            relay.home_agg_state.sequence,
            relay.reflected_agg_sequence
        );

        if relay.home_agg_state.cscd_state.cscd_gateway_control != relay.cscd_gateway_control {
            relay.gateway_sync_mask.clear_all();
        } else if relay.home_agg_state.cscd_state.cscd_gateway_control {
            // Gateway selection follows these parameters, so any change
            // desynchronizes every conversation.
            if relay.home_agg_state.algorithm != agg.actor_algorithm
                || relay.home_agg_state.service_digest != agg.service_digest
                || relay.home_agg_state.link_digest != agg.link_digest
                || relay.home_agg_state.active_links != agg.active_lag_links
            {
                relay.gateway_sync_mask.clear_all();
            }
        }

        relay.home_agg_state.algorithm = agg.actor_algorithm;
        relay.home_agg_state.service_digest = agg.service_digest;
        relay.home_agg_state.link_digest = agg.link_digest;
        relay.home_agg_state.partner_system = agg.partner_system;
        relay.home_agg_state.partner_key = agg.partner_oper_key;
        relay.home_agg_state.cscd_state.cscd_gateway_control = relay.cscd_gateway_control;
        relay.home_agg_state.cscd_state.oper_dwc = agg.oper_dwc;
        relay.home_agg_state.cscd_state.partner_algorithm_differs =
            agg.partner_algorithm_differs;
        relay.home_agg_state.cscd_state.partner_service_digest_differs =
            agg.partner_service_digest_differs;
        relay.home_agg_state.cscd_state.partner_link_digest_differs =
            agg.partner_link_digest_differs;
        relay.home_agg_state.active_links = agg.active_lag_links.clone();
        relay.tx_hold = true;
        relay.ntt = true;
    }

    let new_available = if relay.gateway_enabled {
        relay.gateway_enable_mask.clone()
    } else {
        ConversationMask::new()
    };
    if relay.reflected_gw_sequence > relay.home_gw_state.sequence
        || relay.home_gw_state.available_mask != new_available
        || relay.home_gw_state.algorithm != relay.gateway_algorithm
        || relay.home_gw_state.service_digest != relay.gateway_service_digest
    {
        bump_sequence(
            &mut relay.home_gw_state.sequence,
            relay.reflected_gw_sequence,
            relay.last_tx_gw_sequence,
        );
        trace!(
            "{}: gateway state sequence {} (reflected {})",
            relay.index,
            relay.home_gw_state.sequence,
            relay.reflected_gw_sequence
        );

        if relay.home_gw_state.algorithm != relay.gateway_algorithm
            || (relay.gateway_algorithm.uses_service_map()
                && relay.home_gw_state.service_digest != relay.gateway_service_digest)
        {
            relay.gateway_sync_mask.clear_all();
        } else if relay.home_gw_state.available_mask != new_available {
            relay
                .gateway_sync_mask
                .clear_where_changed(&relay.home_gw_state.available_mask, &new_available);
        }

        relay.home_gw_state.available_mask = new_available;
        relay.home_gw_state.algorithm = relay.gateway_algorithm;
        relay.home_gw_state.service_digest = relay.gateway_service_digest;
        relay.tx_hold = true;
        relay.ntt = true;
    }

    if relay.reflected_gp_sequence > relay.home_gw_preference.sequence
        || relay.home_gw_preference.preference_mask != relay.gateway_preference_mask
        || relay.home_gw_preference.sequence == 0
    {
        bump_sequence(
            &mut relay.home_gw_preference.sequence,
            relay.reflected_gp_sequence,
            relay.last_tx_gp_sequence,
        );
        trace!(
            "{}: gateway preference sequence {} (reflected {})",
            relay.index,
            relay.home_gw_preference.sequence,
            relay.reflected_gp_sequence
        );

        if relay.home_gw_preference.preference_mask != relay.gateway_preference_mask {
            relay.gateway_sync_mask.clear_where_changed(
                &relay.home_gw_preference.preference_mask,
                &relay.gateway_preference_mask,
            );
        }

        relay.home_gw_preference.preference_mask = relay.gateway_preference_mask.clone();
        relay.tx_hold = true;
        relay.ntt = true;
    }
}

/// Assigns each conversation ID to the portal side whose links carry it.
fn update_aggregator_selection(relay: &mut DistributedRelay, agg: &Aggregator) {
    if relay.dr_solo || relay.home_agg_state.algorithm.is_unspecified() {
        relay.aggregator_selection.fill(PortalSide::Home);
        return;
    }
    if relay.home_agg_state.partner_system == relay.nbor_agg_state.partner_system
        && relay.home_agg_state.partner_key == relay.nbor_agg_state.partner_key
    {
        // Both systems spread conversations over the merged link list. A
        // link number active on both sides selects home here; the
        // neighbor makes the mirrored choice from its own view, so each
        // transmits on its own link and the spread still matches.
        let mut merged = relay.home_agg_state.active_links.clone();
        merged.extend_from_slice(&relay.nbor_agg_state.active_links);
        merged.sort_unstable();
        let vector = cscd::conversation_link_vector(agg, &merged);
        for cid in 0..CONVERSATION_ID_COUNT {
            let link = vector[cid];
            let mut side = PortalSide::None;
            if relay.nbor_agg_state.active_links.contains(&link) {
                side = PortalSide::Nbor;
            }
            if relay.home_agg_state.active_links.contains(&link) {
                side = PortalSide::Home;
            }
            relay.aggregator_selection[cid] = side;
        }
    } else if relay.nbor_system < agg.actor_admin_system
        && !relay.nbor_agg_state.active_links.is_empty()
    {
        relay.aggregator_selection.fill(PortalSide::Nbor);
    } else {
        relay.aggregator_selection.fill(PortalSide::Home);
    }
}

/// Assigns each conversation ID to the portal side that gates it in and
/// out of the portal.
fn update_gateway_selection(relay: &mut DistributedRelay, agg: &Aggregator) {
    let default_side = if !relay.dr_solo && relay.nbor_system < agg.actor_admin_system {
        PortalSide::Nbor
    } else {
        PortalSide::Home
    };
    let uses_map = relay.home_gw_state.algorithm.uses_service_map();
    let algorithms_differ = relay.home_gw_state.algorithm.is_unspecified()
        || relay.nbor_gw_state.algorithm != relay.home_gw_state.algorithm
        || (uses_map
            && relay.nbor_gw_state.service_digest != relay.home_gw_state.service_digest);
    let follows_aggregator = relay.home_agg_state.cscd_state.cscd_gateway_control
        && relay.nbor_agg_state.cscd_state.cscd_gateway_control
        && relay.home_agg_state.algorithm == relay.home_gw_state.algorithm
        && relay.home_agg_state.algorithm == relay.nbor_agg_state.algorithm
        && relay.home_agg_state.algorithm == relay.nbor_gw_state.algorithm
        && (!uses_map
            || (relay.home_agg_state.service_digest == relay.home_gw_state.service_digest
                && relay.home_agg_state.service_digest
                    == relay.nbor_agg_state.service_digest
                && relay.home_agg_state.service_digest
                    == relay.nbor_gw_state.service_digest));

    for cid in 0..CONVERSATION_ID_COUNT {
        let id = cid as ConversationId;
        let home_available = relay.home_gw_state.available_mask.get(id);
        let nbor_available = relay.nbor_gw_state.available_mask.get(id);
        relay.gateway_selection[cid] = if relay.dr_solo {
            if home_available {
                PortalSide::Home
            } else {
                PortalSide::None
            }
        } else if algorithms_differ {
            // No common view of the conversation space; the lower system
            // takes everything rather than risk forwarding twice.
            if relay.nbor_system < agg.actor_admin_system {
                PortalSide::Nbor
            } else if home_available {
                PortalSide::Home
            } else {
                PortalSide::None
            }
        } else if !home_available {
            if nbor_available {
                PortalSide::Nbor
            } else {
                PortalSide::None
            }
        } else if !nbor_available {
            PortalSide::Home
        } else if follows_aggregator {
            relay.aggregator_selection[cid]
        } else if relay.nbor_gw_preference.preference_mask.get(id)
            && !relay.home_gw_preference.preference_mask.get(id)
        {
            PortalSide::Nbor
        } else if relay.home_gw_preference.preference_mask.get(id)
            && !relay.nbor_gw_preference.preference_mask.get(id)
        {
            PortalSide::Home
        } else {
            default_side
        };
    }
}

/// Rewrites the four forwarding masks from the selection vectors.
///
/// A bit may clear at any time, but it only asserts for a conversation
/// whose gateway synchronization bit is set; until then it keeps its
/// previous value.
fn update_masks(relay: &mut DistributedRelay) {
    if relay.dr_solo
        || (relay.home_agg_state.sequence == relay.reflected_agg_sequence
            && relay.home_gw_state.sequence == relay.reflected_gw_sequence
            && relay.home_gw_preference.sequence == relay.reflected_gp_sequence)
    {
        // The neighbor has acknowledged every home vector.
        relay.gateway_sync_mask.set_all();
    }

    for cid in 0..CONVERSATION_ID_COUNT {
        let id = cid as ConversationId;
        let synced = relay.gateway_sync_mask.get(id);
        let agg_side = relay.aggregator_selection[cid];
        let gw_side = relay.gateway_selection[cid];
        gate(
            &mut relay.home_aggregator_mask,
            id,
            agg_side == PortalSide::Home,
            synced,
        );
        gate(
            &mut relay.nbor_aggregator_mask,
            id,
            agg_side == PortalSide::Nbor,
            synced,
        );
        gate(
            &mut relay.home_gateway_mask,
            id,
            gw_side == PortalSide::Home,
            synced,
        );
        gate(
            &mut relay.nbor_gateway_mask,
            id,
            gw_side == PortalSide::Nbor,
            synced,
        );
    }
}

fn gate(mask: &mut ConversationMask, cid: ConversationId, selected: bool, synced: bool) {
    if !selected {
        mask.set(cid, false);
    } else if synced {
        mask.set(cid, true);
    }
    // Selected but unsynchronized keeps the previous value.
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use lag_types::{LagAlgorithm, SystemId};

    use crate::aggregator::AggregatorConfig;
    use crate::observer::LagObserver;
    use crate::port::testlink::TestLink;
    use crate::relay::RelayConfig;
    use crate::{AggIndex, RelayIndex};

    use super::*;

    const HOME: u64 = 0x0001_0000_0000_0010;
    const NBOR: u64 = 0x0001_0000_0000_0001;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LagEvent>>,
    }

    impl LagObserver for Recorder {
        fn notify(&self, event: &LagEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn fixture() -> (DistributedRelay, Aggregator) {
        let (link, _handle) = TestLink::up();
        let relay = DistributedRelay::new(
            RelayIndex(0),
            AggIndex(0),
            RelayConfig::default(),
            Some(Box::new(link)),
        );
        let agg = Aggregator::new(
            AggIndex(0),
            AggregatorConfig::new(SystemId::from_u64(HOME), 1, 0x100),
        );
        (relay, agg)
    }

    /// A relay already paired with a synced neighbor, set up so `run`
    /// takes no membership transition.
    fn paired_fixture() -> (DistributedRelay, Aggregator) {
        let (mut relay, agg) = fixture();
        relay.dr_solo = false;
        relay.home_irp_state.irc_sync = true;
        relay.home_irp_state.drni = true;
        relay.nbor_irp_state.irc_sync = true;
        relay.nbor_system = SystemId::from_u64(NBOR);
        relay.nbor_key = 0x200;
        (relay, agg)
    }

    #[test]
    fn test_first_run_goes_solo_with_full_home_masks() {
        let (mut relay, mut agg) = fixture();
        let recorder = Arc::new(Recorder::default());
        let ctx = LagContext::new(recorder.clone());

        run(&mut relay, &mut agg, &ctx);

        assert!(relay.dr_solo);
        assert!(!relay.home_irp_state.drni);
        assert!(agg.drni_solo);
        assert!(agg.change_drni_solo);
        assert_eq!(agg.drni_system, agg.actor_admin_system);
        assert_eq!(agg.drni_key, agg.admin_key);
        assert!(recorder.events.lock().unwrap().iter().any(
            |e| matches!(e, LagEvent::PortalStateChanged { solo: true, .. })
        ));

        // Solo means every conversation belongs to this system.
        assert!(relay.home_aggregator_mask.is_full());
        assert!(relay.home_gateway_mask.is_full());
        assert!(relay.nbor_aggregator_mask.is_empty());
        assert!(relay.nbor_gateway_mask.is_empty());
    }

    #[test]
    fn test_pairing_adopts_lower_neighbor_identity() {
        let (mut relay, mut agg) = fixture();
        let recorder = Arc::new(Recorder::default());
        let ctx = LagContext::new(recorder.clone());
        run(&mut relay, &mut agg, &ctx);
        assert!(relay.dr_solo);

        relay.home_irp_state.irc_sync = true;
        relay.nbor_irp_state.irc_sync = true;
        relay.nbor_system = SystemId::from_u64(NBOR);
        relay.nbor_key = 0x77;
        run(&mut relay, &mut agg, &ctx);

        assert!(!relay.dr_solo);
        assert!(relay.home_irp_state.drni);
        assert_eq!(agg.drni_system, SystemId::from_u64(NBOR));
        assert_eq!(agg.drni_key, 0x77);
        assert!(recorder.events.lock().unwrap().iter().any(|e| matches!(
            e,
            LagEvent::PortalElected { key: 0x77, .. }
        )));
    }

    #[test]
    fn test_configured_portal_identity_wins_election() {
        let (mut relay, mut agg) = paired_fixture();
        relay.portal_system = SystemId::from_u64(0x0001_0000_0000_00ff);
        relay.portal_key = 0x999;
        relay.dr_solo = true;
        let ctx = LagContext::default();

        // Pairing transition: dr_solo flips to false and elects.
        run(&mut relay, &mut agg, &ctx);
        assert!(!relay.dr_solo);
        assert_eq!(agg.drni_system, SystemId::from_u64(0x0001_0000_0000_00ff));
        assert_eq!(agg.drni_key, 0x999);
    }

    #[test]
    fn test_partner_restriction_follows_lower_neighbor() {
        let (mut relay, mut agg) = paired_fixture();
        relay.nbor_agg_state.active_links = vec![5];
        relay.nbor_agg_state.partner_system = SystemId::from_u64(0x0002_0000_0000_0050);
        relay.nbor_agg_state.partner_key = 0x99;
        let ctx = LagContext::default();

        run(&mut relay, &mut agg, &ctx);
        assert_eq!(
            agg.drni_partner_restriction,
            Some((SystemId::from_u64(0x0002_0000_0000_0050), 0x99))
        );

        relay.nbor_agg_state.active_links.clear();
        run(&mut relay, &mut agg, &ctx);
        assert_eq!(agg.drni_partner_restriction, None);
    }

    #[test]
    fn test_restriction_waits_for_known_neighbor_partner() {
        let (mut relay, mut agg) = paired_fixture();
        relay.nbor_agg_state.active_links = vec![5];
        let ctx = LagContext::default();

        run(&mut relay, &mut agg, &ctx);
        assert_eq!(agg.drni_partner_restriction, None);
    }

    #[test]
    fn test_irc_data_needs_all_six_bits() {
        let (mut relay, mut agg) = paired_fixture();
        relay.home_irp_state.irc_data = true;
        relay.nbor_irp_state.irc_data = true;
        relay.nbor_irp_state.drni = true;
        let ctx = LagContext::default();

        run(&mut relay, &mut agg, &ctx);
        assert!(relay.enable_irc_data);

        relay.nbor_irp_state.irc_data = false;
        run(&mut relay, &mut agg, &ctx);
        assert!(!relay.enable_irc_data);
    }

    #[test]
    fn test_sequence_moves_past_reflection_and_last_tx() {
        let mut sequence = 3;
        bump_sequence(&mut sequence, 5, 0);
        assert_eq!(sequence, 6);

        let mut sequence = 3;
        bump_sequence(&mut sequence, 2, 3);
        assert_eq!(sequence, 4);

        let mut sequence = 0;
        bump_sequence(&mut sequence, 0, 0);
        assert_eq!(sequence, 1);
    }

    #[test]
    fn test_gateway_disable_withdraws_every_conversation() {
        let (mut relay, mut agg) = fixture();
        let ctx = LagContext::default();
        run(&mut relay, &mut agg, &ctx);
        assert!(relay.home_gateway_mask.is_full());

        relay.set_gateway_enabled(false);
        run(&mut relay, &mut agg, &ctx);
        assert!(relay.home_gw_state.available_mask.is_empty());
        assert!(relay.home_gateway_mask.is_empty());
        // The links still belong to this system.
        assert!(relay.home_aggregator_mask.is_full());
    }

    #[test]
    fn test_masks_wait_for_reflection() {
        let (mut relay, mut agg) = paired_fixture();
        agg.actor_algorithm = LagAlgorithm::C_VID;
        agg.active_lag_links = vec![1];
        relay.gateway_algorithm = LagAlgorithm::C_VID;
        relay.nbor_gw_state.algorithm = LagAlgorithm::C_VID;
        relay.nbor_agg_state.algorithm = LagAlgorithm::C_VID;
        relay.nbor_agg_state.active_links = vec![2];
        let ctx = LagContext::default();

        // Home state versions up, but nothing has been reflected yet, so
        // no mask may assert a conversation.
        run(&mut relay, &mut agg, &ctx);
        assert!(relay.home_agg_state.sequence > 0);
        assert!(relay.home_aggregator_mask.is_empty());
        assert!(relay.nbor_aggregator_mask.is_empty());
        assert!(relay.home_gateway_mask.is_empty());
        assert!(relay.nbor_gateway_mask.is_empty());
    }

    #[test]
    fn test_gateway_follows_aggregator_when_aligned() {
        let (mut relay, mut agg) = paired_fixture();
        agg.actor_algorithm = LagAlgorithm::C_VID;
        agg.active_lag_links = vec![1];
        relay.cscd_gateway_control = true;
        relay.gateway_algorithm = LagAlgorithm::C_VID;
        relay.nbor_agg_state.algorithm = LagAlgorithm::C_VID;
        relay.nbor_agg_state.active_links = vec![2];
        relay.nbor_agg_state.cscd_state.cscd_gateway_control = true;
        relay.nbor_gw_state.algorithm = LagAlgorithm::C_VID;
        let ctx = LagContext::default();
        run(&mut relay, &mut agg, &ctx);

        // The neighbor reflects every home sequence; masks may assert.
        relay.reflected_agg_sequence = relay.home_agg_state.sequence;
        relay.reflected_gw_sequence = relay.home_gw_state.sequence;
        relay.reflected_gp_sequence = relay.home_gw_preference.sequence;
        relay.new_nbor_state = true;
        run(&mut relay, &mut agg, &ctx);

        // Merged links 1 (home) and 2 (neighbor) split the space in two,
        // and the gateway selection tracks the aggregator selection.
        assert_eq!(relay.aggregator_selection[0], PortalSide::Home);
        assert_eq!(relay.aggregator_selection[1], PortalSide::Nbor);
        assert!(relay.home_aggregator_mask.get(0));
        assert!(relay.nbor_aggregator_mask.get(1));
        assert!(relay.home_gateway_mask.get(0));
        assert!(!relay.nbor_gateway_mask.get(0));
        assert!(relay.nbor_gateway_mask.get(1));
        assert!(!relay.home_gateway_mask.get(1));
        assert_eq!(relay.home_gateway_mask.count_ones(), 2048);
        assert_eq!(relay.nbor_gateway_mask.count_ones(), 2048);
    }

    #[test]
    fn test_preference_splits_gateways() {
        let (mut relay, mut agg) = paired_fixture();
        relay.gateway_algorithm = LagAlgorithm::C_VID;
        relay.nbor_gw_state.algorithm = LagAlgorithm::C_VID;
        // Home prefers even conversations, the neighbor odd ones.
        for cid in 0..CONVERSATION_ID_COUNT as ConversationId {
            relay.gateway_preference_mask.set(cid, cid % 2 == 0);
            relay.nbor_gw_preference.preference_mask.set(cid, cid % 2 == 1);
        }
        let ctx = LagContext::default();
        run(&mut relay, &mut agg, &ctx);

        relay.reflected_agg_sequence = relay.home_agg_state.sequence;
        relay.reflected_gw_sequence = relay.home_gw_state.sequence;
        relay.reflected_gp_sequence = relay.home_gw_preference.sequence;
        relay.new_nbor_state = true;
        run(&mut relay, &mut agg, &ctx);

        assert!(relay.home_gateway_mask.get(0));
        assert!(relay.nbor_gateway_mask.get(1));
        assert!(relay.home_gateway_mask.get(2));
        assert_eq!(relay.home_gateway_mask.count_ones(), 2048);
        assert_eq!(relay.nbor_gateway_mask.count_ones(), 2048);
    }

    #[test]
    fn test_unavailable_gateway_falls_to_other_side() {
        let (mut relay, mut agg) = paired_fixture();
        relay.gateway_algorithm = LagAlgorithm::C_VID;
        relay.nbor_gw_state.algorithm = LagAlgorithm::C_VID;
        relay.gateway_enable_mask.set(7, false);
        let ctx = LagContext::default();
        run(&mut relay, &mut agg, &ctx);

        relay.reflected_agg_sequence = relay.home_agg_state.sequence;
        relay.reflected_gw_sequence = relay.home_gw_state.sequence;
        relay.reflected_gp_sequence = relay.home_gw_preference.sequence;
        relay.new_nbor_state = true;
        run(&mut relay, &mut agg, &ctx);

        // Conversation 7 is not available here, so the neighbor takes it.
        assert_eq!(relay.gateway_selection[7], PortalSide::Nbor);
        assert!(!relay.home_gateway_mask.get(7));
        assert!(relay.nbor_gateway_mask.get(7));
    }
}
