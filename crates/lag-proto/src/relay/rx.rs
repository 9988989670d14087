//! DRCP Receive machine.
//!
//! Consumes DRCPDUs delivered to [`DistributedRelay::rx_drcpdu`], checks
//! that the sender belongs to the same portal, and records three things
//! from each compatible PDU: the sequences the neighbor reflected back,
//! the neighbor's own state vectors, and the IRP state octets. Liveness
//! follows the same expiry ladder as LACP: missing PDUs expire the
//! machine onto a short timer, then drop it back to recorded defaults.

use tracing::trace;

use lag_types::SystemId;

use crate::aggregator::Aggregator;
use crate::observer::LagContext;
use crate::pdu::Drcpdu;

use super::types::{DistributedRelay, DrcpRxSmState};
use super::MAX_STEPS;

/// Reinitializes the machine and records administrative defaults.
pub(crate) fn reset(relay: &mut DistributedRelay) {
    relay.current_while_timer = 0;
    relay.rx_state = enter_initialize(relay);
    relay.rx_drcpdu = None;
}

/// Runs the machine until it settles, one transition at a time when
/// `single_step` is set.
pub(crate) fn run(
    relay: &mut DistributedRelay,
    agg: &Aggregator,
    _ctx: &LagContext,
    single_step: bool,
) -> u32 {
    let entry = relay.rx_state;
    let mut transitions = 0;
    while step(relay, agg) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if relay.rx_state != entry {
        trace!("{}: drcp rx {:?} -> {:?}", relay.index, entry, relay.rx_state);
    }
    transitions
}

fn step(relay: &mut DistributedRelay, agg: &Aggregator) -> bool {
    relay.irp_operational = relay
        .irp
        .as_ref()
        .is_some_and(|irp| irp.is_operational());

    // At most one PDU is considered per step; leftovers are stale.
    let pdu = relay.rx_drcpdu.take();

    if relay.rx_state != DrcpRxSmState::Initialize
        && (!relay.irp_operational || !relay.drcp_enabled)
    {
        relay.rx_state = enter_initialize(relay);
        return true;
    }

    match relay.rx_state {
        DrcpRxSmState::Initialize => {
            if relay.irp_operational && relay.drcp_enabled {
                relay.rx_state = enter_expired(relay);
                true
            } else {
                false
            }
        }
        DrcpRxSmState::WaitToReceive => {
            if let Some(pdu) = pdu {
                relay.rx_state = enter_portal_check(relay, agg, &pdu);
                true
            } else if relay.current_while_timer == 0 && !relay.home_irp_state.expired {
                relay.rx_state = enter_expired(relay);
                true
            } else if relay.current_while_timer == 0 && relay.home_irp_state.expired {
                relay.rx_state = enter_defaulted(relay);
                true
            } else {
                false
            }
        }
        // One-shot states; their work happened on entry.
        DrcpRxSmState::Expired | DrcpRxSmState::Defaulted | DrcpRxSmState::Current => {
            relay.rx_state = DrcpRxSmState::WaitToReceive;
            true
        }
    }
}

fn enter_initialize(relay: &mut DistributedRelay) -> DrcpRxSmState {
    record_default(relay);
    DrcpRxSmState::Initialize
}

fn enter_expired(relay: &mut DistributedRelay) -> DrcpRxSmState {
    // Ask the Transmit machine for the fast cadence while the neighbor
    // view is in doubt.
    relay.nbor_irp_state.drcp_short_timeout = true;
    relay.current_while_timer = relay.timers.short_timeout;
    relay.home_irp_state.expired = true;
    relay.ntt = true;
    DrcpRxSmState::Expired
}

fn enter_defaulted(relay: &mut DistributedRelay) -> DrcpRxSmState {
    record_default(relay);
    DrcpRxSmState::Defaulted
}

/// Accepts the PDU only if the sender speaks version 2, names the same
/// portal, and is not this system itself.
fn enter_portal_check(
    relay: &mut DistributedRelay,
    agg: &Aggregator,
    pdu: &Drcpdu,
) -> DrcpRxSmState {
    relay.differ_drni = pdu.version < 2
        || pdu.portal_system != relay.portal_system
        || (!pdu.portal_system.addr.is_zero() && pdu.portal_key != relay.portal_key)
        || pdu.home_system == agg.actor_admin_system;
    if relay.differ_drni {
        return DrcpRxSmState::WaitToReceive;
    }
    enter_current(relay, agg, pdu)
}

fn enter_current(relay: &mut DistributedRelay, agg: &Aggregator, pdu: &Drcpdu) -> DrcpRxSmState {
    record_reflected_state(relay, pdu);
    record_neighbor_state(relay, pdu);
    update_irp_state(relay, agg, pdu);
    relay.current_while_timer = if relay.home_irp_state.drcp_short_timeout {
        relay.timers.short_timeout
    } else {
        relay.timers.long_timeout
    };
    DrcpRxSmState::Current
}

/// Returns home and neighbor views to administrative defaults.
fn record_default(relay: &mut DistributedRelay) {
    relay.home_irp_state = super::IrpState {
        drcp_short_timeout: relay.admin_irp_state.drcp_short_timeout,
        defaulted: true,
        ..super::IrpState::default()
    };

    relay.nbor_system = SystemId::ZERO;
    relay.nbor_agg_state.reset();
    relay.nbor_gw_state.reset();
    relay.nbor_gw_preference.reset();
    relay.reflected_agg_sequence = 0;
    relay.reflected_gw_sequence = 0;
    relay.reflected_gp_sequence = 0;

    relay.differ_drni = false;
    relay.new_home_info = true;
    relay.new_nbor_state = true;
    relay.new_reflected_state = true;
}

/// Records which home sequences the neighbor has echoed back.
fn record_reflected_state(relay: &mut DistributedRelay, pdu: &Drcpdu) {
    // A stale echo means the neighbor missed an update; retransmit.
    if pdu.nbor_agg_sequence < relay.reflected_agg_sequence
        || pdu.nbor_gw_sequence < relay.reflected_gw_sequence
        || pdu.nbor_gp_sequence < relay.reflected_gp_sequence
    {
        relay.ntt = true;
    }
    if pdu.nbor_agg_sequence > relay.reflected_agg_sequence {
        relay.new_reflected_state = true;
        relay.reflected_agg_sequence = pdu.nbor_agg_sequence;
    }
    if pdu.nbor_gw_sequence > relay.reflected_gw_sequence {
        relay.new_reflected_state = true;
        relay.reflected_gw_sequence = pdu.nbor_gw_sequence;
    }
    if pdu.nbor_gp_sequence > relay.reflected_gp_sequence {
        relay.new_reflected_state = true;
        relay.reflected_gp_sequence = pdu.nbor_gp_sequence;
    }
    // An echo ahead of the home sequence means the home vector must move
    // past it.
    if pdu.nbor_agg_sequence > relay.home_agg_state.sequence
        || pdu.nbor_gw_sequence > relay.home_gw_state.sequence
        || pdu.nbor_gp_sequence > relay.home_gw_preference.sequence
    {
        relay.new_home_info = true;
    }
    relay.reflected_irp_state = pdu.nbor_irp_state;
}

/// Records the neighbor's identity and whichever state TLVs carry a newer
/// sequence than the recorded view.
fn record_neighbor_state(relay: &mut DistributedRelay, pdu: &Drcpdu) {
    if pdu.home_system != relay.nbor_system || pdu.portal_key != relay.nbor_key {
        relay.ntt = true;
        relay.tx_hold = true;
        relay.new_nbor_state = true;
        relay.nbor_system = pdu.home_system;
        relay.nbor_key = pdu.portal_key;
    }

    if pdu.home_agg_sequence != relay.nbor_agg_state.sequence {
        relay.ntt = true;
    }
    if let Some(state) = &pdu.aggregator_state {
        if pdu.home_agg_sequence > relay.nbor_agg_state.sequence
            && pdu.home_agg_sequence == state.sequence
        {
            relay.tx_hold = true;
            relay.new_nbor_state = true;
            relay.nbor_agg_state = state.clone();
        }
    }

    if pdu.home_gw_sequence != relay.nbor_gw_state.sequence {
        relay.ntt = true;
    }
    if let Some(state) = &pdu.gateway_state {
        if pdu.home_gw_sequence > relay.nbor_gw_state.sequence
            && pdu.home_gw_sequence == state.sequence
        {
            relay.tx_hold = true;
            relay.new_nbor_state = true;
            relay.nbor_gw_state = state.clone();
        }
    }

    if pdu.home_gp_sequence != relay.nbor_gw_preference.sequence {
        relay.ntt = true;
    }
    if let Some(state) = &pdu.gateway_preference {
        if pdu.home_gp_sequence > relay.nbor_gw_preference.sequence
            && pdu.home_gp_sequence == state.sequence
        {
            relay.tx_hold = true;
            relay.new_nbor_state = true;
            relay.nbor_gw_preference = state.clone();
        }
    }
}

/// Reconciles both IRP state octets with the received PDU.
fn update_irp_state(relay: &mut DistributedRelay, agg: &Aggregator, pdu: &Drcpdu) {
    relay.home_irp_state.expired = false;
    relay.home_irp_state.defaulted = false;

    if relay.home_irp_state.irc_sync == relay.differ_drni {
        relay.home_irp_state.irc_sync = !relay.differ_drni;
        relay.home_irp_state.irc_data =
            relay.home_irp_state.irc_sync && relay.admin_irp_state.irc_data;
        relay.ntt = true;
    }

    // Neighbor bits other than irc_sync are taken verbatim.
    if pdu.home_irp_state.to_octet() & 0xf4 != relay.nbor_irp_state.to_octet() & 0xf4 {
        relay.ntt = true;
        relay.nbor_irp_state.copy_except_sync(pdu.home_irp_state);
    }

    // The neighbor is synced only once it echoes this system's identity,
    // and the portal key, when this system's key decides it.
    if pdu.nbor_system != agg.actor_admin_system
        || (relay.home_irp_state.irc_sync
            && agg.actor_admin_system < relay.nbor_system
            && pdu.portal_key != relay.portal_key)
    {
        relay.nbor_irp_state.irc_sync = false;
        relay.ntt = true;
    } else if pdu.home_irp_state.irc_sync != relay.nbor_irp_state.irc_sync {
        relay.nbor_irp_state.irc_sync = pdu.home_irp_state.irc_sync;
        relay.ntt = true;
    }

    if pdu.nbor_irp_state != relay.home_irp_state {
        relay.ntt = true;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lag_types::{LagAlgorithm, SystemId};

    use crate::aggregator::AggregatorConfig;
    use crate::port::testlink::{TestLink, TestLinkHandle};
    use crate::relay::{AggState, RelayConfig};
    use crate::{AggIndex, RelayIndex};

    use super::*;

    const HOME: u64 = 0x0001_0000_0000_0010;
    const NBOR: u64 = 0x0001_0000_0000_0020;

    fn fixture() -> (DistributedRelay, Aggregator, TestLinkHandle) {
        let (link, handle) = TestLink::up();
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
        (relay, agg, handle)
    }

    fn nbor_pdu() -> Drcpdu {
        Drcpdu {
            version: 2,
            home_system: SystemId::from_u64(NBOR),
            nbor_system: SystemId::from_u64(HOME),
            ..Drcpdu::default()
        }
    }

    fn run_to_rest(relay: &mut DistributedRelay, agg: &Aggregator) {
        run(relay, agg, &LagContext::default(), false);
    }

    #[test]
    fn test_initialize_holds_until_link_up() {
        let (mut relay, agg, handle) = fixture();
        handle.set_operational(false);
        run_to_rest(&mut relay, &agg);
        assert_eq!(relay.rx_state, DrcpRxSmState::Initialize);

        handle.set_operational(true);
        run_to_rest(&mut relay, &agg);
        assert_eq!(relay.rx_state, DrcpRxSmState::WaitToReceive);
        assert!(relay.home_irp_state.expired);
        assert!(relay.ntt);
        assert_eq!(relay.current_while_timer, relay.timers.short_timeout);
    }

    #[test]
    fn test_portal_check_rejects_other_portal() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);

        let mut pdu = nbor_pdu();
        pdu.portal_system = SystemId::from_u64(0x0001_0000_0000_0099);
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        assert!(relay.differ_drni);
        assert_eq!(relay.rx_state, DrcpRxSmState::WaitToReceive);
        assert_eq!(relay.nbor_system, SystemId::ZERO);
    }

    #[test]
    fn test_portal_check_rejects_own_reflection() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);

        let mut pdu = nbor_pdu();
        pdu.home_system = agg.actor_admin_system;
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        assert!(relay.differ_drni);
        assert_eq!(relay.nbor_system, SystemId::ZERO);
    }

    #[test]
    fn test_current_records_neighbor_and_syncs() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);
        relay.ntt = false;

        let mut pdu = nbor_pdu();
        pdu.home_agg_sequence = 1;
        pdu.aggregator_state = Some(AggState {
            sequence: 1,
            algorithm: LagAlgorithm::C_VID,
            active_links: vec![1],
            ..AggState::default()
        });
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        assert_eq!(relay.rx_state, DrcpRxSmState::WaitToReceive);
        assert_eq!(relay.nbor_system, SystemId::from_u64(NBOR));
        assert_eq!(relay.nbor_agg_state.sequence, 1);
        assert_eq!(relay.nbor_agg_state.active_links, vec![1]);
        // The PDU echoed our identity, so the home side declares sync.
        assert!(relay.home_irp_state.irc_sync);
        assert!(relay.home_irp_state.irc_data);
        assert!(!relay.home_irp_state.expired);
        assert!(relay.ntt);
        assert!(relay.new_nbor_state);
    }

    #[test]
    fn test_state_tlv_needs_matching_sequence() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);

        let mut pdu = nbor_pdu();
        pdu.home_agg_sequence = 2;
        pdu.aggregator_state = Some(AggState {
            sequence: 1,
            ..AggState::default()
        });
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        // Fixed part accepted, but the stale TLV was not recorded.
        assert_eq!(relay.nbor_system, SystemId::from_u64(NBOR));
        assert_eq!(relay.nbor_agg_state.sequence, 0);
    }

    #[test]
    fn test_expiry_then_default() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);
        relay.rx_drcpdu = Some(nbor_pdu());
        run_to_rest(&mut relay, &agg);
        assert!(!relay.home_irp_state.expired);

        // Starve the machine: liveness bound, then the expiry ladder.
        for _ in 0..relay.timers.short_timeout {
            relay.timer_tick();
        }
        run_to_rest(&mut relay, &agg);
        assert!(relay.home_irp_state.expired);
        assert!(!relay.home_irp_state.defaulted);
        assert_eq!(relay.nbor_system, SystemId::from_u64(NBOR));

        for _ in 0..relay.timers.short_timeout {
            relay.timer_tick();
        }
        run_to_rest(&mut relay, &agg);
        assert!(relay.home_irp_state.defaulted);
        assert_eq!(relay.nbor_system, SystemId::ZERO);
        assert_eq!(relay.reflected_agg_sequence, 0);
    }

    #[test]
    fn test_stale_echo_raises_ntt() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);
        relay.reflected_agg_sequence = 5;
        relay.ntt = false;

        let mut pdu = nbor_pdu();
        pdu.nbor_agg_sequence = 3;
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        assert!(relay.ntt);
        // Reflected sequences never move backwards.
        assert_eq!(relay.reflected_agg_sequence, 5);
    }

    #[test]
    fn test_echo_ahead_of_home_forces_home_update() {
        let (mut relay, agg, _handle) = fixture();
        run_to_rest(&mut relay, &agg);
        relay.new_home_info = false;

        let mut pdu = nbor_pdu();
        pdu.nbor_gw_sequence = 9;
        relay.rx_drcpdu = Some(pdu);
        run_to_rest(&mut relay, &agg);

        assert!(relay.new_home_info);
        assert_eq!(relay.reflected_gw_sequence, 9);
    }

    #[test]
    fn test_link_down_reinitializes() {
        let (mut relay, agg, handle) = fixture();
        run_to_rest(&mut relay, &agg);
        relay.rx_drcpdu = Some(nbor_pdu());
        run_to_rest(&mut relay, &agg);
        assert_eq!(relay.nbor_system, SystemId::from_u64(NBOR));

        handle.set_operational(false);
        run_to_rest(&mut relay, &agg);
        assert_eq!(relay.rx_state, DrcpRxSmState::Initialize);
        assert!(relay.home_irp_state.defaulted);
        assert_eq!(relay.nbor_system, SystemId::ZERO);
    }
}
