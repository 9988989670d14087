//! Receive machine.
//!
//! Consumes LACPDUs delivered to [`AggPort::rx_lacpdu`], maintains the
//! partner oper view and the liveness timer, and feeds the selection logic
//! by dropping `selected` to `Unselected` whenever the recorded partner
//! changes identity.

use tracing::trace;

use lag_types::{Digest, LagAlgorithm};

use crate::observer::{LagContext, LagEvent};
use crate::pdu::Lacpdu;

use super::types::{AggPort, RxSmState, Selected};
use super::MAX_STEPS;

/// Reinitializes the machine, applying any pending actor admin values.
pub(crate) fn reset(port: &mut AggPort) {
    port.current_while_timer = 0;
    port.port_operational = false;
    actor_admin_change(port);
    port.change_actor_admin = false;
    port.change_admin_link_number = false;
    port.rx_state = enter_initialize(port);
    port.rx_lacpdu = None;
    port.new_partner = true;
}

pub(crate) fn timer_tick(port: &mut AggPort) {
    port.current_while_timer = port.current_while_timer.saturating_sub(1);
}

/// Runs the machine until it settles, one transition at a time when
/// `single_step` is set.
pub(crate) fn run(port: &mut AggPort, ctx: &LagContext, single_step: bool) -> u32 {
    let entry = port.rx_state;
    let mut transitions = 0;
    while step(port) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if port.rx_state != entry {
        trace!("{}: rx {:?} -> {:?}", port.index, entry, port.rx_state);
        ctx.notify(LagEvent::ReceiveStateChanged {
            port: port.index,
            state: port.rx_state,
        });
    }
    transitions
}

fn step(port: &mut AggPort) -> bool {
    if port.change_actor_admin {
        port.change_actor_admin = false;
        actor_admin_change(port);
    }
    if port.change_admin_link_number {
        port.change_admin_link_number = false;
        update_link_number(port);
    }

    let operational = port.link.is_operational();
    if operational && !port.port_operational && port.wtr_time > 0 {
        // Link recovery; hold it out of the LAG for the restore time.
        port.wtr_timer = u32::from(port.wtr_time);
        port.wtr_waiting = true;
    }
    port.port_operational = operational;

    let global_port_disabled = (port.rx_state != RxSmState::PortDisabled
        || port.partner_oper_state.sync)
        && !port.port_operational
        && !port.port_moved;

    let transition = if global_port_disabled {
        port.rx_state = enter_port_disabled(port);
        true
    } else {
        match port.rx_state {
            RxSmState::Initialize => {
                port.rx_state = enter_port_disabled(port);
                true
            }
            RxSmState::PortDisabled => {
                if port.port_moved {
                    port.rx_state = enter_initialize(port);
                    true
                } else if port.port_operational && !port.lacp_enabled {
                    port.rx_state = enter_lacp_disabled(port);
                    true
                } else if port.port_operational && port.lacp_enabled {
                    port.rx_state = enter_expired(port);
                    true
                } else {
                    false
                }
            }
            RxSmState::LacpDisabled => {
                if port.lacp_enabled {
                    port.rx_state = enter_port_disabled(port);
                    true
                } else if port.change_partner_admin {
                    port.change_partner_admin = false;
                    port.rx_state = enter_lacp_disabled(port);
                    true
                } else {
                    false
                }
            }
            RxSmState::Expired => match port.rx_lacpdu {
                Some(pdu) => {
                    port.rx_state = enter_current(port, &pdu);
                    true
                }
                None if port.current_while_timer == 0 => {
                    port.rx_state = enter_defaulted(port);
                    true
                }
                None => false,
            },
            RxSmState::Defaulted => match port.rx_lacpdu {
                Some(pdu) => {
                    port.rx_state = enter_current(port, &pdu);
                    true
                }
                None if port.change_partner_admin => {
                    port.change_partner_admin = false;
                    port.rx_state = enter_defaulted(port);
                    true
                }
                None => false,
            },
            RxSmState::Current => match port.rx_lacpdu {
                Some(pdu) => {
                    port.rx_state = enter_current(port, &pdu);
                    true
                }
                // Liveness lost. Detour through PortDisabled so the
                // recorded partner drops to version 1 defaults before the
                // next chained step re-enters Expired.
                None if port.current_while_timer == 0 => {
                    port.rx_state = enter_port_disabled(port);
                    true
                }
                None => false,
            },
        }
    };

    port.rx_lacpdu = None;
    transition
}

fn enter_initialize(port: &mut AggPort) -> RxSmState {
    port.selected = Selected::Unselected;
    record_default(port);
    port.actor_oper_state.expired = false;
    port.port_moved = false;
    RxSmState::Initialize
}

fn enter_port_disabled(port: &mut AggPort) -> RxSmState {
    port.partner_oper_state.sync = false;
    port.partner_lacp_version = 1;
    RxSmState::PortDisabled
}

fn enter_lacp_disabled(port: &mut AggPort) -> RxSmState {
    port.selected = Selected::Unselected;
    record_default(port);
    port.partner_oper_state.aggregation = false;
    port.actor_oper_state.expired = false;
    RxSmState::LacpDisabled
}

fn enter_expired(port: &mut AggPort) -> RxSmState {
    port.partner_oper_state.sync = false;
    port.partner_oper_state.short_timeout = true;
    port.current_while_timer = port.timers.short_timeout;
    port.actor_oper_state.expired = true;
    if port.actor_lacp_version == 1 {
        port.ntt = true;
    }
    port.stats.entered_expired += 1;
    RxSmState::Expired
}

fn enter_defaulted(port: &mut AggPort) -> RxSmState {
    update_default_selected(port);
    record_default(port);
    port.actor_oper_state.expired = false;
    port.stats.entered_defaulted += 1;
    RxSmState::Defaulted
}

fn enter_current(port: &mut AggPort, pdu: &Lacpdu) -> RxSmState {
    update_selected(port, pdu);
    update_ntt(port, pdu);
    record_pdu(port, pdu);
    port.current_while_timer = if port.actor_oper_state.short_timeout {
        port.timers.short_timeout
    } else {
        port.timers.long_timeout
    };
    port.actor_oper_state.expired = false;
    RxSmState::Current
}

/// Applies pending actor admin values to the oper set.
///
/// A key change or an aggregation-bit change alters the LAG ID, so the
/// port must reselect. The oper key follows admin only on an explicit key
/// write; a key diverged by dynamic key management stays put.
fn actor_admin_change(port: &mut AggPort) {
    if port.actor_oper_state.aggregation != port.actor_admin_state.aggregation
        || port.change_actor_admin_key
    {
        port.selected = Selected::Unselected;
    }
    if port.change_actor_admin_key {
        port.change_actor_admin_key = false;
        port.actor_oper_key = port.actor_admin_key;
    }
    port.actor_oper_state.aggregation = port.actor_admin_state.aggregation;
    port.actor_oper_state.activity = port.actor_admin_state.activity;
    port.actor_oper_state.short_timeout = port.actor_admin_state.short_timeout;
    port.ntt = true;
}

/// Applies an admin link number change.
fn update_link_number(port: &mut AggPort) {
    if port.actor_oper_state.defaulted || port.partner_lacp_version == 1 {
        port.partner_link_number = port.admin_link_number;
    }
    if port.actor_oper_state.collecting {
        if port.selected == Selected::Selected {
            port.change_port_link_state = true;
        }
    } else {
        port.oper_link_number = port.admin_link_number;
        if port.actor_oper_state.sync {
            port.ntt = true;
        }
    }
}

/// Drops selection if the admin partner differs from the oper partner the
/// defaulted values are about to replace.
fn update_default_selected(port: &mut AggPort) {
    if port.partner_admin_system != port.partner_oper_system
        || port.partner_admin_port != port.partner_oper_port
        || port.partner_admin_key != port.partner_oper_key
        || port.partner_admin_state.aggregation != port.partner_oper_state.aggregation
    {
        port.selected = Selected::Unselected;
    }
}

fn record_default(port: &mut AggPort) {
    port.partner_oper_system = port.partner_admin_system;
    port.partner_oper_port = port.partner_admin_port;
    port.partner_oper_key = port.partner_admin_key;
    port.partner_oper_state = port.partner_admin_state;
    port.actor_oper_state.defaulted = true;
    record_version2_defaults(port);
}

/// Drops selection when the PDU's actor is not the partner this port had
/// recorded.
fn update_selected(port: &mut AggPort, pdu: &Lacpdu) {
    if port.partner_oper_system != pdu.actor.system
        || port.partner_oper_port != pdu.actor.port
        || port.partner_oper_key != pdu.actor.key
        || port.partner_oper_state.aggregation != pdu.actor.state.aggregation
    {
        port.selected = Selected::Unselected;
        port.new_partner = true;
    }
}

/// Raises NTT when the partner's view of this actor is stale.
fn update_ntt(port: &mut AggPort, pdu: &Lacpdu) {
    if pdu.partner.system != port.actor_oper_system
        || pdu.partner.port != port.actor_port
        || pdu.partner.key != port.actor_oper_key
        || pdu.partner.state.activity != port.actor_oper_state.activity
        || pdu.partner.state.short_timeout != port.actor_oper_state.short_timeout
        || pdu.partner.state.sync != port.actor_oper_state.sync
        || pdu.partner.state.aggregation != port.actor_oper_state.aggregation
    {
        port.ntt = true;
    }
}

fn record_pdu(port: &mut AggPort, pdu: &Lacpdu) {
    port.partner_oper_system = pdu.actor.system;
    port.partner_oper_port = pdu.actor.port;
    port.partner_oper_key = pdu.actor.key;
    port.partner_oper_state = pdu.actor.state;
    port.actor_oper_state.defaulted = false;

    // Partner sync holds only if the partner agrees it is talking to this
    // actor (or is individual) and at least one side is active.
    port.partner_oper_state.sync = pdu.actor.state.sync
        && (!pdu.actor.state.aggregation || compare_partner_view_of_actor(port, pdu))
        && (pdu.actor.state.activity
            || (port.actor_oper_state.activity && pdu.partner.state.activity));

    if pdu.version >= 2 && port.actor_lacp_version >= 2 {
        record_port_algorithm_tlv(port, pdu);
        record_link_digest_tlv(port, pdu);
        record_service_digest_tlv(port, pdu);
    } else {
        record_version2_defaults(port);
        port.partner_link_number = port.admin_link_number;
    }
    port.partner_lacp_version = pdu.version;
}

fn compare_partner_view_of_actor(port: &AggPort, pdu: &Lacpdu) -> bool {
    pdu.partner.system == port.actor_oper_system
        && pdu.partner.port == port.actor_port
        && pdu.partner.key == port.actor_oper_key
        && pdu.partner.state.aggregation == port.actor_oper_state.aggregation
}

fn record_port_algorithm_tlv(port: &mut AggPort, pdu: &Lacpdu) {
    let algorithm = pdu.port_algorithm.unwrap_or(LagAlgorithm::UNSPECIFIED);
    if algorithm != port.partner_algorithm {
        if port.actor_oper_state.collecting {
            port.change_partner_dist_alg = true;
        }
        port.partner_algorithm = algorithm;
    }
}

fn record_link_digest_tlv(port: &mut AggPort, pdu: &Lacpdu) {
    let digest = pdu.link_digest.unwrap_or(Digest::ZERO);
    if digest != port.partner_link_digest {
        if port.actor_oper_state.collecting && port.selected == Selected::Selected {
            port.change_partner_dist_alg = true;
        }
        port.partner_link_digest = digest;
    }

    // The link number rides with this TLV. The numerically lower system
    // owns link numbering; when this actor is the higher one, flag the
    // change so the distribution logic adopts the partner's number.
    let link = pdu.link_number.unwrap_or(port.admin_link_number);
    if link != port.partner_link_number {
        port.partner_link_number = link;
        if port.actor_oper_state.collecting
            && port.selected == Selected::Selected
            && partner_decides_link_number(port)
        {
            port.change_port_link_state = true;
        }
    }
}

fn record_service_digest_tlv(port: &mut AggPort, pdu: &Lacpdu) {
    let digest = pdu.service_digest.unwrap_or(Digest::ZERO);
    if digest != port.partner_service_digest {
        if port.actor_oper_state.collecting && port.selected == Selected::Selected {
            port.change_partner_dist_alg = true;
        }
        port.partner_service_digest = digest;
    }
}

pub(crate) fn partner_decides_link_number(port: &AggPort) -> bool {
    port.actor_oper_system > port.partner_oper_system
        || (port.actor_oper_system == port.partner_oper_system
            && port.actor_port > port.partner_oper_port)
}

fn record_version2_defaults(port: &mut AggPort) {
    port.partner_lacp_version = 1;
    port.oper_link_number = port.admin_link_number;
    port.partner_link_number = port.admin_link_number;
    port.partner_algorithm = LagAlgorithm::NONE;
    port.partner_link_digest = Digest::ZERO;
    port.partner_service_digest = Digest::ZERO;
}
