//! DRCP Transmit machine.
//!
//! Rests in a fast or slow periodic state chosen by the neighbor's
//! timeout preference and transmits on NTT or cadence expiry. There is no
//! windowed rate limit like LACP's; the engine grants one transmit
//! opportunity per cycle, and the gateway/aggregator logic can hold a
//! transmission back until it has versioned the home vectors it would
//! carry.

use tracing::trace;

use crate::aggregator::Aggregator;
use crate::observer::LagContext;
use crate::pdu::{Drcpdu, Frame};

use super::types::{DistributedRelay, DrcpTxSmState};
use super::MAX_STEPS;

pub(crate) fn reset(relay: &mut DistributedRelay) {
    relay.ntt = false;
    relay.tx_hold = false;
    relay.tx_opportunity = false;
    relay.tx_when_timer = 0;
    relay.tx_state = DrcpTxSmState::NoTx;
}

pub(crate) fn run(
    relay: &mut DistributedRelay,
    agg: &Aggregator,
    _ctx: &LagContext,
    single_step: bool,
) -> u32 {
    let entry = relay.tx_state;
    let mut transitions = 0;
    while step(relay, agg) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if relay.tx_state != entry {
        trace!("{}: drcp tx {:?} -> {:?}", relay.index, entry, relay.tx_state);
    }
    transitions
}

fn step(relay: &mut DistributedRelay, agg: &Aggregator) -> bool {
    let enabled = relay.irp_operational && relay.drcp_enabled;
    if !enabled {
        if relay.tx_state != DrcpTxSmState::NoTx {
            relay.tx_state = enter_no_tx(relay);
            return true;
        }
        return false;
    }

    match relay.tx_state {
        DrcpTxSmState::NoTx => {
            relay.tx_state = if relay.nbor_irp_state.drcp_short_timeout {
                enter_fast_periodic(relay)
            } else {
                enter_slow_periodic(relay)
            };
            true
        }
        DrcpTxSmState::FastPeriodic => {
            if (relay.ntt || relay.tx_when_timer == 0)
                && relay.tx_opportunity
                && !relay.tx_hold
            {
                relay.tx_state = enter_tx(relay, agg);
                true
            } else if !relay.ntt
                && relay.tx_when_timer > 0
                && !relay.nbor_irp_state.drcp_short_timeout
            {
                relay.tx_state = enter_slow_periodic(relay);
                true
            } else {
                false
            }
        }
        DrcpTxSmState::SlowPeriodic => {
            if (relay.ntt
                || relay.tx_when_timer == 0
                || relay.nbor_irp_state.drcp_short_timeout)
                && relay.tx_opportunity
                && !relay.tx_hold
            {
                relay.tx_state = enter_tx(relay, agg);
                true
            } else {
                false
            }
        }
        // One-shot state; the transmission happened on entry.
        DrcpTxSmState::Tx => {
            relay.tx_state = if relay.nbor_irp_state.drcp_short_timeout {
                enter_fast_periodic(relay)
            } else {
                enter_slow_periodic(relay)
            };
            true
        }
    }
}

// Keeps NTT; transmission resumes where it left off when the IRP comes
// back.
fn enter_no_tx(relay: &mut DistributedRelay) -> DrcpTxSmState {
    relay.tx_when_timer = 0;
    DrcpTxSmState::NoTx
}

fn enter_fast_periodic(relay: &mut DistributedRelay) -> DrcpTxSmState {
    relay.tx_when_timer = relay.timers.fast_periodic;
    DrcpTxSmState::FastPeriodic
}

fn enter_slow_periodic(relay: &mut DistributedRelay) -> DrcpTxSmState {
    relay.tx_when_timer = relay.timers.slow_periodic;
    DrcpTxSmState::SlowPeriodic
}

fn enter_tx(relay: &mut DistributedRelay, agg: &Aggregator) -> DrcpTxSmState {
    if transmit_drcpdu(relay, agg) {
        relay.ntt = false;
    }
    // The cycle's transmit slot is spent either way.
    relay.tx_opportunity = false;
    DrcpTxSmState::Tx
}

/// Hands a fresh DRCPDU to the IRP; a down link transmits nothing.
fn transmit_drcpdu(relay: &mut DistributedRelay, agg: &Aggregator) -> bool {
    if !relay.irp.as_ref().is_some_and(|irp| irp.is_operational()) {
        return false;
    }
    let pdu = prepare_drcpdu(relay, agg);
    if let Some(irp) = relay.irp.as_mut() {
        let src = irp.mac_address();
        irp.send(Frame::drcp(relay.drcp_destination, src, pdu));
        relay.stats.drcpdu_tx += 1;
    }
    true
}

/// Fills a DRCPDU from the home and neighbor views.
///
/// Each state TLV rides along only while the neighbor has yet to reflect
/// the home sequence it carries; the sequence actually written is
/// remembered so a later content change can avoid reusing it.
fn prepare_drcpdu(relay: &mut DistributedRelay, agg: &Aggregator) -> Drcpdu {
    let mut pdu = Drcpdu {
        version: relay.drcp_version,
        ..Drcpdu::default()
    };
    pdu.home_system = agg.actor_admin_system;
    pdu.portal_system = relay.portal_system;
    // A paired system that lost the election reports the winner's key.
    pdu.portal_key = if relay.home_irp_state.irc_sync
        && relay.nbor_system < agg.actor_admin_system
    {
        relay.nbor_key
    } else {
        relay.portal_key
    };
    pdu.nbor_system = relay.nbor_system;
    pdu.home_agg_sequence = relay.home_agg_state.sequence;
    pdu.home_gw_sequence = relay.home_gw_state.sequence;
    pdu.home_gp_sequence = relay.home_gw_preference.sequence;
    pdu.nbor_agg_sequence = relay.nbor_agg_state.sequence;
    pdu.nbor_gw_sequence = relay.nbor_gw_state.sequence;
    pdu.nbor_gp_sequence = relay.nbor_gw_preference.sequence;
    pdu.home_irp_state = relay.home_irp_state;
    pdu.nbor_irp_state = relay.nbor_irp_state;

    if relay.home_agg_state.sequence != relay.reflected_agg_sequence {
        relay.last_tx_agg_sequence = relay.home_agg_state.sequence;
        pdu.aggregator_state = Some(relay.home_agg_state.clone());
    }
    if relay.home_gw_state.sequence != relay.reflected_gw_sequence {
        relay.last_tx_gw_sequence = relay.home_gw_state.sequence;
        pdu.gateway_state = Some(relay.home_gw_state.clone());
    }
    if relay.home_gw_preference.sequence != relay.reflected_gp_sequence {
        relay.last_tx_gp_sequence = relay.home_gw_preference.sequence;
        pdu.gateway_preference = Some(relay.home_gw_preference.clone());
    }
    pdu
}
