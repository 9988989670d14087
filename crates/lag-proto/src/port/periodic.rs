//! Periodic transmission machine.
//!
//! Version 1 actors transmit on a fast or slow cadence picked by the
//! partner's timeout preference; this machine raises NTT on that cadence
//! and gates the Transmit machine through `lacp_tx_enabled`. Version 2
//! actors fold the cadence into the Transmit machine itself, so here they
//! rest in `NoPeriodic` with transmission always granted.

use tracing::trace;

use crate::observer::LagContext;

use super::types::{AggPort, PeriodicSmState};
use super::MAX_STEPS;

pub(crate) fn reset(port: &mut AggPort) {
    port.periodic_timer = 0;
    port.lacp_tx_enabled = false;
    port.periodic_state = PeriodicSmState::NoPeriodic;
}

pub(crate) fn timer_tick(port: &mut AggPort) {
    port.periodic_timer = port.periodic_timer.saturating_sub(1);
}

pub(crate) fn run(port: &mut AggPort, _ctx: &LagContext, single_step: bool) -> u32 {
    let entry = port.periodic_state;
    let mut transitions = 0;
    while step(port) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if port.periodic_state != entry {
        trace!(
            "{}: periodic {:?} -> {:?}",
            port.index,
            entry,
            port.periodic_state
        );
    }
    transitions
}

fn step(port: &mut AggPort) -> bool {
    if port.actor_lacp_version >= 2 {
        port.lacp_tx_enabled = true;
        if port.periodic_state != PeriodicSmState::NoPeriodic {
            port.periodic_state = enter_no_periodic(port);
            return true;
        }
        return false;
    }

    let enabled = port.port_operational
        && port.lacp_enabled
        && port.link.is_point_to_point()
        && (port.actor_oper_state.activity || port.partner_oper_state.activity);
    port.lacp_tx_enabled = enabled;

    if port.periodic_state != PeriodicSmState::NoPeriodic && !enabled {
        port.periodic_state = enter_no_periodic(port);
        return true;
    }

    match port.periodic_state {
        PeriodicSmState::NoPeriodic => {
            if enabled {
                port.periodic_state = enter_fast_periodic(port);
                true
            } else {
                false
            }
        }
        PeriodicSmState::FastPeriodic => {
            if !port.partner_oper_state.short_timeout {
                port.periodic_state = enter_slow_periodic(port);
                true
            } else if port.periodic_timer == 0 {
                port.periodic_state = enter_periodic_tx(port);
                true
            } else {
                false
            }
        }
        PeriodicSmState::SlowPeriodic => {
            if port.partner_oper_state.short_timeout || port.periodic_timer == 0 {
                port.periodic_state = enter_periodic_tx(port);
                true
            } else {
                false
            }
        }
        PeriodicSmState::PeriodicTx => {
            port.periodic_state = if port.partner_oper_state.short_timeout {
                enter_fast_periodic(port)
            } else {
                enter_slow_periodic(port)
            };
            true
        }
    }
}

fn enter_no_periodic(port: &mut AggPort) -> PeriodicSmState {
    port.periodic_timer = 0;
    PeriodicSmState::NoPeriodic
}

fn enter_fast_periodic(port: &mut AggPort) -> PeriodicSmState {
    port.periodic_timer = port.timers.fast_periodic;
    PeriodicSmState::FastPeriodic
}

fn enter_slow_periodic(port: &mut AggPort) -> PeriodicSmState {
    port.periodic_timer = port.timers.slow_periodic;
    PeriodicSmState::SlowPeriodic
}

fn enter_periodic_tx(port: &mut AggPort) -> PeriodicSmState {
    port.ntt = true;
    PeriodicSmState::PeriodicTx
}
