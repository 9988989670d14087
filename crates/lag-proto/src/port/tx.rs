//! Transmit machine.
//!
//! Version 1 transmits only on NTT, rate limited to `tx_limit` PDUs per
//! window, with the cadence supplied by the Periodic machine. Version 2
//! owns its cadence: it rests in a fast or slow periodic state chosen by
//! the partner's timeout preference and folds NTT into the same window
//! accounting.

use tracing::trace;

use crate::observer::LagContext;
use crate::pdu::{Frame, Lacpdu};

use super::types::{AggPort, TxSmState};
use super::MAX_STEPS;

pub(crate) fn reset(port: &mut AggPort) {
    port.ntt = false;
    port.tx_count = 0;
    port.tx_when_timer = 0;
    port.tx_limit_timer = 0;
    port.tx_opportunity = false;
    port.tx_state = TxSmState::NoTx;
}

pub(crate) fn timer_tick(port: &mut AggPort) {
    port.tx_limit_timer = port.tx_limit_timer.saturating_sub(1);
    port.tx_when_timer = port.tx_when_timer.saturating_sub(1);
}

pub(crate) fn run(port: &mut AggPort, _ctx: &LagContext, single_step: bool) -> u32 {
    let entry = port.tx_state;
    let mut transitions = 0;
    let step = if port.actor_lacp_version >= 2 {
        step_v2
    } else {
        step_v1
    };
    while step(port) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if port.tx_state != entry {
        trace!("{}: tx {:?} -> {:?}", port.index, entry, port.tx_state);
    }
    transitions
}

fn step_v1(port: &mut AggPort) -> bool {
    if port.tx_state != TxSmState::NoTx && !port.lacp_tx_enabled {
        port.tx_state = enter_no_tx_v1(port);
        return true;
    }
    match port.tx_state {
        TxSmState::NoTx => {
            if !port.lacp_tx_enabled && port.ntt {
                // Consume NTT raised while transmission is off.
                port.tx_state = enter_no_tx_v1(port);
                true
            } else if port.lacp_tx_enabled {
                port.tx_state = enter_reset_tx_count(port);
                true
            } else {
                false
            }
        }
        TxSmState::ResetTxCount => {
            if port.ntt {
                port.tx_state = enter_tx_lacpdu_v1(port);
                true
            } else {
                false
            }
        }
        TxSmState::TxLacpdu => {
            if port.ntt && port.tx_count < port.timers.tx_limit {
                port.tx_state = enter_tx_lacpdu_v1(port);
                true
            } else if port.tx_limit_timer == 0 {
                port.tx_state = enter_reset_tx_count(port);
                true
            } else {
                false
            }
        }
        // Resting states of the other version; the actor's version changed.
        TxSmState::FastPeriodic | TxSmState::SlowPeriodic => {
            port.tx_state = enter_no_tx_v1(port);
            true
        }
    }
}

fn step_v2(port: &mut AggPort) -> bool {
    if port.tx_limit_timer == 0 {
        port.tx_limit_timer = port.timers.tx_limit_interval;
        port.tx_count = 0;
    }
    port.tx_opportunity = port.tx_count <= port.timers.tx_limit;

    let enabled = port.port_operational
        && port.link.is_point_to_point()
        && (port.actor_oper_state.activity || port.partner_oper_state.activity);
    if !enabled {
        if port.tx_state != TxSmState::NoTx {
            port.tx_state = enter_no_tx_v2(port);
            return true;
        }
        return false;
    }

    match port.tx_state {
        TxSmState::NoTx => {
            if port.partner_oper_state.short_timeout {
                port.tx_state = enter_fast_periodic(port);
                true
            } else {
                // Arm the slow cadence without leaving; the Receive
                // machine forces a short partner timeout whenever
                // transmission must resume.
                enter_slow_periodic(port);
                false
            }
        }
        TxSmState::FastPeriodic => {
            if (port.ntt || port.tx_when_timer == 0) && port.tx_opportunity {
                port.tx_state = enter_tx_lacpdu_v2(port);
                true
            } else if !port.ntt
                && port.tx_when_timer > 0
                && !port.partner_oper_state.short_timeout
            {
                port.tx_state = enter_slow_periodic(port);
                true
            } else {
                false
            }
        }
        TxSmState::SlowPeriodic => {
            if (port.ntt || port.tx_when_timer == 0 || port.partner_oper_state.short_timeout)
                && port.tx_opportunity
            {
                port.tx_state = enter_tx_lacpdu_v2(port);
                true
            } else {
                false
            }
        }
        // Resting state of version 1, or the transient transmit state
        // left behind by a version change.
        TxSmState::ResetTxCount | TxSmState::TxLacpdu => {
            port.tx_state = enter_no_tx_v2(port);
            true
        }
    }
}

fn enter_no_tx_v1(port: &mut AggPort) -> TxSmState {
    port.ntt = false;
    port.tx_count = 0;
    port.tx_limit_timer = 0;
    TxSmState::NoTx
}

// Keeps NTT and the window accounting; transmission resumes where it
// left off when the port comes back.
fn enter_no_tx_v2(port: &mut AggPort) -> TxSmState {
    port.tx_when_timer = 0;
    TxSmState::NoTx
}

fn enter_reset_tx_count(port: &mut AggPort) -> TxSmState {
    port.tx_count = 0;
    TxSmState::ResetTxCount
}

fn enter_fast_periodic(port: &mut AggPort) -> TxSmState {
    port.tx_when_timer = port.timers.fast_periodic;
    TxSmState::FastPeriodic
}

fn enter_slow_periodic(port: &mut AggPort) -> TxSmState {
    port.tx_when_timer = port.timers.slow_periodic;
    TxSmState::SlowPeriodic
}

fn enter_tx_lacpdu_v1(port: &mut AggPort) -> TxSmState {
    if transmit_lacpdu(port) {
        port.ntt = false;
        if port.tx_limit_timer == 0 {
            port.tx_limit_timer = port.timers.tx_limit_interval;
            port.tx_count = 1;
        } else {
            port.tx_count += 1;
        }
    }
    TxSmState::TxLacpdu
}

fn enter_tx_lacpdu_v2(port: &mut AggPort) -> TxSmState {
    transmit_lacpdu(port);
    port.tx_count += 1;
    port.ntt = false;
    if port.partner_oper_state.short_timeout {
        enter_fast_periodic(port)
    } else {
        enter_slow_periodic(port)
    }
}

/// Hands a fresh LACPDU to the link; a down link transmits nothing.
fn transmit_lacpdu(port: &mut AggPort) -> bool {
    if !port.link.is_operational() {
        return false;
    }
    let pdu = prepare_lacpdu(port);
    let src = port.link.mac_address();
    port.link.send(Frame::lacp(src, pdu));
    port.stats.lacpdu_tx += 1;
    true
}

fn prepare_lacpdu(port: &AggPort) -> Lacpdu {
    let mut pdu = Lacpdu {
        version: port.actor_lacp_version,
        collector_max_delay: port.collector_max_delay,
        ..Lacpdu::default()
    };
    pdu.actor.system = port.actor_oper_system;
    pdu.actor.key = port.actor_oper_key;
    pdu.actor.port = port.actor_port;
    pdu.actor.state = port.actor_oper_state;
    pdu.partner.system = port.partner_oper_system;
    pdu.partner.key = port.partner_oper_key;
    pdu.partner.port = port.partner_oper_port;
    pdu.partner.state = port.partner_oper_state;
    if port.actor_lacp_version >= 2 {
        pdu.port_algorithm = Some(port.actor_algorithm);
        pdu.link_digest = Some(port.actor_link_digest);
        pdu.service_digest = Some(port.actor_service_digest);
        pdu.link_number = Some(port.oper_link_number);
    }
    pdu
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lag_types::SystemId;

    use crate::pdu::Sdu;
    use crate::PortIndex;

    use super::super::testlink::{TestLink, TestLinkHandle};
    use super::super::types::PortConfig;
    use super::*;

    const SYSTEM: u64 = 0x0001_0000_0000_0011;

    fn port_v(version: u8) -> (AggPort, TestLinkHandle) {
        let (link, handle) = TestLink::up();
        let mut config = PortConfig::new(SystemId::from_u64(SYSTEM), 1, 0x100);
        config.lacp_version = version;
        let mut port = AggPort::new(PortIndex(0), config, Box::new(link));
        port.port_operational = true;
        (port, handle)
    }

    fn run_settled(port: &mut AggPort) {
        let ctx = LagContext::default();
        run(port, &ctx, false);
    }

    #[test]
    fn test_v2_rests_in_no_tx_until_partner_wants_fast() {
        let (mut port, handle) = port_v(2);
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::NoTx);
        assert_eq!(port.tx_when_timer, port.timers.slow_periodic);
        assert!(handle.sent().is_empty());

        // The Receive machine forces a short partner timeout in Expired,
        // which is what first lets a fresh port transmit.
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::FastPeriodic);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_v2_ntt_transmits_and_returns_to_cadence() {
        let (mut port, handle) = port_v(2);
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);

        port.ntt = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::FastPeriodic);
        assert!(!port.ntt);
        let sent = handle.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(port.stats.lacpdu_tx, 1);

        match &sent[0].sdu {
            Sdu::Lacp(pdu) => {
                assert_eq!(pdu.version, 2);
                assert_eq!(pdu.actor.system, port.actor_oper_system);
                assert_eq!(pdu.link_number, Some(port.oper_link_number));
                assert!(pdu.port_algorithm.is_some());
            }
            other => panic!("expected a LACPDU, got {other:?}"),
        }
    }

    #[test]
    fn test_v2_cadence_fires_on_timer_expiry() {
        let (mut port, handle) = port_v(2);
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);
        assert!(handle.sent().is_empty());

        for _ in 0..port.timers.fast_periodic {
            timer_tick(&mut port);
        }
        run_settled(&mut port);
        assert_eq!(handle.sent().len(), 1);
        assert_eq!(port.tx_when_timer, port.timers.fast_periodic);
    }

    #[test]
    fn test_v2_window_allows_limit_plus_one() {
        let (mut port, handle) = port_v(2);
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);

        for _ in 0..8 {
            port.ntt = true;
            run_settled(&mut port);
        }
        // Counts 0..=tx_limit each grant an opportunity.
        assert_eq!(handle.sent().len() as u32, port.timers.tx_limit + 1);
        assert!(port.ntt);

        // A fresh window drains the pending NTT.
        for _ in 0..port.timers.tx_limit_interval {
            timer_tick(&mut port);
        }
        run_settled(&mut port);
        assert_eq!(handle.sent().len() as u32, port.timers.tx_limit + 2);
    }

    #[test]
    fn test_v2_switches_to_slow_for_long_timeout_partner() {
        let (mut port, _handle) = port_v(2);
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::FastPeriodic);

        port.partner_oper_state.short_timeout = false;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::SlowPeriodic);
        assert_eq!(port.tx_when_timer, port.timers.slow_periodic);
    }

    #[test]
    fn test_v2_shared_medium_disables_transmission() {
        let (mut port, handle) = port_v(2);
        port.partner_oper_state.short_timeout = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::FastPeriodic);

        handle.set_point_to_point(false);
        port.ntt = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::NoTx);
        assert!(handle.sent().is_empty());
        assert!(port.ntt);
    }

    #[test]
    fn test_v1_transmits_on_ntt_only() {
        let (mut port, handle) = port_v(1);
        port.lacp_tx_enabled = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::ResetTxCount);
        assert!(handle.sent().is_empty());

        port.ntt = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::TxLacpdu);
        assert!(!port.ntt);
        let sent = handle.take_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].sdu {
            Sdu::Lacp(pdu) => {
                assert_eq!(pdu.version, 1);
                assert_eq!(pdu.port_algorithm, None);
                assert_eq!(pdu.link_number, None);
            }
            other => panic!("expected a LACPDU, got {other:?}"),
        }
        assert_eq!(port.tx_count, 1);
        assert_eq!(port.tx_limit_timer, port.timers.tx_limit_interval);
    }

    #[test]
    fn test_v1_rate_limit_holds_ntt_until_next_window() {
        let (mut port, handle) = port_v(1);
        port.lacp_tx_enabled = true;
        for _ in 0..8 {
            port.ntt = true;
            run_settled(&mut port);
        }
        assert_eq!(handle.sent().len() as u32, port.timers.tx_limit);
        assert!(port.ntt);

        for _ in 0..port.timers.tx_limit_interval {
            timer_tick(&mut port);
        }
        run_settled(&mut port);
        assert_eq!(handle.sent().len() as u32, port.timers.tx_limit + 1);
    }

    #[test]
    fn test_v1_down_link_keeps_ntt() {
        let (mut port, handle) = port_v(1);
        port.lacp_tx_enabled = true;
        run_settled(&mut port);
        handle.set_operational(false);

        port.ntt = true;
        run_settled(&mut port);
        assert!(handle.sent().is_empty());
        assert!(port.ntt);
    }

    #[test]
    fn test_v1_disable_clears_pending_state() {
        let (mut port, handle) = port_v(1);
        port.lacp_tx_enabled = true;
        port.ntt = true;
        run_settled(&mut port);
        assert_eq!(handle.sent().len(), 1);

        port.lacp_tx_enabled = false;
        port.ntt = true;
        run_settled(&mut port);
        assert_eq!(port.tx_state, TxSmState::NoTx);
        assert!(!port.ntt);
        assert_eq!(port.tx_count, 0);
    }
}
