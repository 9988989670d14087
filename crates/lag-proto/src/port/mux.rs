//! Mux machine.
//!
//! Walks a port through attach, collect and distribute against the
//! aggregator the selection logic picked, honoring the aggregate-wait
//! hold-off and the wait-to-restore hold on recovered links. Coupled
//! control turns collecting and distributing on and off together.

use tracing::trace;

use crate::aggregator::Aggregator;
use crate::observer::{LagContext, LagEvent};

use super::types::{AggPort, MuxSmState, Selected};
use super::MAX_STEPS;

pub(crate) fn reset(port: &mut AggPort) {
    port.wait_while_timer = 0;
    port.ready_n = false;
    port.actor_attached = false;
    port.actor_oper_state.sync = false;
    port.actor_oper_state.collecting = false;
    if port.actor_oper_state.distributing {
        port.actor_oper_state.distributing = false;
        port.change_actor_distributing = true;
    }
    port.mux_state = MuxSmState::Detached;
}

pub(crate) fn timer_tick(port: &mut AggPort) {
    port.wait_while_timer = port.wait_while_timer.saturating_sub(1);
    if port.wtr_timer > 0 {
        port.wtr_timer -= 1;
        if port.wtr_timer == 0 && port.wtr_revertive {
            port.wtr_waiting = false;
        }
    }
}

/// Runs the machine against the port's aggregator, if it has one.
pub(crate) fn run(
    port: &mut AggPort,
    mut agg: Option<&mut Aggregator>,
    ctx: &LagContext,
    single_step: bool,
) -> u32 {
    let entry = port.mux_state;
    let mut transitions = 0;
    while step(port, agg.as_deref_mut()) && transitions < MAX_STEPS {
        transitions += 1;
        if single_step {
            break;
        }
    }
    if port.mux_state != entry {
        trace!("{}: mux {:?} -> {:?}", port.index, entry, port.mux_state);
        ctx.notify(LagEvent::MuxStateChanged {
            port: port.index,
            state: port.mux_state,
        });
    }
    transitions
}

fn step(port: &mut AggPort, agg: Option<&mut Aggregator>) -> bool {
    match port.mux_state {
        MuxSmState::Detached => {
            if port.selected != Selected::Unselected {
                port.mux_state = enter_waiting(port);
                true
            } else {
                false
            }
        }
        MuxSmState::Waiting => {
            port.ready_n = port.selected == Selected::Selected
                && port.wait_while_timer == 0
                && !port.wtr_held();
            if port.selected == Selected::Unselected {
                port.mux_state = enter_detached(port, agg);
                true
            } else if port.selected == Selected::Selected && port.ready {
                port.mux_state = enter_attached(port, agg);
                true
            } else {
                false
            }
        }
        MuxSmState::Attached => {
            if port.selected != Selected::Selected {
                port.mux_state = enter_detached(port, agg);
                true
            } else if port.partner_oper_state.sync && !port.wtr_held() {
                port.mux_state = enter_collecting(port);
                true
            } else {
                false
            }
        }
        MuxSmState::Collecting => {
            if port.selected != Selected::Selected || !port.partner_oper_state.sync {
                port.mux_state = enter_attached(port, agg);
                true
            } else if !port.coupled_mux_control && port.partner_oper_state.collecting {
                port.mux_state = enter_distributing(port);
                true
            } else {
                false
            }
        }
        MuxSmState::Distributing => {
            if port.selected != Selected::Selected
                || !port.partner_oper_state.sync
                || !port.partner_oper_state.collecting
            {
                port.mux_state = enter_collecting(port);
                true
            } else {
                false
            }
        }
    }
}

fn enter_detached(port: &mut AggPort, agg: Option<&mut Aggregator>) -> MuxSmState {
    if let Some(agg) = agg {
        agg.lag_ports.retain(|&member| member != port.index);
    }
    port.actor_attached = false;
    port.ready_n = false;
    port.actor_oper_state.sync = false;
    port.actor_oper_state.collecting = false;
    if port.actor_oper_state.distributing {
        port.actor_oper_state.distributing = false;
        port.change_actor_distributing = true;
    }
    port.ntt = true;
    MuxSmState::Detached
}

fn enter_waiting(port: &mut AggPort) -> MuxSmState {
    port.wait_while_timer = port.timers.aggregate_wait;
    MuxSmState::Waiting
}

fn enter_attached(port: &mut AggPort, agg: Option<&mut Aggregator>) -> MuxSmState {
    if let Some(agg) = agg {
        if !agg.lag_ports.contains(&port.index) {
            agg.lag_ports.push(port.index);
            agg.lag_ports.sort_unstable();
        }
    }
    port.actor_attached = true;
    port.actor_oper_state.sync = true;
    port.actor_oper_state.collecting = false;
    if port.actor_oper_state.distributing {
        port.actor_oper_state.distributing = false;
        port.change_actor_distributing = true;
    }
    port.ntt = true;
    MuxSmState::Attached
}

fn enter_collecting(port: &mut AggPort) -> MuxSmState {
    port.actor_oper_state.collecting = true;
    if port.coupled_mux_control {
        if !port.actor_oper_state.distributing {
            port.actor_oper_state.distributing = true;
            port.change_actor_distributing = true;
        }
    } else if port.actor_oper_state.distributing {
        port.actor_oper_state.distributing = false;
        port.change_actor_distributing = true;
    }
    port.ntt = true;
    MuxSmState::Collecting
}

fn enter_distributing(port: &mut AggPort) -> MuxSmState {
    if !port.actor_oper_state.distributing {
        port.actor_oper_state.distributing = true;
        port.change_actor_distributing = true;
    }
    MuxSmState::Distributing
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lag_types::SystemId;

    use crate::aggregator::AggregatorConfig;
    use crate::{AggIndex, PortIndex};

    use super::super::testlink::TestLink;
    use super::super::types::PortConfig;
    use super::*;

    const SYSTEM: u64 = 0x0001_0000_0000_0011;

    fn selected_port() -> AggPort {
        let (link, _handle) = TestLink::up();
        let mut port = AggPort::new(
            PortIndex(0),
            PortConfig::new(SystemId::from_u64(SYSTEM), 1, 0x100),
            Box::new(link),
        );
        port.selected = Selected::Selected;
        port.aggregator = Some(AggIndex(0));
        port
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(
            AggIndex(0),
            AggregatorConfig::new(SystemId::from_u64(SYSTEM), 100, 0x100),
        )
    }

    fn run_settled(port: &mut AggPort, agg: &mut Aggregator) {
        let ctx = LagContext::default();
        run(port, Some(agg), &ctx, false);
    }

    #[test]
    fn test_attach_waits_for_aggregate_wait() {
        let mut port = selected_port();
        let mut agg = aggregator();

        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Waiting);
        assert!(!port.ready_n);
        assert_eq!(port.wait_while_timer, port.timers.aggregate_wait);

        for _ in 0..port.timers.aggregate_wait {
            timer_tick(&mut port);
        }
        run_settled(&mut port, &mut agg);
        assert!(port.ready_n);
        assert_eq!(port.mux_state, MuxSmState::Waiting);

        // Selection reports every waiting port ready.
        port.ready = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Attached);
        assert!(port.actor_attached);
        assert!(port.actor_oper_state.sync);
        assert_eq!(agg.lag_ports, vec![PortIndex(0)]);
        assert!(port.ntt);
    }

    fn attached_port() -> (AggPort, Aggregator) {
        let mut port = selected_port();
        let mut agg = aggregator();
        port.ready = true;
        run_settled(&mut port, &mut agg);
        (port, agg)
    }

    #[test]
    fn test_collect_then_distribute_on_partner_progress() {
        let (mut port, mut agg) = attached_port();
        assert_eq!(port.mux_state, MuxSmState::Attached);

        port.partner_oper_state.sync = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Collecting);
        assert!(port.actor_oper_state.collecting);
        assert!(!port.actor_oper_state.distributing);

        port.partner_oper_state.collecting = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Distributing);
        assert!(port.actor_oper_state.distributing);
        assert!(port.change_actor_distributing);
    }

    #[test]
    fn test_coupled_control_merges_collect_and_distribute() {
        let (mut port, mut agg) = attached_port();
        port.coupled_mux_control = true;

        port.partner_oper_state.sync = true;
        port.partner_oper_state.collecting = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Collecting);
        assert!(port.actor_oper_state.collecting);
        assert!(port.actor_oper_state.distributing);

        port.partner_oper_state.sync = false;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Attached);
        assert!(!port.actor_oper_state.collecting);
        assert!(!port.actor_oper_state.distributing);
    }

    #[test]
    fn test_unselected_detaches_and_clears_membership() {
        let (mut port, mut agg) = attached_port();
        port.partner_oper_state.sync = true;
        port.partner_oper_state.collecting = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Distributing);

        port.selected = Selected::Unselected;
        port.change_actor_distributing = false;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Detached);
        assert!(agg.lag_ports.is_empty());
        assert!(!port.actor_oper_state.sync);
        assert!(!port.actor_oper_state.distributing);
        assert!(port.change_actor_distributing);
    }

    #[test]
    fn test_standby_holds_in_waiting() {
        let mut port = selected_port();
        let mut agg = aggregator();
        port.selected = Selected::Standby;
        port.ready = true;
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Waiting);

        for _ in 0..port.timers.aggregate_wait {
            timer_tick(&mut port);
        }
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Waiting);
        assert!(!port.ready_n);
    }

    #[test]
    fn test_wait_to_restore_blocks_collecting() {
        let (mut port, mut agg) = attached_port();
        port.wtr_time = 50;
        port.wtr_timer = 50;
        port.wtr_waiting = true;
        port.partner_oper_state.sync = true;

        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Attached);

        for _ in 0..50 {
            timer_tick(&mut port);
        }
        assert!(!port.wtr_waiting);
        run_settled(&mut port, &mut agg);
        assert_eq!(port.mux_state, MuxSmState::Collecting);
    }

    #[test]
    fn test_non_revertive_hold_persists_after_expiry() {
        let mut port = selected_port();
        port.set_wtr_time(0x8000 | 10);
        port.wtr_timer = 10;
        port.wtr_waiting = true;

        for _ in 0..20 {
            timer_tick(&mut port);
        }
        assert!(port.wtr_held());
    }
}
