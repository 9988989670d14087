//! Selection logic.
//!
//! Binds unselected ports to aggregators by LAG ID: the pair of (actor
//! system, actor key) and (partner system, partner key) both ends agree
//! on. Runs before the port machines each cycle so the Mux machines see a
//! settled binding. Rebinding waits until the Mux machine has detached the
//! port; `Standby` marks a port whose LAG exists but cannot take it yet.

use tracing::{debug, trace};

use lag_types::SystemId;

use crate::observer::{LagContext, LagEvent};
use crate::port::{AggPort, MuxSmState, Selected};

use super::types::Aggregator;

/// Applies pending aggregator admin changes before selection runs.
///
/// An actor system or key change propagates admin to oper and forces the
/// affected ports back through selection. A portal identity change pushes
/// the relay's elected system and key onto the aggregator and every port
/// sharing its admin key, so both portal systems present one LAG identity.
pub(crate) fn admin_aggregator_update(
    aggs: &mut [Aggregator],
    ports: &mut [AggPort],
    ctx: &LagContext,
) {
    for agg in aggs.iter_mut() {
        if agg.change_actor_system {
            agg.change_actor_system = false;
            agg.actor_oper_system = agg.actor_admin_system;
            debug!("{}: actor system -> {}", agg.index, agg.actor_oper_system);
            for port in ports.iter_mut() {
                if port.actor_admin_key != agg.admin_key {
                    continue;
                }
                port.actor_oper_system = agg.actor_oper_system;
                port.ntt = true;
                force_unselected(port, ctx);
            }
        }
        if agg.change_admin_key {
            agg.change_admin_key = false;
            agg.oper_key = agg.admin_key;
            for port in ports.iter_mut() {
                if port.aggregator == Some(agg.index) {
                    force_unselected(port, ctx);
                }
            }
        }
        #[cfg(feature = "drni")]
        if agg.change_drni_solo {
            agg.change_drni_solo = false;
            agg.actor_oper_system = agg.drni_system;
            agg.oper_key = agg.drni_key;
            debug!(
                "{}: portal identity -> {} key {:#x}",
                agg.index, agg.drni_system, agg.drni_key
            );
            for port in ports.iter_mut() {
                if port.actor_admin_key != agg.admin_key {
                    continue;
                }
                port.actor_oper_system = agg.drni_system;
                port.actor_oper_key = agg.drni_key;
                port.ntt = true;
                force_unselected(port, ctx);
            }
        }
    }
}

/// Runs one selection pass over every port.
pub(crate) fn run_selection(ports: &mut [AggPort], aggs: &mut [Aggregator], ctx: &LagContext) {
    detect_port_moves(ports);

    // An aggregator nothing selects reverts to no LAG; the next claimant
    // records a fresh partner on it.
    let mut in_use = vec![false; aggs.len()];
    for port in ports.iter() {
        if port.selected == Selected::Selected {
            if let Some(agg) = port.aggregator {
                in_use[agg.0] = true;
            }
        }
    }
    for (agg, used) in aggs.iter_mut().zip(in_use.iter()) {
        if !used {
            agg.partner_system = SystemId::ZERO;
            agg.partner_oper_key = 0;
            agg.individual = false;
        }
    }

    for i in 0..ports.len() {
        // Rebinding an attached port waits for the Mux machine to detach.
        if ports[i].selected == Selected::Selected || ports[i].actor_attached {
            continue;
        }
        select_port(i, ports, aggs, &mut in_use, ctx);
    }

    update_ready(ports, aggs);
    release_wtr_holds(ports, aggs);
}

/// Scans the aggregators for port `i` and binds or parks it.
fn select_port(
    i: usize,
    ports: &mut [AggPort],
    aggs: &mut [Aggregator],
    in_use: &mut [bool],
    ctx: &LagContext,
) {
    let mut chosen = None;
    let mut claim = false;
    let mut standby = None;

    // A live LAG with this port's LAG ID takes precedence.
    for (a, agg) in aggs.iter().enumerate() {
        if !eligible(&ports[i], agg) || !in_use[a] {
            continue;
        }
        if lag_id_matches(&ports[i], agg) {
            if joinable(i, ports, agg) {
                chosen = Some(a);
                break;
            }
            if standby.is_none() {
                standby = Some(a);
            }
        }
    }

    // Otherwise claim the first free aggregator this port may take.
    if chosen.is_none() && standby.is_none() {
        for (a, agg) in aggs.iter().enumerate() {
            if in_use[a] || !eligible(&ports[i], agg) {
                continue;
            }
            if restriction_allows(&ports[i], agg) {
                chosen = Some(a);
                claim = true;
                break;
            }
            if standby.is_none() {
                standby = Some(a);
            }
        }
    }

    let port = &mut ports[i];
    if let Some(a) = chosen {
        if claim {
            aggs[a].partner_system = port.partner_oper_system;
            aggs[a].partner_oper_key = port.partner_oper_key;
            aggs[a].individual = port.is_individual();
        }
        in_use[a] = true;
        let agg = aggs[a].index;
        if port.selected != Selected::Selected || port.aggregator != Some(agg) {
            port.selected = Selected::Selected;
            port.aggregator = Some(agg);
            trace!("{}: selected {}", port.index, agg);
            ctx.notify(LagEvent::SelectionChanged {
                port: port.index,
                aggregator: Some(agg),
                selected: Selected::Selected,
            });
        }
    } else if let Some(a) = standby {
        let agg = aggs[a].index;
        if port.selected != Selected::Standby || port.aggregator != Some(agg) {
            port.selected = Selected::Standby;
            port.aggregator = Some(agg);
            trace!("{}: standby for {}", port.index, agg);
            ctx.notify(LagEvent::SelectionChanged {
                port: port.index,
                aggregator: Some(agg),
                selected: Selected::Standby,
            });
        }
    } else {
        force_unselected(port, ctx);
    }
}

/// Oper keys and oper systems both match; same device, same LAG key.
fn eligible(port: &AggPort, agg: &Aggregator) -> bool {
    port.actor_oper_key == agg.oper_key && port.actor_oper_system == agg.actor_oper_system
}

/// The LAG formed on the aggregator is the one this port belongs to.
/// Individuality is part of the identity: a solitary individual link never
/// matches an aggregatable LAG, and vice versa.
fn lag_id_matches(port: &AggPort, agg: &Aggregator) -> bool {
    agg.partner_system == port.partner_oper_system
        && agg.partner_oper_key == port.partner_oper_key
        && agg.individual == port.is_individual()
}

/// The port may join this in-use aggregator right now.
fn joinable(i: usize, ports: &[AggPort], agg: &Aggregator) -> bool {
    // One individual port owns its aggregator outright.
    if agg.individual || ports[i].is_individual() {
        return false;
    }
    if !restriction_allows(&ports[i], agg) {
        return false;
    }
    // Never two attached ports with the same partner (system, port).
    ports.iter().enumerate().all(|(j, other)| {
        j == i
            || other.selected != Selected::Selected
            || other.aggregator != Some(agg.index)
            || other.partner_oper_system != ports[i].partner_oper_system
            || other.partner_oper_port != ports[i].partner_oper_port
    })
}

/// The relay's partner restriction, when set, pins the partner identity
/// every member port must report.
#[cfg(feature = "drni")]
fn restriction_allows(port: &AggPort, agg: &Aggregator) -> bool {
    match agg.drni_partner_restriction {
        Some((system, key)) if !system.is_zero() => {
            port.partner_oper_system == system && port.partner_oper_key == key
        }
        _ => true,
    }
}

#[cfg(not(feature = "drni"))]
fn restriction_allows(_port: &AggPort, _agg: &Aggregator) -> bool {
    true
}

fn force_unselected(port: &mut AggPort, ctx: &LagContext) {
    if port.selected != Selected::Unselected {
        port.selected = Selected::Unselected;
        trace!("{}: unselected", port.index);
        ctx.notify(LagEvent::SelectionChanged {
            port: port.index,
            aggregator: None,
            selected: Selected::Unselected,
        });
    }
}

/// Raises `port_moved` on any non-operational port whose recorded partner
/// just surfaced on another port, so its Receive machine reinitializes
/// instead of waiting out the full default timeout.
fn detect_port_moves(ports: &mut [AggPort]) {
    for i in 0..ports.len() {
        if !ports[i].new_partner {
            continue;
        }
        ports[i].new_partner = false;
        let system = ports[i].partner_oper_system;
        let partner_port = ports[i].partner_oper_port;
        if system.is_zero() {
            continue;
        }
        for j in 0..ports.len() {
            if j == i || ports[j].port_operational {
                continue;
            }
            if ports[j].partner_oper_system == system && ports[j].partner_oper_port == partner_port
            {
                debug!(
                    "{}: partner moved here from {}",
                    ports[i].index, ports[j].index
                );
                ports[j].port_moved = true;
            }
        }
    }
}

/// Drops the wait-to-restore hold on every port of an aggregator that has
/// no distributing link left. A non-revertive hold has no timer release,
/// so this is the path that lets the last surviving link back in.
fn release_wtr_holds(ports: &mut [AggPort], aggs: &[Aggregator]) {
    for agg in aggs.iter() {
        let any_active = ports
            .iter()
            .any(|p| p.aggregator == Some(agg.index) && p.actor_oper_state.distributing);
        if any_active {
            continue;
        }
        for port in ports.iter_mut() {
            if port.aggregator == Some(agg.index) && port.wtr_waiting {
                debug!("{}: wait-to-restore released, no active link", port.index);
                port.wtr_waiting = false;
                port.wtr_timer = 0;
            }
        }
    }
}

/// Sets `ready` on every waiting port of an aggregator once all of them
/// report `ready_n`, so the whole group attaches in one cycle.
fn update_ready(ports: &mut [AggPort], aggs: &[Aggregator]) {
    for agg in aggs.iter() {
        let mut ready = true;
        let mut any_waiting = false;
        for port in ports.iter() {
            if port.aggregator == Some(agg.index) && port.mux_state == MuxSmState::Waiting {
                any_waiting = true;
                ready &= port.ready_n;
            }
        }
        if !any_waiting {
            continue;
        }
        for port in ports.iter_mut() {
            if port.aggregator == Some(agg.index) && port.mux_state == MuxSmState::Waiting {
                port.ready = ready;
            }
        }
    }
}
