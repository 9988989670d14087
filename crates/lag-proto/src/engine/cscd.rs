//! Conversation-sensitive collecting and distributing.
//!
//! Runs once per cycle after the port machines. Each aggregator's
//! distribution parameters flow in two directions: the administered
//! algorithm and digests copy down to every attached port for
//! advertisement, and the partner's advertised values roll up from the
//! ports for comparison. Agreement gates `oper_dwc`; the set of
//! distributing links drives the conversation-to-link assignment and the
//! three masks that filter every data frame in [`collect_frame`] and
//! [`distribute_frame`].

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::{debug, trace};

use lag_types::{
    ConversationId, Digest, LagAlgorithm, LinkNumber, MacAddress, CONVERSATION_ID_COUNT,
};

use crate::aggregator::{Aggregator, ConvLinkMap};
use crate::observer::{LagContext, LagEvent};
use crate::pdu::{push_bounded, Frame, Sdu};
use crate::port::{partner_decides_link_number, AggPort, Selected};
use crate::PortIndex;

/// Refreshes every aggregator's distribution state.
pub(crate) fn update(ports: &mut [AggPort], aggs: &mut [Aggregator], ctx: &LagContext) {
    for agg in aggs.iter_mut() {
        let dist_changed = update_actor_distribution(agg, ports);
        let partner_changed = update_partner_distribution(agg, ports);
        let compare_changed =
            (dist_changed || partner_changed) && compare_distribution(agg);
        push_dwc(agg, ports);
        update_link_numbers(agg, ports);
        update_active_links(agg, ports, ctx, dist_changed);
        #[cfg(feature = "drni")]
        if compare_changed || dist_changed {
            agg.change_relay_agg_state = true;
        }
        #[cfg(not(feature = "drni"))]
        let _ = compare_changed;
    }
    for port in ports.iter_mut() {
        port.change_actor_distributing = false;
    }
}

/// Recomputes each aggregator's operational status from its members.
pub(crate) fn update_aggregator_status(
    ports: &[AggPort],
    aggs: &mut [Aggregator],
    ctx: &LagContext,
) {
    for agg in aggs.iter_mut() {
        let operational = agg
            .lag_ports
            .iter()
            .any(|&member| ports[member.0].actor_oper_state.distributing);
        if operational != agg.operational {
            agg.operational = operational;
            debug!("{}: {}", agg.index, if operational { "up" } else { "down" });
            ctx.notify(LagEvent::AggregatorOperationalChanged {
                aggregator: agg.index,
                operational,
            });
        }
    }
}

/// Copies the administered algorithm and digests to every attached port.
/// Returns true when a distribution parameter changed this cycle.
fn update_actor_distribution(agg: &mut Aggregator, ports: &mut [AggPort]) -> bool {
    let changed = agg.change_dist_alg;
    if changed {
        agg.change_dist_alg = false;
        agg.refresh_digests();
    }
    for &member in &agg.lag_ports {
        let port = &mut ports[member.0];
        if port.actor_algorithm != agg.actor_algorithm
            || port.actor_link_digest != agg.link_digest
            || port.actor_service_digest != agg.service_digest
        {
            port.actor_algorithm = agg.actor_algorithm;
            port.actor_link_digest = agg.link_digest;
            port.actor_service_digest = agg.service_digest;
            port.ntt = true;
        }
    }
    changed
}

/// Rolls the partner's advertised distribution parameters up from the
/// attached ports; the first port speaks for the LAG and defaulted ports
/// carry their administrative defaults. Returns true on change.
fn update_partner_distribution(agg: &mut Aggregator, ports: &mut [AggPort]) -> bool {
    let (algorithm, link_digest, service_digest) = match agg.lag_ports.first() {
        Some(&member) => {
            let port = &ports[member.0];
            (
                port.partner_algorithm,
                port.partner_link_digest,
                port.partner_service_digest,
            )
        }
        None => (LagAlgorithm::NONE, Digest::ZERO, Digest::ZERO),
    };
    for &member in &agg.lag_ports {
        ports[member.0].change_partner_dist_alg = false;
    }
    let changed = algorithm != agg.partner_algorithm
        || link_digest != agg.partner_link_digest
        || service_digest != agg.partner_service_digest;
    if changed {
        agg.partner_algorithm = algorithm;
        agg.partner_link_digest = link_digest;
        agg.partner_service_digest = service_digest;
    }
    changed
}

/// Rechecks actor/partner agreement and derives `oper_dwc`. Returns true
/// when any of the comparison outcomes moved.
fn compare_distribution(agg: &mut Aggregator) -> bool {
    // With no administered algorithm, or a partner that advertises none,
    // there is nothing to agree on.
    let unusable =
        agg.actor_algorithm.is_unspecified() || agg.partner_algorithm == LagAlgorithm::NONE;
    let algorithm_differs = unusable || agg.actor_algorithm != agg.partner_algorithm;
    let link_differs = unusable || agg.link_digest != agg.partner_link_digest;
    let service_differs = unusable || agg.service_digest != agg.partner_service_digest;
    let oper_dwc = agg.admin_dwc && !algorithm_differs && !link_differs && !service_differs;

    let changed = algorithm_differs != agg.partner_algorithm_differs
        || link_differs != agg.partner_link_digest_differs
        || service_differs != agg.partner_service_digest_differs
        || oper_dwc != agg.oper_dwc;
    if changed {
        agg.partner_algorithm_differs = algorithm_differs;
        agg.partner_link_digest_differs = link_differs;
        agg.partner_service_digest_differs = service_differs;
        agg.oper_dwc = oper_dwc;
        debug!(
            "{}: distribution agreement alg={} link={} service={} dwc={}",
            agg.index, !algorithm_differs, !link_differs, !service_differs, oper_dwc
        );
    }
    changed
}

fn push_dwc(agg: &Aggregator, ports: &mut [AggPort]) {
    for &member in &agg.lag_ports {
        ports[member.0].actor_dwc = agg.oper_dwc;
    }
}

/// Settles each attached port's oper link number. The numerically lower
/// system owns link numbering; a defaulted or version-1 partner leaves the
/// administered number in force.
fn update_link_numbers(agg: &mut Aggregator, ports: &mut [AggPort]) {
    for &member in &agg.lag_ports {
        let port = &mut ports[member.0];
        let desired = if port.actor_oper_state.defaulted
            || port.partner_lacp_version < 2
            || !partner_decides_link_number(port)
            || port.partner_link_number == 0
        {
            port.admin_link_number
        } else {
            port.partner_link_number
        };
        if desired != port.oper_link_number {
            trace!(
                "{}: link number {} -> {}",
                port.index,
                port.oper_link_number,
                desired
            );
            port.oper_link_number = desired;
            if port.actor_oper_state.collecting && port.selected == Selected::Selected {
                agg.change_link_state = true;
            } else if port.actor_oper_state.sync {
                port.ntt = true;
            }
        }
        port.change_port_link_state = false;
    }
}

/// Rebuilds the active link list from the distributing members and, when
/// it (or an administered parameter) moved, the conversation vectors and
/// masks derived from it.
fn update_active_links(
    agg: &mut Aggregator,
    ports: &mut [AggPort],
    ctx: &LagContext,
    dist_changed: bool,
) {
    let links: Vec<LinkNumber> = agg
        .lag_ports
        .iter()
        .map(|&member| &ports[member.0])
        .filter(|port| port.actor_oper_state.distributing && port.oper_link_number != 0)
        .map(|port| port.oper_link_number)
        .sorted_unstable()
        .dedup()
        .collect();

    let links_changed = links != agg.active_lag_links;
    let renumbered = agg.change_link_state;
    agg.change_link_state = false;
    if links_changed {
        debug!(
            "{}: active links {:?} -> {:?}",
            agg.index, agg.active_lag_links, links
        );
        agg.active_lag_links = links;
        ctx.notify(LagEvent::ActiveLinksChanged {
            aggregator: agg.index,
            links: agg.active_lag_links.clone(),
        });
    }
    if links_changed || renumbered {
        #[cfg(feature = "drni")]
        {
            agg.change_relay_agg_state = true;
        }
    }
    if links_changed || renumbered || dist_changed {
        refresh_conversation_vectors(agg, ports);
    }
}

fn refresh_conversation_vectors(agg: &mut Aggregator, ports: &[AggPort]) {
    agg.conversation_link_vector = conversation_link_vector(agg, &agg.active_lag_links);

    let mut port_by_link: BTreeMap<LinkNumber, PortIndex> = BTreeMap::new();
    for &member in &agg.lag_ports {
        let port = &ports[member.0];
        if port.actor_oper_state.distributing && port.oper_link_number != 0 {
            port_by_link.entry(port.oper_link_number).or_insert(member);
        }
    }

    agg.operational_mask.clear_all();
    agg.collection_mask.clear_all();
    agg.distribution_mask.clear_all();
    for cid in 0..CONVERSATION_ID_COUNT {
        let link = agg.conversation_link_vector[cid];
        let owner = if link == 0 {
            None
        } else {
            port_by_link.get(&link).copied()
        };
        agg.conversation_port_vector[cid] = owner;
        if let Some(member) = owner {
            let state = ports[member.0].actor_oper_state;
            agg.operational_mask.set(cid as ConversationId, true);
            agg.collection_mask.set(cid as ConversationId, state.collecting);
            agg.distribution_mask.set(cid as ConversationId, state.distributing);
        }
    }
    trace!(
        "{}: conversation vectors rebuilt, {} conversations carried",
        agg.index,
        agg.operational_mask.count_ones()
    );
}

/// Assigns every conversation ID to one of `links` (0 = none) under the
/// aggregator's link map. `links` must be sorted ascending; the relay
/// reuses this over the merged home+neighbor list, where a link number
/// present on both systems appears twice and widens the spread.
pub(crate) fn conversation_link_vector(
    agg: &Aggregator,
    links: &[LinkNumber],
) -> Vec<LinkNumber> {
    let mut vector = vec![0; CONVERSATION_ID_COUNT];
    if links.is_empty() {
        return vector;
    }
    match agg.conv_link_map {
        ConvLinkMap::EvenOdd => {
            for (cid, slot) in vector.iter_mut().enumerate() {
                *slot = links[cid % links.len()];
            }
        }
        ConvLinkMap::ActiveStandby => {
            vector.fill(links[0]);
        }
        ConvLinkMap::EightLinkSpread => {
            let spread = links.len().min(8);
            for (cid, slot) in vector.iter_mut().enumerate() {
                *slot = links[(cid & 0x7) % spread];
            }
        }
        ConvLinkMap::AdminTable => {
            for (cid, entries) in &agg.admin_link_map {
                let chosen = entries
                    .iter()
                    .copied()
                    .find(|entry| links.contains(entry))
                    .unwrap_or(0);
                vector[(*cid as usize) % CONVERSATION_ID_COUNT] = chosen;
            }
        }
    }
    vector
}

/// Classifies a frame into a conversation ID under `algorithm`.
pub(crate) fn frame_conversation_id(
    algorithm: LagAlgorithm,
    service_map: &BTreeMap<u32, ConversationId>,
    frame: &Frame,
) -> ConversationId {
    if algorithm == LagAlgorithm::C_VID || algorithm == LagAlgorithm::S_VID {
        match &frame.sdu {
            Sdu::Data(data) => data.vlan_id & 0x0fff,
            _ => 0,
        }
    } else if algorithm.uses_service_map() {
        match &frame.sdu {
            Sdu::Data(data) => match data.service_id {
                Some(service) => service_map
                    .get(&service)
                    .copied()
                    .unwrap_or((service & 0x0fff) as ConversationId),
                None => 0,
            },
            _ => 0,
        }
    } else {
        mac_addr_hash(frame.dst, frame.src)
    }
}

/// Folds both addresses into the 12-bit conversation space.
fn mac_addr_hash(dst: MacAddress, src: MacAddress) -> ConversationId {
    let mut sum: u64 = 0;
    for addr in [dst.to_u64(), src.to_u64()] {
        sum += addr & 0xfff;
        sum += (addr >> 12) & 0xfff;
        sum += (addr >> 24) & 0xfff;
        sum += (addr >> 36) & 0xfff;
    }
    (sum & 0xfff) as ConversationId
}

/// Runs the collection filter on a data frame received on `port` and, if
/// it passes, queues the frame for the aggregator client.
pub(crate) fn collect_frame(agg: &mut Aggregator, port: &mut AggPort, frame: Frame) {
    if !port.actor_oper_state.collecting {
        port.stats.frames_discarded += 1;
        return;
    }
    let cid = frame_conversation_id(agg.actor_algorithm, &agg.service_map, &frame);
    let right_link = agg.collection_mask.get(cid)
        && agg.conversation_port_vector[cid as usize] == Some(port.index);
    if !right_link && agg.oper_dwc {
        trace!("{}: discarded conversation {} from {}", agg.index, cid, port.index);
        port.stats.frames_discarded += 1;
        agg.stats.discarded_wrong_conversation += 1;
        return;
    }
    port.stats.frames_collected += 1;
    if push_bounded(&mut agg.collected, frame) {
        agg.stats.frames_collected += 1;
    } else {
        agg.stats.client_queue_drops += 1;
    }
}

/// Steers one client frame to the member link assigned to its
/// conversation ID.
pub(crate) fn distribute_frame(agg: &mut Aggregator, ports: &mut [AggPort], frame: Frame) {
    let cid = frame_conversation_id(agg.actor_algorithm, &agg.service_map, &frame);
    let member = match agg.conversation_port_vector[cid as usize] {
        Some(member) if agg.distribution_mask.get(cid) => member,
        _ => {
            agg.stats.discarded_no_link += 1;
            return;
        }
    };
    let port = &mut ports[member.0];
    if !port.actor_oper_state.distributing {
        agg.stats.discarded_no_link += 1;
        return;
    }
    port.link.send(frame);
    agg.stats.frames_distributed += 1;
}
