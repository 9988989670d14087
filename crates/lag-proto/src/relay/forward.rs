//! Frame relay between gateway, aggregator and intra-relay port.
//!
//! Every data frame is classified twice: once under the gateway algorithm
//! to pick which portal system owns its conversation's gateway, and once
//! under the port algorithm to pick which system's links carry it. The
//! four relay masks then route the frame up (toward the gateway), down
//! (toward the aggregator) or across the IRP, and everything else is
//! discarded so a conversation never reaches the distributed relay twice.

use lag_types::ConversationId;

use crate::aggregator::Aggregator;
use crate::engine::cscd;
use crate::pdu::{push_bounded, Frame};

use super::types::DistributedRelay;

/// Drains the intra-relay port. DRCPDUs park in the Receive slot; data
/// frames cross over to whichever side of the portal owns them.
pub(crate) fn poll_irp(relay: &mut DistributedRelay, agg: &mut Aggregator) {
    loop {
        let frame = match relay.irp.as_mut() {
            Some(irp) => irp.poll(),
            None => None,
        };
        let Some(frame) = frame else { break };

        if frame.dst == relay.drcp_destination {
            if let Some(pdu) = frame.as_drcp() {
                relay.stats.drcpdu_rx += 1;
                relay.rx_drcpdu = Some(pdu.clone());
                continue;
            }
        }
        if !frame.is_data() {
            // Control PDUs of any other protocol are not ours to parse.
            continue;
        }

        let (gw_cid, port_cid) = classify(relay, agg, &frame);
        let home_gw = relay.home_gateway_mask.get(gw_cid);
        let nbor_gw = relay.nbor_gateway_mask.get(gw_cid);
        if !home_gw && nbor_gw {
            // Entered the portal at the neighbor's gateway; exits on one
            // of this system's links.
            if !push_bounded(&mut agg.egress, frame) {
                agg.stats.client_queue_drops += 1;
            }
        } else if home_gw
            && !nbor_gw
            && (relay.nbor_aggregator_mask.get(port_cid) || !agg.oper_dwc)
        {
            // Collected on the neighbor's links; this system's gateway
            // hands it up.
            if !push_bounded(&mut relay.indications, frame) {
                relay.stats.gateway_queue_drops += 1;
            }
        } else {
            relay.stats.frames_discarded += 1;
        }
    }
}

/// Routes down frames queued by the gateway client.
pub(crate) fn relay_down(relay: &mut DistributedRelay, agg: &mut Aggregator) {
    if !relay.dr_operational {
        let stranded = relay.requests.len() as u64;
        if stranded > 0 {
            relay.stats.requests_flushed += stranded;
            relay.requests.clear();
        }
        return;
    }
    while let Some(frame) = relay.requests.pop_front() {
        let (gw_cid, port_cid) = classify(relay, agg, &frame);
        if !relay.home_gateway_mask.get(gw_cid) || relay.nbor_gateway_mask.get(gw_cid) {
            // This system is not the gateway for the conversation.
            relay.stats.frames_discarded += 1;
            continue;
        }
        if relay.home_aggregator_mask.get(port_cid) && agg.operational {
            if !push_bounded(&mut agg.egress, frame) {
                agg.stats.client_queue_drops += 1;
            }
        } else if !relay.home_aggregator_mask.get(port_cid)
            && relay.nbor_aggregator_mask.get(port_cid)
            && relay.home_irp_state.irc_data
        {
            // The neighbor's links carry this conversation.
            if let Some(irp) = relay.irp.as_mut() {
                irp.send(frame);
            }
        } else {
            relay.stats.frames_discarded += 1;
        }
    }
}

/// Routes up frames collected by this system's aggregator.
pub(crate) fn relay_up(relay: &mut DistributedRelay, agg: &mut Aggregator) {
    while let Some(frame) = agg.collected.pop_front() {
        let (gw_cid, port_cid) = classify(relay, agg, &frame);
        if !relay.home_aggregator_mask.get(port_cid) && agg.oper_dwc {
            relay.stats.frames_discarded += 1;
            continue;
        }
        let home_gw = relay.home_gateway_mask.get(gw_cid);
        let nbor_gw = relay.nbor_gateway_mask.get(gw_cid);
        if home_gw && !nbor_gw {
            if !push_bounded(&mut relay.indications, frame) {
                relay.stats.gateway_queue_drops += 1;
            }
        } else if !home_gw && nbor_gw && relay.home_irp_state.irc_data {
            if let Some(irp) = relay.irp.as_mut() {
                irp.send(frame);
            }
        } else {
            relay.stats.frames_discarded += 1;
        }
    }
}

/// Single-system operation without an IRP: the relay degenerates to a
/// transparent sublayer between gateway and aggregator.
pub(crate) fn run_transparent(relay: &mut DistributedRelay, agg: &mut Aggregator) {
    if !relay.dr_operational {
        let stranded = relay.requests.len() as u64;
        if stranded > 0 {
            relay.stats.requests_flushed += stranded;
            relay.requests.clear();
        }
    }
    while let Some(frame) = relay.requests.pop_front() {
        if agg.operational {
            if !push_bounded(&mut agg.egress, frame) {
                agg.stats.client_queue_drops += 1;
            }
        } else {
            relay.stats.frames_discarded += 1;
        }
    }
    while let Some(frame) = agg.collected.pop_front() {
        if !push_bounded(&mut relay.indications, frame) {
            relay.stats.gateway_queue_drops += 1;
        }
    }
    relay.dr_operational = agg.operational;
}

fn classify(
    relay: &DistributedRelay,
    agg: &Aggregator,
    frame: &Frame,
) -> (ConversationId, ConversationId) {
    let gw_cid =
        cscd::frame_conversation_id(relay.home_gw_state.algorithm, &agg.service_map, frame);
    let port_cid = cscd::frame_conversation_id(agg.actor_algorithm, &agg.service_map, frame);
    (gw_cid, port_cid)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lag_types::{LagAlgorithm, MacAddress, SystemId};

    use crate::aggregator::AggregatorConfig;
    use crate::pdu::Drcpdu;
    use crate::port::testlink::{TestLink, TestLinkHandle};
    use crate::relay::RelayConfig;
    use crate::{AggIndex, RelayIndex};

    use super::*;

    const HOME: u64 = 0x0001_0000_0000_0010;

    fn fixture() -> (DistributedRelay, Aggregator, TestLinkHandle) {
        let (link, handle) = TestLink::up();
        let mut relay = DistributedRelay::new(
            RelayIndex(0),
            AggIndex(0),
            RelayConfig::default(),
            Some(Box::new(link)),
        );
        relay.home_gw_state.algorithm = LagAlgorithm::C_VID;
        let mut agg = Aggregator::new(
            AggIndex(0),
            AggregatorConfig::new(SystemId::from_u64(HOME), 1, 0x100),
        );
        agg.actor_algorithm = LagAlgorithm::C_VID;
        (relay, agg, handle)
    }

    fn vlan_frame(vlan: u16) -> Frame {
        Frame::data(
            MacAddress::new([0, 0, 0, 0, 0, 0x99]),
            MacAddress::new([0, 0, 0, 0, 0, 0x98]),
            vlan,
        )
    }

    #[test]
    fn test_drcpdu_parked_for_receive_machine() {
        let (mut relay, mut agg, handle) = fixture();
        let src = MacAddress::new([0, 0, 0, 0, 0, 2]);
        handle.inject(Frame::drcp(relay.drcp_destination, src, Drcpdu::default()));

        poll_irp(&mut relay, &mut agg);
        assert!(relay.rx_drcpdu.is_some());
        assert_eq!(relay.stats.drcpdu_rx, 1);
        assert!(agg.egress.is_empty());
    }

    #[test]
    fn test_irp_down_frame_exits_on_home_links() {
        let (mut relay, mut agg, handle) = fixture();
        relay.nbor_gateway_mask.set(7, true);
        handle.inject(vlan_frame(7));

        poll_irp(&mut relay, &mut agg);
        assert_eq!(agg.egress.len(), 1);
        assert!(relay.indications.is_empty());
    }

    #[test]
    fn test_irp_up_frame_rises_to_gateway() {
        let (mut relay, mut agg, handle) = fixture();
        relay.home_gateway_mask.set(7, true);
        relay.nbor_aggregator_mask.set(7, true);
        handle.inject(vlan_frame(7));

        poll_irp(&mut relay, &mut agg);
        assert_eq!(relay.indications.len(), 1);
        assert!(agg.egress.is_empty());
    }

    #[test]
    fn test_irp_up_frame_respects_dwc() {
        let (mut relay, mut agg, handle) = fixture();
        relay.home_gateway_mask.set(7, true);
        agg.oper_dwc = true;
        handle.inject(vlan_frame(7));

        // The neighbor's links do not carry conversation 7, so a strict
        // portal refuses the frame.
        poll_irp(&mut relay, &mut agg);
        assert!(relay.indications.is_empty());
        assert_eq!(relay.stats.frames_discarded, 1);

        agg.oper_dwc = false;
        handle.inject(vlan_frame(7));
        poll_irp(&mut relay, &mut agg);
        assert_eq!(relay.indications.len(), 1);
    }

    #[test]
    fn test_unowned_conversation_discarded() {
        let (mut relay, mut agg, handle) = fixture();
        handle.inject(vlan_frame(7));

        poll_irp(&mut relay, &mut agg);
        assert_eq!(relay.stats.frames_discarded, 1);
        assert!(agg.egress.is_empty());
        assert!(relay.indications.is_empty());
    }

    #[test]
    fn test_down_request_to_home_aggregator() {
        let (mut relay, mut agg, _handle) = fixture();
        relay.dr_operational = true;
        relay.home_gateway_mask.set(7, true);
        relay.home_aggregator_mask.set(7, true);
        agg.operational = true;
        relay.requests.push_back(vlan_frame(7));

        relay_down(&mut relay, &mut agg);
        assert_eq!(agg.egress.len(), 1);
    }

    #[test]
    fn test_down_request_crosses_irp_to_neighbor_links() {
        let (mut relay, mut agg, handle) = fixture();
        relay.dr_operational = true;
        relay.home_gateway_mask.set(7, true);
        relay.nbor_aggregator_mask.set(7, true);
        relay.home_irp_state.irc_data = true;
        relay.requests.push_back(vlan_frame(7));

        relay_down(&mut relay, &mut agg);
        assert!(agg.egress.is_empty());
        assert_eq!(handle.take_sent().len(), 1);
    }

    #[test]
    fn test_down_request_needs_usable_irc() {
        let (mut relay, mut agg, handle) = fixture();
        relay.dr_operational = true;
        relay.home_gateway_mask.set(7, true);
        relay.nbor_aggregator_mask.set(7, true);
        relay.home_irp_state.irc_data = false;
        relay.requests.push_back(vlan_frame(7));

        relay_down(&mut relay, &mut agg);
        assert!(handle.take_sent().is_empty());
        assert_eq!(relay.stats.frames_discarded, 1);
    }

    #[test]
    fn test_down_request_blocked_by_closed_gateway() {
        let (mut relay, mut agg, _handle) = fixture();
        relay.dr_operational = true;
        relay.requests.push_back(vlan_frame(7));

        relay_down(&mut relay, &mut agg);
        assert_eq!(relay.stats.frames_discarded, 1);
    }

    #[test]
    fn test_requests_flushed_while_relay_down() {
        let (mut relay, mut agg, _handle) = fixture();
        relay.requests.push_back(vlan_frame(1));
        relay.requests.push_back(vlan_frame(2));

        relay_down(&mut relay, &mut agg);
        assert!(relay.requests.is_empty());
        assert_eq!(relay.stats.requests_flushed, 2);
    }

    #[test]
    fn test_up_frame_to_gateway() {
        let (mut relay, mut agg, _handle) = fixture();
        relay.home_gateway_mask.set(7, true);
        agg.collected.push_back(vlan_frame(7));

        relay_up(&mut relay, &mut agg);
        assert_eq!(relay.indications.len(), 1);
    }

    #[test]
    fn test_up_frame_crosses_irp_to_neighbor_gateway() {
        let (mut relay, mut agg, handle) = fixture();
        relay.nbor_gateway_mask.set(7, true);
        relay.home_irp_state.irc_data = true;
        agg.collected.push_back(vlan_frame(7));

        relay_up(&mut relay, &mut agg);
        assert!(relay.indications.is_empty());
        assert_eq!(handle.take_sent().len(), 1);
    }

    #[test]
    fn test_up_frame_respects_dwc() {
        let (mut relay, mut agg, _handle) = fixture();
        relay.home_gateway_mask.set(7, true);
        agg.oper_dwc = true;
        agg.collected.push_back(vlan_frame(7));

        relay_up(&mut relay, &mut agg);
        assert!(relay.indications.is_empty());
        assert_eq!(relay.stats.frames_discarded, 1);
    }

    #[test]
    fn test_transparent_round_trip() {
        let mut relay = DistributedRelay::new(
            RelayIndex(0),
            AggIndex(0),
            RelayConfig::default(),
            None,
        );
        let mut agg = Aggregator::new(
            AggIndex(0),
            AggregatorConfig::new(SystemId::from_u64(HOME), 1, 0x100),
        );
        agg.operational = true;

        // The relay starts non-operational, so the first pass flushes.
        relay.requests.push_back(vlan_frame(1));
        run_transparent(&mut relay, &mut agg);
        assert_eq!(relay.stats.requests_flushed, 1);
        assert!(relay.dr_operational);

        relay.requests.push_back(vlan_frame(2));
        agg.collected.push_back(vlan_frame(3));
        run_transparent(&mut relay, &mut agg);
        assert_eq!(agg.egress.len(), 1);
        assert_eq!(relay.indications.len(), 1);
    }
}
