//! The protocol engine: entity arenas, scheduling, and management surface.
//!
//! [`LinkAgg`] owns every port, aggregator and relay in index-addressed
//! arenas and steps them in a fixed order, once per call to [`run`]:
//!
//! 1. inbound frames (LACPDUs to the Receive slot, data to collection)
//! 2. administrative aggregator changes, then selection
//! 3. Receive, Periodic and Mux machines per port
//! 4. conversation-sensitive distribution state, then aggregator status
//! 5. client frame distribution
//! 6. Transmit machine per port
//! 7. distributed relays (frame relay, DRCP Rx, gateway/aggregator
//!    machine, DRCP Tx, relay status)
//!
//! Timers advance only in [`timer_tick`]; with the same tick and frame
//! sequence two engines always land in the same state. Entities signal
//! each other through flags read in the next cycle, so no step reenters
//! another.
//!
//! [`run`]: LinkAgg::run
//! [`timer_tick`]: LinkAgg::timer_tick

pub(crate) mod cscd;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace};

use lag_types::{ConversationId, LinkNumber, CONVERSATION_ID_COUNT};

use crate::aggregator::{
    admin_aggregator_update, run_selection, Aggregator, AggregatorConfig,
};
use crate::error::LagError;
use crate::link::LinkService;
use crate::observer::{LagContext, LagObserver};
use crate::pdu::{push_bounded, Frame, Sdu};
use crate::port::{self, AggPort, PortConfig};
#[cfg(feature = "drni")]
use crate::relay::{self, DistributedRelay, RelayConfig};
#[cfg(feature = "drni")]
use crate::RelayIndex;
use crate::{AggIndex, PortIndex};

/// The link-aggregation engine.
pub struct LinkAgg {
    ports: Vec<AggPort>,
    aggregators: Vec<Aggregator>,
    #[cfg(feature = "drni")]
    relays: Vec<DistributedRelay>,
    ctx: LagContext,
}

impl LinkAgg {
    /// Creates an engine with no entities and no observer.
    pub fn new() -> Self {
        Self::with_observer(Arc::new(crate::observer::NullObserver))
    }

    /// Creates an engine reporting state changes to `observer`.
    pub fn with_observer(observer: Arc<dyn LagObserver>) -> Self {
        Self {
            ports: Vec::new(),
            aggregators: Vec::new(),
            #[cfg(feature = "drni")]
            relays: Vec::new(),
            ctx: LagContext::new(observer),
        }
    }

    /// Adds an aggregation port bound to `link` and returns its handle.
    pub fn add_port(&mut self, config: PortConfig, link: Box<dyn LinkService>) -> PortIndex {
        let index = PortIndex(self.ports.len());
        debug!("{}: added (number {})", index, config.port_number);
        self.ports.push(AggPort::new(index, config, link));
        index
    }

    /// Adds an aggregator and returns its handle.
    pub fn add_aggregator(&mut self, config: AggregatorConfig) -> AggIndex {
        let index = AggIndex(self.aggregators.len());
        debug!("{}: added (key {:#06x})", index, config.admin_key);
        self.aggregators.push(Aggregator::new(index, config));
        index
    }

    /// Configures a distributed relay over `aggregator`, with `irp` as the
    /// intra-relay port toward the neighbor portal system (or `None` for
    /// transparent single-system operation).
    #[cfg(feature = "drni")]
    pub fn config_dist_relay(
        &mut self,
        aggregator: AggIndex,
        config: RelayConfig,
        irp: Option<Box<dyn LinkService>>,
    ) -> Result<RelayIndex, LagError> {
        let agg = self
            .aggregators
            .get_mut(aggregator.0)
            .ok_or(LagError::UnknownAggregator(aggregator))?;
        if agg.relay.is_some() {
            return Err(LagError::AggregatorInUse(aggregator));
        }
        let index = RelayIndex(self.relays.len());
        agg.relay = Some(index);
        debug!("{}: added over {}", index, aggregator);
        self.relays
            .push(DistributedRelay::new(index, aggregator, config, irp));
        Ok(index)
    }

    /// Immutable access to a port.
    pub fn port(&self, index: PortIndex) -> Result<&AggPort, LagError> {
        self.ports.get(index.0).ok_or(LagError::UnknownPort(index))
    }

    /// Mutable access to a port, for the management setters.
    pub fn port_mut(&mut self, index: PortIndex) -> Result<&mut AggPort, LagError> {
        self.ports
            .get_mut(index.0)
            .ok_or(LagError::UnknownPort(index))
    }

    /// Immutable access to an aggregator.
    pub fn aggregator(&self, index: AggIndex) -> Result<&Aggregator, LagError> {
        self.aggregators
            .get(index.0)
            .ok_or(LagError::UnknownAggregator(index))
    }

    /// Mutable access to an aggregator, for the management setters.
    pub fn aggregator_mut(&mut self, index: AggIndex) -> Result<&mut Aggregator, LagError> {
        self.aggregators
            .get_mut(index.0)
            .ok_or(LagError::UnknownAggregator(index))
    }

    /// Immutable access to a distributed relay.
    #[cfg(feature = "drni")]
    pub fn relay(&self, index: RelayIndex) -> Result<&DistributedRelay, LagError> {
        self.relays
            .get(index.0)
            .ok_or(LagError::UnknownRelay(index))
    }

    /// Mutable access to a distributed relay, for the management setters.
    #[cfg(feature = "drni")]
    pub fn relay_mut(&mut self, index: RelayIndex) -> Result<&mut DistributedRelay, LagError> {
        self.relays
            .get_mut(index.0)
            .ok_or(LagError::UnknownRelay(index))
    }

    /// Sets a port's admin link number; 0 is reserved for "no link".
    pub fn set_admin_link_number(
        &mut self,
        port: PortIndex,
        link: LinkNumber,
    ) -> Result<(), LagError> {
        if link == 0 {
            return Err(LagError::ReservedLinkNumber);
        }
        self.port_mut(port)?.set_admin_link_number(link);
        Ok(())
    }

    /// Replaces an aggregator's per-conversation link priority lists;
    /// every key must fall inside the 4096-entry conversation space.
    pub fn set_admin_link_map(
        &mut self,
        aggregator: AggIndex,
        map: BTreeMap<ConversationId, Vec<LinkNumber>>,
    ) -> Result<(), LagError> {
        if let Some(&cid) = map
            .keys()
            .find(|&&cid| usize::from(cid) >= CONVERSATION_ID_COUNT)
        {
            return Err(LagError::ConversationIdOutOfRange(cid));
        }
        self.aggregator_mut(aggregator)?.set_admin_link_map(map);
        Ok(())
    }

    /// Replaces an aggregator's service-to-conversation mapping; every
    /// mapped conversation ID must fall inside the 4096-entry space.
    pub fn set_service_map(
        &mut self,
        aggregator: AggIndex,
        map: BTreeMap<u32, ConversationId>,
    ) -> Result<(), LagError> {
        if let Some(&cid) = map
            .values()
            .find(|&&cid| usize::from(cid) >= CONVERSATION_ID_COUNT)
        {
            return Err(LagError::ConversationIdOutOfRange(cid));
        }
        self.aggregator_mut(aggregator)?.set_service_map(map);
        Ok(())
    }

    /// Ticks elapsed since the engine was created.
    pub fn tick(&self) -> u64 {
        self.ctx.tick
    }

    /// Advances every timer on every entity by one tick.
    pub fn timer_tick(&mut self) {
        self.ctx.tick += 1;
        for port in &mut self.ports {
            port.timer_tick();
        }
        #[cfg(feature = "drni")]
        for relay in &mut self.relays {
            relay.timer_tick();
        }
    }

    /// Runs one full cycle. With `single_step` each machine takes at most
    /// one transition, which the conformance tests use to walk state
    /// machines one edge at a time.
    pub fn run(&mut self, single_step: bool) {
        trace!("cycle start, tick {}", self.ctx.tick);
        self.process_inbound();
        admin_aggregator_update(&mut self.aggregators, &mut self.ports, &self.ctx);
        run_selection(&mut self.ports, &mut self.aggregators, &self.ctx);
        self.step_port_machines(single_step);
        cscd::update(&mut self.ports, &mut self.aggregators, &self.ctx);
        cscd::update_aggregator_status(&self.ports, &mut self.aggregators, &self.ctx);
        self.distribute_clients();
        for port in &mut self.ports {
            port::run_tx(port, &self.ctx, single_step);
        }
        #[cfg(feature = "drni")]
        self.run_relays(single_step);
    }

    /// Queues one client frame for distribution over `aggregator`.
    pub fn distribute(&mut self, aggregator: AggIndex, frame: Frame) -> Result<(), LagError> {
        let agg = self.aggregator_mut(aggregator)?;
        if !push_bounded(&mut agg.egress, frame) {
            agg.stats.client_queue_drops += 1;
        }
        Ok(())
    }

    /// Takes the next collected frame from `aggregator`, if any.
    pub fn collect(&mut self, aggregator: AggIndex) -> Result<Option<Frame>, LagError> {
        Ok(self.aggregator_mut(aggregator)?.collected.pop_front())
    }

    /// Queues one gateway frame for `relay` to distribute.
    #[cfg(feature = "drni")]
    pub fn gateway_request(&mut self, relay: RelayIndex, frame: Frame) -> Result<(), LagError> {
        let relay = self.relay_mut(relay)?;
        if !push_bounded(&mut relay.requests, frame) {
            relay.stats.gateway_queue_drops += 1;
        }
        Ok(())
    }

    /// Takes the next frame `relay` passed up to its gateway, if any.
    #[cfg(feature = "drni")]
    pub fn gateway_indication(&mut self, relay: RelayIndex) -> Result<Option<Frame>, LagError> {
        Ok(self.relay_mut(relay)?.indications.pop_front())
    }

    fn process_inbound(&mut self) {
        for port in &mut self.ports {
            while let Some(frame) = port.link.poll() {
                if frame.is_data() {
                    match port.aggregator {
                        Some(agg) => {
                            cscd::collect_frame(&mut self.aggregators[agg.0], port, frame)
                        }
                        None => port.stats.frames_discarded += 1,
                    }
                } else if let Sdu::Lacp(pdu) = frame.sdu {
                    port.stats.lacpdu_rx += 1;
                    port.rx_lacpdu = Some(pdu);
                }
                // Control PDUs of any other protocol are not ours to parse.
            }
        }
    }

    fn step_port_machines(&mut self, single_step: bool) {
        for index in 0..self.ports.len() {
            let port = &mut self.ports[index];
            port::run_rx(port, &self.ctx, single_step);
            port::run_periodic(port, &self.ctx, single_step);
            let agg = match port.aggregator {
                Some(agg) => self.aggregators.get_mut(agg.0),
                None => None,
            };
            port::run_mux(port, agg, &self.ctx, single_step);
        }
    }

    fn distribute_clients(&mut self) {
        for agg in &mut self.aggregators {
            while let Some(frame) = agg.egress.pop_front() {
                cscd::distribute_frame(agg, &mut self.ports, frame);
            }
        }
    }

    #[cfg(feature = "drni")]
    fn run_relays(&mut self, single_step: bool) {
        for relay in &mut self.relays {
            let agg = &mut self.aggregators[relay.aggregator.0];
            relay::run(relay, agg, &self.ctx, single_step);
        }
    }
}

impl Default for LinkAgg {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LinkAgg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("LinkAgg");
        out.field("tick", &self.ctx.tick)
            .field("ports", &self.ports.len())
            .field("aggregators", &self.aggregators.len());
        #[cfg(feature = "drni")]
        out.field("relays", &self.relays.len());
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lag_types::{LacpPortState, MacAddress, PortId, SystemId};

    use crate::pdu::{Lacpdu, LacpduPartyInfo};
    use crate::port::testlink::{TestLink, TestLinkHandle};
    use crate::port::{MuxSmState, RxSmState, Selected};

    use super::*;

    const SYSTEM: u64 = 0x0001_0000_0000_0011;
    const PARTNER: u64 = 0x0001_0000_0000_0022;

    fn aggregatable(system: u64, number: u16, key: u16) -> PortConfig {
        let mut config = PortConfig::new(SystemId::from_u64(system), number, key);
        config.actor_state.aggregation = true;
        config
    }

    fn engine_with_lag() -> (LinkAgg, PortIndex, AggIndex, TestLinkHandle) {
        let mut engine = LinkAgg::new();
        let (link, handle) = TestLink::up();
        let port = engine.add_port(aggregatable(SYSTEM, 1, 0x100), Box::new(link));
        let agg = engine.add_aggregator(AggregatorConfig::new(
            SystemId::from_u64(SYSTEM),
            100,
            0x100,
        ));
        (engine, port, agg, handle)
    }

    /// A converged version-2 partner: replies every cycle (fast periodic)
    /// with sync, collecting and distributing set, echoing the port's
    /// latest self-view.
    #[derive(Default)]
    struct ScriptedPartner {
        last_actor: Option<LacpduPartyInfo>,
    }

    impl ScriptedPartner {
        fn pump(&mut self, handle: &TestLinkHandle) {
            for frame in handle.take_sent() {
                if let Some(pdu) = frame.as_lacp() {
                    self.last_actor = Some(pdu.actor);
                }
            }
            let Some(actor) = self.last_actor else {
                return;
            };
            let reply = Lacpdu {
                version: 2,
                actor: LacpduPartyInfo {
                    system: SystemId::from_u64(PARTNER),
                    key: 0x77,
                    port: PortId::new(0, 9),
                    state: LacpPortState::from_octet(0x3d),
                },
                partner: actor,
                ..Lacpdu::default()
            };
            handle.inject(Frame::lacp(MacAddress::new([0, 0, 0, 0, 0, 0x22]), reply));
        }
    }

    fn converge(engine: &mut LinkAgg, partner: &mut ScriptedPartner, handle: &TestLinkHandle) {
        for _ in 0..60 {
            engine.run(false);
            engine.timer_tick();
            partner.pump(handle);
        }
    }

    #[test]
    fn test_lookup_errors() {
        let (engine, port, agg, _handle) = engine_with_lag();
        assert!(engine.port(port).is_ok());
        assert!(engine.aggregator(agg).is_ok());
        assert_eq!(
            engine.port(PortIndex(9)).unwrap_err(),
            LagError::UnknownPort(PortIndex(9))
        );
        assert_eq!(
            engine.aggregator(AggIndex(9)).unwrap_err(),
            LagError::UnknownAggregator(AggIndex(9))
        );
    }

    #[test]
    fn test_reserved_link_number_rejected() {
        let (mut engine, port, _agg, _handle) = engine_with_lag();
        assert_eq!(
            engine.set_admin_link_number(port, 0).unwrap_err(),
            LagError::ReservedLinkNumber
        );
        engine.set_admin_link_number(port, 7).unwrap();
        assert_eq!(engine.port(port).unwrap().admin_link_number, 7);
    }

    #[test]
    fn test_conversation_id_range_checked() {
        let (mut engine, _port, agg, _handle) = engine_with_lag();

        let mut link_map = BTreeMap::new();
        link_map.insert(4096u16, vec![1u16]);
        assert_eq!(
            engine.set_admin_link_map(agg, link_map).unwrap_err(),
            LagError::ConversationIdOutOfRange(4096)
        );

        let mut service_map = BTreeMap::new();
        service_map.insert(700u32, 5000u16);
        assert_eq!(
            engine.set_service_map(agg, service_map).unwrap_err(),
            LagError::ConversationIdOutOfRange(5000)
        );

        let mut service_map = BTreeMap::new();
        service_map.insert(700u32, 900u16);
        engine.set_service_map(agg, service_map).unwrap();
    }

    #[test]
    fn test_lag_converges_against_scripted_partner() {
        let (mut engine, port, agg, handle) = engine_with_lag();
        let mut partner = ScriptedPartner::default();
        converge(&mut engine, &mut partner, &handle);

        let port = engine.port(port).unwrap();
        assert_eq!(port.selected, Selected::Selected);
        assert_eq!(port.mux_state, MuxSmState::Distributing);
        assert!(port.actor_oper_state.distributing);
        let agg = engine.aggregator(agg).unwrap();
        assert!(agg.operational);
        assert_eq!(agg.active_lag_links, vec![2]);
        assert_eq!(agg.partner_system, SystemId::from_u64(PARTNER));
    }

    #[test]
    fn test_distribute_and_collect_round_trip() {
        let (mut engine, _port, agg, handle) = engine_with_lag();
        let mut partner = ScriptedPartner::default();
        converge(&mut engine, &mut partner, &handle);

        let outbound = Frame::data(
            MacAddress::new([0, 0, 0, 0, 0, 0x42]),
            MacAddress::new([0, 0, 0, 0, 0, 0x43]),
            7,
        );
        engine.distribute(agg, outbound.clone()).unwrap();
        engine.run(false);
        assert!(handle.take_sent().iter().any(|frame| frame.is_data()));
        assert_eq!(engine.aggregator(agg).unwrap().stats.frames_distributed, 1);

        handle.inject(outbound);
        engine.run(false);
        assert!(engine.collect(agg).unwrap().is_some());
        assert!(engine.collect(agg).unwrap().is_none());
    }

    #[test]
    fn test_partner_loss_expires_then_defaults() {
        let (mut engine, port, agg, handle) = engine_with_lag();
        let mut partner = ScriptedPartner::default();
        converge(&mut engine, &mut partner, &handle);
        assert!(engine.aggregator(agg).unwrap().operational);

        // Partner goes quiet; the short timeout expires the receive
        // machine, partner sync drops, and collection stops.
        for _ in 0..35 {
            engine.run(false);
            engine.timer_tick();
            handle.take_sent();
        }
        assert_eq!(engine.port(port).unwrap().rx_state, RxSmState::Expired);
        assert!(!engine.aggregator(agg).unwrap().operational);

        // A further timeout falls back to the administrative partner
        // defaults, which let the port operate standalone.
        for _ in 0..70 {
            engine.run(false);
            engine.timer_tick();
            handle.take_sent();
        }
        let port = engine.port(port).unwrap();
        assert_eq!(port.rx_state, RxSmState::Defaulted);
        assert!(port.actor_oper_state.defaulted);
        assert_eq!(port.partner_oper_system, SystemId::ZERO);
        assert!(engine.aggregator(agg).unwrap().operational);
    }

    #[test]
    fn test_timer_tick_advances_clock() {
        let (mut engine, _port, _agg, _handle) = engine_with_lag();
        engine.timer_tick();
        engine.timer_tick();
        assert_eq!(engine.tick(), 2);
    }

    #[cfg(feature = "drni")]
    #[test]
    fn test_relay_binds_one_aggregator_once() {
        let (mut engine, _port, agg, _handle) = engine_with_lag();
        let relay = engine
            .config_dist_relay(agg, RelayConfig::default(), None)
            .unwrap();
        assert!(engine.relay(relay).is_ok());
        assert_eq!(engine.aggregator(agg).unwrap().relay, Some(relay));

        assert_eq!(
            engine
                .config_dist_relay(agg, RelayConfig::default(), None)
                .unwrap_err(),
            LagError::AggregatorInUse(agg)
        );
        assert_eq!(
            engine
                .config_dist_relay(AggIndex(9), RelayConfig::default(), None)
                .unwrap_err(),
            LagError::UnknownAggregator(AggIndex(9))
        );
    }
}
