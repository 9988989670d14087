//! Ready-made engine topologies.
//!
//! Every fixture wires complete [`LinkAgg`] engines through [`SimLink`]
//! pairs, so the scenarios in `tests/` drive the same code paths a
//! production integration would: frames cross a wire, timers tick, and
//! nothing reaches into machine internals to converge.

use lag_proto::aggregator::AggregatorConfig;
use lag_proto::engine::LinkAgg;
use lag_proto::port::PortConfig;
use lag_proto::relay::RelayConfig;
use lag_proto::{AggIndex, PortIndex, RelayIndex};
use lag_types::{LagAlgorithm, MacAddress, SystemId};

use crate::sim::{SimLink, SimWireHandle};

/// Initializes a tracing subscriber for a test binary; repeated calls are
/// no-ops. Filtering follows `RUST_LOG`, silent by default.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One switch of a back-to-back LACP pair: an engine with a single
/// aggregation port bound to one end of a shared wire.
pub struct LagSide {
    pub engine: LinkAgg,
    pub port: PortIndex,
    pub agg: AggIndex,
}

/// A port config that actually aggregates: the admin actor state carries
/// the aggregation bit on top of the active/short-timeout defaults.
pub fn aggregatable_port(system: u64, port_number: u16, key: u16, version: u8) -> PortConfig {
    let mut config = PortConfig::new(SystemId::from_u64(system), port_number, key);
    config.lacp_version = version;
    config.actor_state.aggregation = true;
    config
}

/// Two single-port switches joined by one wire, speaking the given LACP
/// version on both sides.
pub fn back_to_back(
    system_a: u64,
    system_b: u64,
    version: u8,
) -> (LagSide, LagSide, SimWireHandle) {
    let (link_a, link_b, wire) = SimLink::pair(
        MacAddress::from_u64(system_a),
        MacAddress::from_u64(system_b),
    );
    let a = lag_side(system_a, version, Box::new(link_a));
    let b = lag_side(system_b, version, Box::new(link_b));
    (a, b, wire)
}

fn lag_side(system: u64, version: u8, link: Box<dyn lag_proto::LinkService>) -> LagSide {
    let mut engine = LinkAgg::new();
    let port = engine.add_port(aggregatable_port(system, 1, 0x100, version), link);
    let agg = engine.add_aggregator(AggregatorConfig::new(
        SystemId::from_u64(system),
        100,
        0x100,
    ));
    LagSide { engine, port, agg }
}

/// One chassis of a portal: an engine whose aggregator fronts a
/// distributed relay, with the intra-relay port on one end of a wire.
pub struct PortalChassis {
    pub engine: LinkAgg,
    pub agg: AggIndex,
    pub relay: RelayIndex,
}

/// Two chassis joined by an intra-relay wire. The portal system is left
/// to the election (lower system identifier wins); each relay's admin
/// portal key matches its aggregator key, so the elected key is the
/// winner's aggregator key. Gateways classify by C-VLAN, which gives the
/// portal a shared per-conversation view.
pub fn portal_pair(
    system_a: u64,
    key_a: u16,
    system_b: u64,
    key_b: u16,
) -> (PortalChassis, PortalChassis, SimWireHandle) {
    let (irp_a, irp_b, wire) = SimLink::pair(
        MacAddress::from_u64(system_a),
        MacAddress::from_u64(system_b),
    );
    let a = portal_chassis(system_a, key_a, Box::new(irp_a));
    let b = portal_chassis(system_b, key_b, Box::new(irp_b));
    (a, b, wire)
}

fn portal_chassis(system: u64, key: u16, irp: Box<dyn lag_proto::LinkService>) -> PortalChassis {
    let mut engine = LinkAgg::new();
    let agg = engine.add_aggregator(AggregatorConfig::new(SystemId::from_u64(system), 1, key));
    let config = RelayConfig {
        portal_key: key,
        gateway_algorithm: LagAlgorithm::C_VID,
        ..RelayConfig::default()
    };
    let relay = engine
        .config_dist_relay(agg, config, Some(irp))
        .expect("fresh aggregator takes a relay");
    PortalChassis { engine, agg, relay }
}

/// Runs both engines for `cycles` full cycles, one timer tick each.
pub fn converge(a: &mut LinkAgg, b: &mut LinkAgg, cycles: u32) {
    for _ in 0..cycles {
        a.run(false);
        b.run(false);
        a.timer_tick();
        b.timer_tick();
    }
}
