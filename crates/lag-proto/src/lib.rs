//! IEEE 802.1AX link aggregation control plane.
//!
//! This crate implements the protocol logic that binds physical links into
//! aggregated interfaces: the per-port LACP state machines (Receive,
//! Periodic, Mux, Transmit) for protocol versions 1 and 2, the selection
//! logic that assigns ports to aggregators by LAG ID, and
//! conversation-sensitive collecting/distributing (CSCD), which steers each
//! of the 4096 conversation IDs to one link of the LAG.
//!
//! With the `drni` feature (default), the crate also implements the
//! Distributed Resilient Network Interconnect: a [`relay::DistributedRelay`]
//! pairs two chassis into one portal over an intra-relay port, runs DRCP to
//! exchange per-conversation state vectors, and decides per conversation ID
//! whether frames take the home or the neighbor gateway and aggregator.
//!
//! # Architecture
//!
//! ```text
//!  client frames                     gateway frames
//!       │                                  │
//!       ▼                                  ▼
//!  [Aggregator] ◄─ selection ─ [AggPort]   [DistributedRelay]
//!       │                          │            │
//!       │  CSCD masks              │ LACPDUs    │ DRCPDUs
//!       ▼                          ▼            ▼
//!  conversation-ID routing    [LinkService]  [LinkService (IRP)]
//! ```
//!
//! All entities live in arenas owned by [`engine::LinkAgg`] and are
//! addressed by index handles. The engine is single-threaded and
//! tick-driven: [`engine::LinkAgg::timer_tick`] advances every timer and
//! [`engine::LinkAgg::run`] steps every machine in a fixed order, so
//! identical tick and frame sequences always produce identical states.
//!
//! # Feature flags
//!
//! - `drni` (default): the distributed relay, DRCP machines, and DRCPDU
//!   structures. Without it the crate is a plain single-chassis LACP/CSCD
//!   implementation.

// ============================================================================
// Protocol modules
// ============================================================================

pub mod aggregator;
pub mod engine;
pub mod pdu;
pub mod port;
#[cfg(feature = "drni")]
pub mod relay;

// ============================================================================
// Support modules
// ============================================================================

pub mod config;
pub mod error;
pub mod link;
pub mod observer;

pub use config::{DrcpTimerProfile, TimerProfile};
pub use error::LagError;
pub use link::LinkService;
pub use observer::{LagContext, LagEvent, LagObserver, NullObserver};

/// Handle to an aggregation port in the engine's port arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortIndex(pub usize);

/// Handle to an aggregator in the engine's aggregator arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggIndex(pub usize);

/// Handle to a distributed relay in the engine's relay arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelayIndex(pub usize);

impl std::fmt::Display for PortIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port{}", self.0)
    }
}

impl std::fmt::Display for AggIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agg{}", self.0)
    }
}

impl std::fmt::Display for RelayIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay{}", self.0)
    }
}
