//! Engine event notifications.
//!
//! The machines report state changes through a [`LagObserver`] carried in
//! the per-cycle [`LagContext`]. Observers are for the layer above the
//! protocol (interface managers, test assertions); diagnostics go through
//! `tracing` instead.

use std::sync::Arc;

use lag_types::LinkNumber;
#[cfg(feature = "drni")]
use lag_types::SystemId;

use crate::port::{MuxSmState, RxSmState, Selected};
use crate::{AggIndex, PortIndex};
#[cfg(feature = "drni")]
use crate::RelayIndex;

/// A state change worth reporting to the layer above the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LagEvent {
    /// The selection logic re-bound a port.
    SelectionChanged {
        /// Port whose selection changed.
        port: PortIndex,
        /// Aggregator the port now selects, if any.
        aggregator: Option<AggIndex>,
        /// New selection value.
        selected: Selected,
    },
    /// The Mux machine moved (attach/detach/collect/distribute).
    MuxStateChanged {
        /// Port whose Mux machine moved.
        port: PortIndex,
        /// New Mux state.
        state: MuxSmState,
    },
    /// The Receive machine moved (expiry, default, partner liveness).
    ReceiveStateChanged {
        /// Port whose Receive machine moved.
        port: PortIndex,
        /// New Receive state.
        state: RxSmState,
    },
    /// The set of distributing links on an aggregator changed.
    ActiveLinksChanged {
        /// Aggregator whose active links changed.
        aggregator: AggIndex,
        /// Sorted link numbers now distributing.
        links: Vec<LinkNumber>,
    },
    /// The aggregator went up or down as a whole.
    AggregatorOperationalChanged {
        /// Aggregator whose status changed.
        aggregator: AggIndex,
        /// New operational status.
        operational: bool,
    },
    /// A distributed relay flipped between solo and paired operation.
    #[cfg(feature = "drni")]
    PortalStateChanged {
        /// Relay whose portal state flipped.
        relay: RelayIndex,
        /// True when the relay now runs without a neighbor.
        solo: bool,
    },
    /// A portal elected its operational aggregator identity.
    #[cfg(feature = "drni")]
    PortalElected {
        /// Relay that ran the election.
        relay: RelayIndex,
        /// Elected system identifier (the lower of the two chassis).
        system: SystemId,
        /// Elected aggregator key.
        key: u16,
    },
}

/// Receiver for [`LagEvent`] notifications.
///
/// All methods are infallible and must not call back into the engine; the
/// machines notify mid-step.
pub trait LagObserver: Send + Sync {
    /// Called once per reported state change.
    fn notify(&self, event: &LagEvent);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl LagObserver for NullObserver {
    fn notify(&self, _event: &LagEvent) {}
}

/// Per-cycle context handed to every machine step.
///
/// Carries the engine's tick counter for diagnostics and the observer for
/// event notifications. Machines never keep a copy across cycles.
#[derive(Clone)]
pub struct LagContext {
    /// Ticks elapsed since the engine was created.
    pub tick: u64,
    observer: Arc<dyn LagObserver>,
}

impl LagContext {
    /// Creates a context reporting to the given observer.
    pub fn new(observer: Arc<dyn LagObserver>) -> Self {
        Self { tick: 0, observer }
    }

    /// Reports one event.
    pub fn notify(&self, event: LagEvent) {
        self.observer.notify(&event);
    }
}

impl Default for LagContext {
    fn default() -> Self {
        Self::new(Arc::new(NullObserver))
    }
}

impl std::fmt::Debug for LagContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagContext").field("tick", &self.tick).finish()
    }
}
