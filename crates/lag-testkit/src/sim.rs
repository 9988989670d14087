//! Paired in-memory links.
//!
//! [`SimLink::pair`] builds the two ends of one wire. Frames sent on one
//! end arrive at the other on its next poll, so two engines driven in
//! alternation see exactly one cycle of propagation delay. The shared
//! [`SimWireHandle`] flips either end's operational status and can cut a
//! single direction, which a real wire does when only one fiber fails.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lag_proto::link::LinkService;
use lag_proto::pdu::Frame;
use lag_types::MacAddress;

#[derive(Debug)]
struct WireState {
    a_up: bool,
    b_up: bool,
    a_to_b_cut: bool,
    b_to_a_cut: bool,
    point_to_point: bool,
    to_a: VecDeque<Frame>,
    to_b: VecDeque<Frame>,
}

impl Default for WireState {
    fn default() -> Self {
        Self {
            a_up: true,
            b_up: true,
            a_to_b_cut: false,
            b_to_a_cut: false,
            point_to_point: true,
            to_a: VecDeque::new(),
            to_b: VecDeque::new(),
        }
    }
}

fn lock(state: &Mutex<WireState>) -> MutexGuard<'_, WireState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    A,
    B,
}

/// One end of a simulated wire.
pub struct SimLink {
    end: End,
    mac: MacAddress,
    state: Arc<Mutex<WireState>>,
}

impl SimLink {
    /// Builds both ends of a wire, up and point-to-point.
    pub fn pair(mac_a: MacAddress, mac_b: MacAddress) -> (SimLink, SimLink, SimWireHandle) {
        let state = Arc::new(Mutex::new(WireState::default()));
        let a = SimLink {
            end: End::A,
            mac: mac_a,
            state: state.clone(),
        };
        let b = SimLink {
            end: End::B,
            mac: mac_b,
            state: state.clone(),
        };
        (a, b, SimWireHandle { state })
    }
}

impl LinkService for SimLink {
    fn is_operational(&self) -> bool {
        let state = lock(&self.state);
        match self.end {
            End::A => state.a_up,
            End::B => state.b_up,
        }
    }

    fn is_point_to_point(&self) -> bool {
        lock(&self.state).point_to_point
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn send(&mut self, frame: Frame) {
        let mut state = lock(&self.state);
        match self.end {
            End::A => {
                if !state.a_to_b_cut {
                    state.to_b.push_back(frame);
                }
            }
            End::B => {
                if !state.b_to_a_cut {
                    state.to_a.push_back(frame);
                }
            }
        }
    }

    fn poll(&mut self) -> Option<Frame> {
        let mut state = lock(&self.state);
        match self.end {
            End::A if state.a_up => state.to_a.pop_front(),
            End::B if state.b_up => state.to_b.pop_front(),
            _ => None,
        }
    }
}

/// Shared control over both ends of a wire.
#[derive(Clone)]
pub struct SimWireHandle {
    state: Arc<Mutex<WireState>>,
}

impl SimWireHandle {
    /// Raises or drops the A end; dropping discards frames in flight
    /// toward it.
    pub fn set_a_up(&self, up: bool) {
        let mut state = lock(&self.state);
        state.a_up = up;
        if !up {
            state.to_a.clear();
        }
    }

    /// Raises or drops the B end; dropping discards frames in flight
    /// toward it.
    pub fn set_b_up(&self, up: bool) {
        let mut state = lock(&self.state);
        state.b_up = up;
        if !up {
            state.to_b.clear();
        }
    }

    /// Cuts or restores the A-to-B direction. Frames sent into a cut
    /// direction are lost; both ends still report operational.
    pub fn cut_a_to_b(&self, cut: bool) {
        lock(&self.state).a_to_b_cut = cut;
    }

    /// Cuts or restores the B-to-A direction.
    pub fn cut_b_to_a(&self, cut: bool) {
        lock(&self.state).b_to_a_cut = cut;
    }

    /// Marks the wire as shared or point-to-point.
    pub fn set_point_to_point(&self, p2p: bool) {
        lock(&self.state).point_to_point = p2p;
    }
}
