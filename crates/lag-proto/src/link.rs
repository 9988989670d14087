//! Link service abstraction.
//!
//! The engine never touches real interfaces. Every aggregation port and
//! every intra-relay port owns a boxed [`LinkService`] supplied by the
//! caller; the test kit's `SimLink` is the reference implementation.

use lag_types::MacAddress;

use crate::pdu::Frame;

/// One attachment point to a physical or simulated link.
///
/// Implementations must behave as bounded queues with at most a handful of
/// frames in flight per direction; the machines call [`poll`] until it
/// returns `None` every cycle, so nothing accumulates.
///
/// [`poll`]: LinkService::poll
pub trait LinkService: Send {
    /// True when the underlying MAC is up and frames can flow.
    fn is_operational(&self) -> bool;

    /// True when the link connects exactly two stations.
    ///
    /// LACP only transmits periodically on point-to-point links.
    fn is_point_to_point(&self) -> bool;

    /// Source address for protocol frames sent on this link.
    fn mac_address(&self) -> MacAddress;

    /// Hands a frame to the link for transmission.
    ///
    /// Infallible: a link that cannot transmit drops the frame, exactly
    /// as a down MAC would.
    fn send(&mut self, frame: Frame);

    /// Takes the next received frame, if any. Never blocks.
    fn poll(&mut self) -> Option<Frame>;
}
