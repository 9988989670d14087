//! Logical protocol frames.
//!
//! The engine exchanges structured PDUs rather than byte buffers; wire
//! encoding is outside this crate's scope. A [`Frame`] is what moves
//! through a [`crate::link::LinkService`]: a destination, a source, and
//! one service data unit.

#[cfg(feature = "drni")]
mod drcpdu;
mod lacpdu;

#[cfg(feature = "drni")]
pub use drcpdu::Drcpdu;
pub use lacpdu::{Lacpdu, LacpduPartyInfo};

use std::collections::VecDeque;

use lag_types::MacAddress;

/// Frames a client queue holds before dropping the newest arrival.
pub const FRAME_QUEUE_CAPACITY: usize = 16;

/// Appends to a client queue unless it is at capacity; reports whether the
/// frame was kept.
pub(crate) fn push_bounded(queue: &mut VecDeque<Frame>, frame: Frame) -> bool {
    if queue.len() >= FRAME_QUEUE_CAPACITY {
        return false;
    }
    queue.push_back(frame);
    true
}

/// A frame in flight on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination address.
    pub dst: MacAddress,
    /// Source address.
    pub src: MacAddress,
    /// Payload.
    pub sdu: Sdu,
}

/// Frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sdu {
    /// An LACPDU.
    Lacp(Lacpdu),
    /// A DRCPDU.
    #[cfg(feature = "drni")]
    Drcp(Drcpdu),
    /// Anything that is not a control PDU.
    Data(DataSdu),
}

/// The parts of a data frame the control plane inspects.
///
/// Conversation-ID derivation needs the addresses (carried on the
/// [`Frame`]), the VLAN tag, and the backbone service instance when one is
/// present; everything else about the payload is opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSdu {
    /// VLAN identifier, 12 significant bits; 0 when untagged.
    pub vlan_id: u16,
    /// Backbone service instance identifier, when the frame carries one.
    pub service_id: Option<u32>,
}

impl Frame {
    /// Builds an LACPDU frame addressed to the slow-protocols group.
    pub fn lacp(src: MacAddress, pdu: Lacpdu) -> Self {
        Self {
            dst: MacAddress::SLOW_PROTOCOLS,
            src,
            sdu: Sdu::Lacp(pdu),
        }
    }

    /// Builds a DRCPDU frame.
    #[cfg(feature = "drni")]
    pub fn drcp(dst: MacAddress, src: MacAddress, pdu: Drcpdu) -> Self {
        Self {
            dst,
            src,
            sdu: Sdu::Drcp(pdu),
        }
    }

    /// Builds a tagged data frame.
    pub fn data(dst: MacAddress, src: MacAddress, vlan_id: u16) -> Self {
        Self {
            dst,
            src,
            sdu: Sdu::Data(DataSdu {
                vlan_id,
                service_id: None,
            }),
        }
    }

    /// The LACPDU payload, if this is an LACPDU frame.
    pub fn as_lacp(&self) -> Option<&Lacpdu> {
        match &self.sdu {
            Sdu::Lacp(pdu) => Some(pdu),
            _ => None,
        }
    }

    /// The DRCPDU payload, if this is a DRCPDU frame.
    #[cfg(feature = "drni")]
    pub fn as_drcp(&self) -> Option<&Drcpdu> {
        match &self.sdu {
            Sdu::Drcp(pdu) => Some(pdu),
            _ => None,
        }
    }

    /// True when the payload is not a control PDU.
    pub fn is_data(&self) -> bool {
        matches!(self.sdu, Sdu::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_lacp_frame_goes_to_slow_protocols() {
        let src = MacAddress::new([0, 0, 0, 0, 0, 0x11]);
        let frame = Frame::lacp(src, Lacpdu::default());
        assert_eq!(frame.dst, MacAddress::SLOW_PROTOCOLS);
        assert!(frame.as_lacp().is_some());
        assert!(!frame.is_data());
    }

    #[test]
    fn test_data_frame_payload() {
        let dst = MacAddress::BROADCAST;
        let src = MacAddress::new([0, 0, 0, 0, 0, 0x22]);
        let frame = Frame::data(dst, src, 100);
        assert!(frame.as_lacp().is_none());
        assert!(frame.is_data());
        match frame.sdu {
            Sdu::Data(data) => assert_eq!(data.vlan_id, 100),
            _ => panic!("expected data sdu"),
        }
    }
}
