//! Frame distribution algorithm identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 4-octet distribution algorithm identifier: the IEEE 802.1 OUI
/// (00-80-C2) in the upper three octets and an algorithm code in the low
/// octet. The `0x80` bit of the code marks algorithms whose conversation
/// IDs are derived through an administered service mapping, making the
/// service-mapping digest significant for compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LagAlgorithm(pub u32);

impl LagAlgorithm {
    /// No algorithm configured; selection defers to the peer.
    pub const UNSPECIFIED: LagAlgorithm = LagAlgorithm(0);
    /// Peer advertised no algorithm (version 1 peers).
    pub const NONE: LagAlgorithm = LagAlgorithm(0x0080_C2FF);
    /// Conversation ID from the customer VLAN identifier.
    pub const C_VID: LagAlgorithm = LagAlgorithm(0x0080_C201);
    /// Conversation ID from the service VLAN identifier.
    pub const S_VID: LagAlgorithm = LagAlgorithm(0x0080_C202);
    /// Conversation ID from the backbone service instance, via service map.
    pub const I_SID: LagAlgorithm = LagAlgorithm(0x0080_C283);
    /// Conversation ID from the traffic-engineering service, via service map.
    pub const TE_SID: LagAlgorithm = LagAlgorithm(0x0080_C284);
    /// Conversation ID from a hash of the frame's address fields.
    pub const ECMP_FLOW: LagAlgorithm = LagAlgorithm(0x0080_C205);

    /// True when conversation IDs pass through the administered service
    /// mapping, so the service-mapping digests must match for two systems
    /// to agree on frame distribution.
    pub const fn uses_service_map(self) -> bool {
        self.0 & 0x80 != 0 && self.0 != Self::NONE.0
    }

    /// True when no algorithm has been administered.
    pub const fn is_unspecified(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LagAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSPECIFIED => f.write_str("unspecified"),
            Self::NONE => f.write_str("none"),
            Self::C_VID => f.write_str("c-vid"),
            Self::S_VID => f.write_str("s-vid"),
            Self::I_SID => f.write_str("i-sid"),
            Self::TE_SID => f.write_str("te-sid"),
            Self::ECMP_FLOW => f.write_str("ecmp-flow"),
            LagAlgorithm(other) => write!(f, "{:#010x}", other),
        }
    }
}
