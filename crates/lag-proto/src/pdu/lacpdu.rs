//! LACPDU structure.

use lag_types::{Digest, LacpPortState, LagAlgorithm, LinkNumber, PortId, SystemId};

/// One party's information block in an LACPDU.
///
/// The actor block carries the sender's view of itself; the partner block
/// carries the sender's view of the system at the other end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LacpduPartyInfo {
    /// System identifier.
    pub system: SystemId,
    /// Operational port key.
    pub key: u16,
    /// Port identifier.
    pub port: PortId,
    /// Port state octet.
    pub state: LacpPortState,
}

/// A logical LACPDU.
///
/// Version 1 carries the two information blocks and the collector max
/// delay. Version 2 appends the conversation-sensitive TLVs; `None` models
/// a TLV absent from the received PDU, which the Receive machine records
/// as the corresponding default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lacpdu {
    /// Protocol version the sender speaks.
    pub version: u8,
    /// Sender's view of itself.
    pub actor: LacpduPartyInfo,
    /// Sender's view of its partner.
    pub partner: LacpduPartyInfo,
    /// Maximum delay the sender's frame collector may introduce.
    pub collector_max_delay: u16,
    /// Port Algorithm TLV.
    pub port_algorithm: Option<LagAlgorithm>,
    /// Port Conversation ID Digest TLV: digest of the conversation
    /// link-list table, plus the sender's operational link number.
    pub link_digest: Option<Digest>,
    /// Port Conversation Service Mapping Digest TLV.
    pub service_digest: Option<Digest>,
    /// Operational link number, carried with the conversation digest TLV.
    pub link_number: Option<LinkNumber>,
}

impl Lacpdu {
    /// True when the PDU carries the version-2 TLV set.
    pub fn has_v2_tlvs(&self) -> bool {
        self.port_algorithm.is_some() || self.link_digest.is_some() || self.service_digest.is_some()
    }
}
