//! Relay state vectors and the IRP state octet.
//!
//! A portal synchronizes three versioned vectors per side: the aggregator
//! state, the gateway state, and the gateway preference. Each carries a
//! sequence number; the DRCP machines compare home, neighbor, and
//! reflected sequences to decide what must be retransmitted and when the
//! conversation masks may move.

use lag_types::{ConversationMask, Digest, LagAlgorithm, LinkNumber, SystemId};

/// Per-IRP protocol state, exchanged as one octet in every DRCPDU.
///
/// Bit assignments, LSB first: two reserved bits, `drcp_short_timeout`,
/// `irc_sync`, `irc_data`, `drni`, `defaulted`, `expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrpState {
    /// True while this side wants DRCPDUs at the fast cadence.
    pub drcp_short_timeout: bool,
    /// True when home and neighbor agree on the gateway conversation vectors.
    pub irc_sync: bool,
    /// True when data frames may cross the intra-relay connection.
    pub irc_data: bool,
    /// True when paired with a neighbor system.
    pub drni: bool,
    /// True while the DRCP Receive machine runs on administrative defaults.
    pub defaulted: bool,
    /// True while the DRCP Receive machine has expired.
    pub expired: bool,
}

impl IrpState {
    /// Decodes the state octet. Reserved bits are ignored.
    pub const fn from_octet(octet: u8) -> Self {
        Self {
            drcp_short_timeout: octet & 0x04 != 0,
            irc_sync: octet & 0x08 != 0,
            irc_data: octet & 0x10 != 0,
            drni: octet & 0x20 != 0,
            defaulted: octet & 0x40 != 0,
            expired: octet & 0x80 != 0,
        }
    }

    /// Encodes the state octet. Reserved bits transmit as zero.
    pub const fn to_octet(self) -> u8 {
        (self.drcp_short_timeout as u8) << 2
            | (self.irc_sync as u8) << 3
            | (self.irc_data as u8) << 4
            | (self.drni as u8) << 5
            | (self.defaulted as u8) << 6
            | (self.expired as u8) << 7
    }

    /// Copies every bit except `irc_sync` from `other`.
    ///
    /// The receiving side owns its view of `irc_sync`; all other neighbor
    /// bits are taken verbatim from the PDU.
    pub fn copy_except_sync(&mut self, other: IrpState) {
        self.drcp_short_timeout = other.drcp_short_timeout;
        self.irc_data = other.irc_data;
        self.drni = other.drni;
        self.defaulted = other.defaulted;
        self.expired = other.expired;
    }
}

/// Aggregator consistency bits carried inside the Aggregator State TLV.
///
/// Bit assignments, LSB first: two reserved bits, `cscd_gateway_control`,
/// `oper_dwc`, one reserved bit, `partner_link_digest_differs`,
/// `partner_service_digest_differs`, `partner_algorithm_differs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CscdState {
    /// True when gateway selection follows the aggregator's CSCD parameters.
    pub cscd_gateway_control: bool,
    /// True when the aggregator discards wrong conversations.
    pub oper_dwc: bool,
    /// True when actor and partner conversation link digests disagree.
    pub partner_link_digest_differs: bool,
    /// True when actor and partner service mapping digests disagree.
    pub partner_service_digest_differs: bool,
    /// True when actor and partner port algorithms disagree.
    pub partner_algorithm_differs: bool,
}

impl CscdState {
    /// Decodes the state octet. Reserved bits are ignored.
    pub const fn from_octet(octet: u8) -> Self {
        Self {
            cscd_gateway_control: octet & 0x04 != 0,
            oper_dwc: octet & 0x08 != 0,
            partner_link_digest_differs: octet & 0x20 != 0,
            partner_service_digest_differs: octet & 0x40 != 0,
            partner_algorithm_differs: octet & 0x80 != 0,
        }
    }

    /// Encodes the state octet. Reserved bits transmit as zero.
    pub const fn to_octet(self) -> u8 {
        (self.cscd_gateway_control as u8) << 2
            | (self.oper_dwc as u8) << 3
            | (self.partner_link_digest_differs as u8) << 5
            | (self.partner_service_digest_differs as u8) << 6
            | (self.partner_algorithm_differs as u8) << 7
    }
}

/// Versioned snapshot of one side's aggregator, exchanged via DRCP.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggState {
    /// Version of this snapshot; bumps on every content change.
    pub sequence: u32,
    /// Port algorithm the aggregator distributes with.
    pub algorithm: LagAlgorithm,
    /// Conversation service mapping digest.
    pub service_digest: Digest,
    /// Conversation link-list digest.
    pub link_digest: Digest,
    /// Partner system bound to the aggregator.
    pub partner_system: SystemId,
    /// Partner aggregator key.
    pub partner_key: u16,
    /// Consistency bits.
    pub cscd_state: CscdState,
    /// Sorted link numbers currently distributing.
    pub active_links: Vec<LinkNumber>,
}

impl AggState {
    /// Returns everything to the freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Versioned snapshot of one side's gateway, exchanged via DRCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GwState {
    /// Version of this snapshot; bumps on every content change.
    pub sequence: u32,
    /// Gateway conversation algorithm.
    pub algorithm: LagAlgorithm,
    /// Gateway service mapping digest.
    pub service_digest: Digest,
    /// Per-CID gateway availability.
    pub available_mask: ConversationMask,
}

impl GwState {
    /// Returns everything to the freshly constructed state.
    ///
    /// The available mask resets to all ones: an unconfigured gateway
    /// accepts every conversation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for GwState {
    fn default() -> Self {
        Self {
            sequence: 0,
            algorithm: LagAlgorithm::UNSPECIFIED,
            service_digest: Digest::ZERO,
            available_mask: ConversationMask::full(),
        }
    }
}

/// Versioned per-CID gateway preference, exchanged via DRCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GwPreference {
    /// Version of this snapshot; bumps on every content change.
    pub sequence: u32,
    /// Per-CID preference: set means this side wants the conversation.
    pub preference_mask: ConversationMask,
}

impl GwPreference {
    /// Returns everything to the freshly constructed state.
    ///
    /// The preference mask resets to all ones: by default a side prefers
    /// every conversation and the election tie-break decides.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for GwPreference {
    fn default() -> Self {
        Self {
            sequence: 0,
            preference_mask: ConversationMask::full(),
        }
    }
}
