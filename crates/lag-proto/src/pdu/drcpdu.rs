//! DRCPDU structure.

use lag_types::SystemId;

use crate::relay::{AggState, GwPreference, GwState, IrpState};

/// A logical DRCPDU.
///
/// The fixed part identifies the sender, its portal, and its view of the
/// neighbor, and carries the six sequence numbers plus both IRP state
/// octets. The three state TLVs are optional: a sender includes one only
/// while its home sequence differs from the sequence the neighbor last
/// reflected, so steady-state PDUs shrink to the fixed part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Drcpdu {
    /// DRCP version the sender speaks.
    pub version: u8,

    /// Sender's own system identifier.
    pub home_system: SystemId,
    /// Portal system identifier the sender is configured with.
    pub portal_system: SystemId,
    /// Portal aggregator key the sender operates.
    pub portal_key: u16,
    /// Echo of the sender's recorded neighbor system.
    pub nbor_system: SystemId,

    /// Sender's aggregator state sequence.
    pub home_agg_sequence: u32,
    /// Sender's gateway state sequence.
    pub home_gw_sequence: u32,
    /// Sender's gateway preference sequence.
    pub home_gp_sequence: u32,
    /// Sequence the sender last saw from the neighbor's aggregator vector.
    pub nbor_agg_sequence: u32,
    /// Sequence the sender last saw from the neighbor's gateway vector.
    pub nbor_gw_sequence: u32,
    /// Sequence the sender last saw from the neighbor's preference vector.
    pub nbor_gp_sequence: u32,
    /// Sender's IRP state octet.
    pub home_irp_state: IrpState,
    /// Sender's view of the neighbor's IRP state octet.
    pub nbor_irp_state: IrpState,

    /// Aggregator State TLV, present while unacknowledged.
    pub aggregator_state: Option<AggState>,
    /// Gateway State TLV, present while unacknowledged.
    pub gateway_state: Option<GwState>,
    /// Gateway Preference TLV, present while unacknowledged.
    pub gateway_preference: Option<GwPreference>,
}

impl Drcpdu {
    /// TLV type: portal system identification.
    pub const TLV_SYSTEM_ID: u8 = 1;
    /// TLV type: neighbor system identification.
    pub const TLV_NEIGHBOR_SYSTEM_ID: u8 = 2;
    /// TLV type: sequence numbers and IRP state octets.
    pub const TLV_DRNI_STATE: u8 = 3;
    /// TLV type: aggregator state vector.
    pub const TLV_AGGREGATOR_STATE: u8 = 4;
    /// TLV type: gateway state vector.
    pub const TLV_GATEWAY_STATE: u8 = 5;
    /// TLV type: gateway preference vector.
    pub const TLV_GATEWAY_PREFERENCE: u8 = 6;

    /// Wire length of the system identification TLV value.
    pub const TLV_SYSTEM_ID_LEN: u16 = 18;
    /// Wire length of the neighbor system identification TLV value.
    pub const TLV_NEIGHBOR_SYSTEM_ID_LEN: u16 = 8;
    /// Wire length of the DRNI state TLV value.
    pub const TLV_DRNI_STATE_LEN: u16 = 26;
    /// Wire length of the gateway state TLV value.
    pub const TLV_GATEWAY_STATE_LEN: u16 = 552;
    /// Wire length of the gateway preference TLV value.
    pub const TLV_GATEWAY_PREFERENCE_LEN: u16 = 514;

    /// Wire length of an aggregator state TLV value carrying `links`
    /// active link numbers.
    pub const fn aggregator_state_tlv_len(links: usize) -> u16 {
        52 + 2 * links as u16
    }
}
