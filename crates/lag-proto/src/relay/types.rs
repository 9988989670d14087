//! Distributed relay state and configuration.

use std::collections::VecDeque;

use lag_types::{
    ConversationMask, Digest, LagAlgorithm, MacAddress, SystemId, CONVERSATION_ID_COUNT,
};
use serde::{Deserialize, Serialize};

use crate::config::DrcpTimerProfile;
use crate::link::LinkService;
use crate::pdu::{Drcpdu, Frame};
use crate::{AggIndex, RelayIndex};

use super::state::{AggState, GwPreference, GwState, IrpState};

/// DRCP Receive machine states.
///
/// The machine rests in `WaitToReceive`; `Expired`, `Defaulted`, and
/// `Current` are one-shot states whose work happens on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrcpRxSmState {
    /// IRP down or DRCP administratively off; running on defaults.
    #[default]
    Initialize,
    /// No DRCPDU within the liveness bound; a short timer is running.
    Expired,
    /// Gave up on the neighbor; recorded defaults again.
    Defaulted,
    /// Waiting for the next DRCPDU or a timer to fire.
    WaitToReceive,
    /// A portal-compatible DRCPDU was recorded.
    Current,
}

/// DRCP Transmit machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrcpTxSmState {
    /// Transmission disabled.
    #[default]
    NoTx,
    /// Fast cadence armed; the neighbor asked for short timeouts.
    FastPeriodic,
    /// Slow cadence armed.
    SlowPeriodic,
    /// A DRCPDU was handed to the IRP.
    Tx,
}

/// The portal system a conversation ID is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortalSide {
    /// Not reachable through either portal system.
    #[default]
    None,
    /// This portal system.
    Home,
    /// The neighbor portal system.
    Nbor,
}

/// Construction-time parameters for a distributed relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Portal system identifier both portal systems must share. Zero
    /// leaves the portal identity to the election: the lower chassis
    /// system identifier wins.
    pub portal_system: SystemId,
    /// Portal aggregator key paired with `portal_system`.
    pub portal_key: u16,
    /// Admin gateway conversation algorithm.
    pub gateway_algorithm: LagAlgorithm,
    /// Admin gateway service mapping digest.
    pub gateway_service_digest: Digest,
    /// Gateway selection follows the aggregator's CSCD parameters.
    pub cscd_gateway_control: bool,
    /// Ask the neighbor for DRCPDUs at the fast cadence.
    pub short_timeout: bool,
    /// Allow data frames across the intra-relay connection.
    pub irc_data: bool,
    /// Run DRCP on the intra-relay port.
    pub drcp_enabled: bool,
    /// Timer values for both DRCP machines.
    pub timers: DrcpTimerProfile,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            portal_system: SystemId::ZERO,
            portal_key: 0,
            gateway_algorithm: LagAlgorithm::UNSPECIFIED,
            gateway_service_digest: Digest::ZERO,
            cscd_gateway_control: false,
            short_timeout: true,
            irc_data: true,
            drcp_enabled: true,
            timers: DrcpTimerProfile::default(),
        }
    }
}

impl RelayConfig {
    /// Builds a config with an explicit portal identity.
    pub fn new(portal_system: SystemId, portal_key: u16) -> Self {
        Self {
            portal_system,
            portal_key,
            ..Self::default()
        }
    }
}

/// Counters bumped by the relay paths and the DRCP machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// DRCPDUs received and handed to the DRCP Receive machine.
    pub drcpdu_rx: u64,
    /// DRCPDUs transmitted.
    pub drcpdu_tx: u64,
    /// Gateway requests dropped because the queue was full.
    pub gateway_queue_drops: u64,
    /// Gateway requests flushed while the relay was not operational.
    pub requests_flushed: u64,
    /// Data frames discarded by the relay paths.
    pub frames_discarded: u64,
}

/// One distributed relay: the DR function fronting an aggregator, plus
/// every DRCP variable the two machines and the gateway/aggregator logic
/// operate on.
pub struct DistributedRelay {
    /// This relay's slot in the engine's arena.
    pub index: RelayIndex,
    /// The aggregator this relay fronts.
    pub aggregator: AggIndex,
    /// Intra-relay port toward the neighbor portal system; `None` runs
    /// the relay as a transparent sublayer.
    pub irp: Option<Box<dyn LinkService>>,
    /// Timer values.
    pub timers: DrcpTimerProfile,
    /// Counters.
    pub stats: RelayStats,
    /// Frames queued down by the gateway client, oldest first.
    pub requests: VecDeque<Frame>,
    /// Frames relayed up to the gateway client, oldest first.
    pub indications: VecDeque<Frame>,

    /// Admin portal system identifier.
    pub portal_system: SystemId,
    /// Admin portal aggregator key.
    pub portal_key: u16,
    /// The gateway toward the client is enabled.
    pub gateway_enabled: bool,
    /// Admin IRP state bits; only the short timeout and irc_data bits
    /// are administered.
    pub admin_irp_state: IrpState,
    /// Admin gateway conversation algorithm.
    pub gateway_algorithm: LagAlgorithm,
    /// Admin gateway service mapping digest.
    pub gateway_service_digest: Digest,
    /// Gateway selection follows the aggregator's CSCD parameters.
    pub cscd_gateway_control: bool,
    /// Per-CID admin gateway enable.
    pub gateway_enable_mask: ConversationMask,
    /// Per-CID admin gateway preference.
    pub gateway_preference_mask: ConversationMask,
    /// Run DRCP on the intra-relay port.
    pub drcp_enabled: bool,
    /// DRCP version the relay speaks.
    pub drcp_version: u8,
    /// Destination group address for DRCPDUs.
    pub drcp_destination: MacAddress,

    /// Home aggregator state vector.
    pub home_agg_state: AggState,
    /// Home gateway state vector.
    pub home_gw_state: GwState,
    /// Home gateway preference vector.
    pub home_gw_preference: GwPreference,
    /// Aggregator sequence last written into a DRCPDU.
    pub last_tx_agg_sequence: u32,
    /// Gateway sequence last written into a DRCPDU.
    pub last_tx_gw_sequence: u32,
    /// Preference sequence last written into a DRCPDU.
    pub last_tx_gp_sequence: u32,
    /// Home IRP state bits.
    pub home_irp_state: IrpState,

    /// Recorded neighbor system identifier.
    pub nbor_system: SystemId,
    /// Recorded neighbor portal key.
    pub nbor_key: u16,
    /// Recorded neighbor IRP state bits.
    pub nbor_irp_state: IrpState,
    /// Recorded neighbor aggregator state vector.
    pub nbor_agg_state: AggState,
    /// Recorded neighbor gateway state vector.
    pub nbor_gw_state: GwState,
    /// Recorded neighbor gateway preference vector.
    pub nbor_gw_preference: GwPreference,

    /// Home IRP state bits as last echoed by the neighbor.
    pub reflected_irp_state: IrpState,
    /// Home aggregator sequence as last echoed by the neighbor.
    pub reflected_agg_sequence: u32,
    /// Home gateway sequence as last echoed by the neighbor.
    pub reflected_gw_sequence: u32,
    /// Home preference sequence as last echoed by the neighbor.
    pub reflected_gp_sequence: u32,

    /// Running without a live neighbor.
    pub dr_solo: bool,
    /// The relay as a whole can move frames for its client.
    pub dr_operational: bool,
    /// Both sides agree data frames may cross the IRC.
    pub enable_irc_data: bool,
    /// The last checked DRCPDU named a different portal.
    pub differ_drni: bool,
    /// Per-CID agreement on gateway selection; a gateway mask bit may
    /// only be gained where this is set.
    pub gateway_sync_mask: ConversationMask,
    /// Portal system per port conversation ID.
    pub aggregator_selection: [PortalSide; CONVERSATION_ID_COUNT],
    /// Portal system per gateway conversation ID.
    pub gateway_selection: [PortalSide; CONVERSATION_ID_COUNT],
    /// CIDs open between the home gateway and the relay.
    pub home_gateway_mask: ConversationMask,
    /// CIDs open between the neighbor gateway and the relay.
    pub nbor_gateway_mask: ConversationMask,
    /// CIDs open between the relay and the home aggregator.
    pub home_aggregator_mask: ConversationMask,
    /// CIDs open between the relay and the neighbor aggregator.
    pub nbor_aggregator_mask: ConversationMask,

    /// DRCP Receive machine state.
    pub rx_state: DrcpRxSmState,
    /// DRCP Transmit machine state.
    pub tx_state: DrcpTxSmState,
    /// The IRP link was operational at the last Receive machine step.
    pub irp_operational: bool,
    /// DRCPDU waiting for the Receive machine; a newer arrival wins.
    pub rx_drcpdu: Option<Drcpdu>,
    /// Liveness timer for the Receive machine.
    pub current_while_timer: u32,
    /// Cadence timer for the Transmit machine.
    pub tx_when_timer: u32,
    /// Need to transmit.
    pub ntt: bool,
    /// Hold transmission until the gateway/aggregator logic has run.
    pub tx_hold: bool,
    /// One DRCPDU may still be transmitted this cycle.
    pub tx_opportunity: bool,
    /// Home admin values or aggregator state changed.
    pub new_home_info: bool,
    /// The recorded neighbor state changed.
    pub new_nbor_state: bool,
    /// The reflected sequence numbers changed.
    pub new_reflected_state: bool,
}

impl DistributedRelay {
    /// Builds a relay over `aggregator` from its config and optional IRP.
    pub fn new(
        index: RelayIndex,
        aggregator: AggIndex,
        config: RelayConfig,
        irp: Option<Box<dyn LinkService>>,
    ) -> Self {
        let admin_irp_state = IrpState {
            drcp_short_timeout: config.short_timeout,
            irc_data: config.irc_data,
            ..IrpState::default()
        };
        let mut relay = Self {
            index,
            aggregator,
            irp,
            timers: config.timers,
            stats: RelayStats::default(),
            requests: VecDeque::new(),
            indications: VecDeque::new(),
            portal_system: config.portal_system,
            portal_key: config.portal_key,
            gateway_enabled: true,
            admin_irp_state,
            gateway_algorithm: config.gateway_algorithm,
            gateway_service_digest: config.gateway_service_digest,
            cscd_gateway_control: config.cscd_gateway_control,
            gateway_enable_mask: ConversationMask::full(),
            gateway_preference_mask: ConversationMask::full(),
            drcp_enabled: config.drcp_enabled,
            drcp_version: 2,
            drcp_destination: MacAddress::NEAREST_NON_TPMR_BRIDGE,
            home_agg_state: AggState::default(),
            home_gw_state: GwState::default(),
            home_gw_preference: GwPreference::default(),
            last_tx_agg_sequence: 0,
            last_tx_gw_sequence: 0,
            last_tx_gp_sequence: 0,
            home_irp_state: admin_irp_state,
            nbor_system: SystemId::ZERO,
            nbor_key: 0,
            nbor_irp_state: IrpState::default(),
            nbor_agg_state: AggState::default(),
            nbor_gw_state: GwState::default(),
            nbor_gw_preference: GwPreference::default(),
            reflected_irp_state: IrpState::default(),
            reflected_agg_sequence: 0,
            reflected_gw_sequence: 0,
            reflected_gp_sequence: 0,
            dr_solo: true,
            dr_operational: false,
            enable_irc_data: false,
            differ_drni: false,
            gateway_sync_mask: ConversationMask::new(),
            aggregator_selection: [PortalSide::None; CONVERSATION_ID_COUNT],
            gateway_selection: [PortalSide::None; CONVERSATION_ID_COUNT],
            home_gateway_mask: ConversationMask::new(),
            nbor_gateway_mask: ConversationMask::new(),
            home_aggregator_mask: ConversationMask::new(),
            nbor_aggregator_mask: ConversationMask::new(),
            rx_state: DrcpRxSmState::Initialize,
            tx_state: DrcpTxSmState::NoTx,
            irp_operational: false,
            rx_drcpdu: None,
            current_while_timer: 0,
            tx_when_timer: 0,
            ntt: false,
            tx_hold: false,
            tx_opportunity: false,
            new_home_info: false,
            new_nbor_state: false,
            new_reflected_state: false,
        };
        relay.reset();
        relay
    }

    /// Returns the relay to its power-on state, keeping configuration.
    pub fn reset(&mut self) {
        self.dr_operational = false;
        if self.irp.is_some() {
            // Start paired so the first run flips to solo and pushes the
            // operational portal identity out to the aggregator.
            self.dr_solo = false;
            self.reset_home_state();
            self.new_home_info = true;
            self.reset_portal_vectors();
        }
        self.rx_drcpdu = None;
        self.home_irp_state = self.admin_irp_state;
        self.nbor_system = SystemId::ZERO;
        self.nbor_key = 0;
        self.nbor_irp_state = IrpState::default();
        self.nbor_agg_state.reset();
        self.nbor_gw_state.reset();
        self.nbor_gw_preference.reset();
        self.reflected_irp_state = IrpState::default();
        self.reflected_agg_sequence = 0;
        self.reflected_gw_sequence = 0;
        self.reflected_gp_sequence = 0;
        self.gateway_sync_mask.clear_all();
        self.differ_drni = false;
        super::rx::reset(self);
        super::tx::reset(self);
    }

    /// Advances the DRCP timers by one tick.
    pub fn timer_tick(&mut self) {
        if self.irp.is_some() {
            self.current_while_timer = self.current_while_timer.saturating_sub(1);
            self.tx_when_timer = self.tx_when_timer.saturating_sub(1);
        }
    }

    /// Resets the three home vectors and their transmit bookkeeping.
    fn reset_home_state(&mut self) {
        self.home_agg_state.reset();
        self.home_gw_state.reset();
        self.home_gw_preference.reset();
        self.last_tx_agg_sequence = 0;
        self.last_tx_gw_sequence = 0;
        self.last_tx_gp_sequence = 0;
    }

    /// Clears both selection vectors and all four forwarding masks.
    fn reset_portal_vectors(&mut self) {
        self.aggregator_selection.fill(PortalSide::None);
        self.gateway_selection.fill(PortalSide::None);
        self.home_aggregator_mask.clear_all();
        self.home_gateway_mask.clear_all();
        self.nbor_aggregator_mask.clear_all();
        self.nbor_gateway_mask.clear_all();
    }

    /// Replaces the admin portal identity.
    pub fn set_portal(&mut self, system: SystemId, key: u16) {
        self.portal_system = system;
        self.portal_key = key;
    }

    /// Enables or disables the gateway toward the client.
    pub fn set_gateway_enabled(&mut self, enabled: bool) {
        self.gateway_enabled = enabled;
        self.new_home_info = true;
    }

    /// Replaces the per-CID admin gateway enable.
    pub fn set_gateway_enable_mask(&mut self, mask: ConversationMask) {
        self.gateway_enable_mask = mask;
        self.new_home_info = true;
    }

    /// Replaces the per-CID admin gateway preference.
    pub fn set_gateway_preference_mask(&mut self, mask: ConversationMask) {
        self.gateway_preference_mask = mask;
        self.new_home_info = true;
    }

    /// Sets the admin gateway conversation algorithm.
    pub fn set_gateway_algorithm(&mut self, algorithm: LagAlgorithm) {
        if self.gateway_algorithm != algorithm {
            self.gateway_algorithm = algorithm;
            self.new_home_info = true;
        }
    }

    /// Sets the admin gateway service mapping digest.
    pub fn set_gateway_service_digest(&mut self, digest: Digest) {
        if self.gateway_service_digest != digest {
            self.gateway_service_digest = digest;
            self.new_home_info = true;
        }
    }

    /// Turns CSCD gateway control on or off.
    pub fn set_cscd_gateway_control(&mut self, control: bool) {
        if self.cscd_gateway_control != control {
            self.cscd_gateway_control = control;
            self.new_home_info = true;
        }
    }

    /// Turns DRCP on or off on the intra-relay port.
    pub fn set_drcp_enabled(&mut self, enabled: bool) {
        self.drcp_enabled = enabled;
    }
}
