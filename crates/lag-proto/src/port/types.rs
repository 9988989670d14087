//! Aggregation port state and configuration.

use lag_types::{Digest, LacpPortState, LagAlgorithm, LinkNumber, PortId, SystemId};
use serde::{Deserialize, Serialize};

use crate::config::TimerProfile;
use crate::link::LinkService;
use crate::pdu::Lacpdu;
use crate::{AggIndex, PortIndex};

/// Selection value assigned to a port by the selection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selected {
    /// No aggregator chosen; the Mux machine detaches.
    #[default]
    Unselected,
    /// Bound to an aggregator and allowed to attach.
    Selected,
    /// A compatible aggregator exists but cannot be joined right now.
    Standby,
}

/// Receive machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxSmState {
    /// Fresh port; partner runs on administrative defaults.
    #[default]
    Initialize,
    /// The link is down.
    PortDisabled,
    /// The link is up but LACP is administratively off.
    LacpDisabled,
    /// No partner PDU within the liveness bound; waiting on a short timer.
    Expired,
    /// Gave up on the partner; running on administrative defaults.
    Defaulted,
    /// Live partner information received within the liveness bound.
    Current,
}

/// Periodic machine states (version 1 only; version 2 folds the periodic
/// cadence into the Transmit machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodicSmState {
    /// No periodic transmission.
    #[default]
    NoPeriodic,
    /// Transmitting every fast interval.
    FastPeriodic,
    /// Transmitting every slow interval.
    SlowPeriodic,
    /// One-shot state that raises NTT and re-arms the cadence.
    PeriodicTx,
}

/// Mux machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxSmState {
    /// Not attached to any aggregator.
    #[default]
    Detached,
    /// Selected; holding for the aggregate-wait (and wait-to-restore) time.
    Waiting,
    /// Attached; actor declares sync but does not collect.
    Attached,
    /// Collecting inbound frames.
    Collecting,
    /// Collecting and distributing.
    Distributing,
}

/// Transmit machine states.
///
/// Version 1 rests in `NoTx`/`ResetTxCount`/`TxLacpdu`; version 2 rests in
/// `NoTx`/`FastPeriodic`/`SlowPeriodic` and passes through `TxLacpdu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxSmState {
    /// Transmission disabled.
    #[default]
    NoTx,
    /// Version 1: rate-limit window restarted, waiting for NTT.
    ResetTxCount,
    /// Version 2: fast cadence armed.
    FastPeriodic,
    /// Version 2: slow cadence armed.
    SlowPeriodic,
    /// A PDU was handed to the link.
    TxLacpdu,
}

/// Construction-time parameters for an aggregation port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Actor system identifier; every port of one device uses the same.
    pub system: SystemId,
    /// Port number, unique within the device.
    pub port_number: u16,
    /// Port priority.
    pub port_priority: u16,
    /// Admin port key; only ports with equal oper keys aggregate.
    pub admin_key: u16,
    /// LACP version to speak (1 or 2).
    pub lacp_version: u8,
    /// Admin actor state bits.
    pub actor_state: LacpPortState,
    /// Partner system assumed while no partner PDUs arrive.
    pub partner_admin_system: SystemId,
    /// Partner key assumed while defaulted. Distinct per port, so
    /// defaulted ports keep distinct LAG IDs and stay individual.
    pub partner_admin_key: u16,
    /// Partner port number assumed while defaulted.
    pub partner_admin_port: u16,
    /// Partner state bits assumed while defaulted.
    pub partner_state: LacpPortState,
    /// Admin link number; 0 picks `(port_number & 0xff) + 1`.
    pub admin_link_number: LinkNumber,
    /// Timer values for every machine on this port.
    pub timers: TimerProfile,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            system: SystemId::ZERO,
            port_number: 0,
            port_priority: 0,
            admin_key: 0,
            lacp_version: 2,
            actor_state: LacpPortState::DEFAULT_ACTOR,
            partner_admin_system: SystemId::ZERO,
            partner_admin_key: 0,
            partner_admin_port: 0,
            partner_state: LacpPortState::DEFAULT_PARTNER,
            admin_link_number: 0,
            timers: TimerProfile::default(),
        }
    }
}

impl PortConfig {
    /// Builds a config with the per-port defaults derived from the port
    /// number: partner admin key and port mirror the port number, and the
    /// admin link number is `(port_number & 0xff) + 1`.
    pub fn new(system: SystemId, port_number: u16, admin_key: u16) -> Self {
        Self {
            system,
            port_number,
            admin_key,
            partner_admin_key: port_number,
            partner_admin_port: port_number,
            ..Self::default()
        }
    }
}

/// Counters bumped by the port machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// LACPDUs received and handed to the Receive machine.
    pub lacpdu_rx: u64,
    /// LACPDUs transmitted.
    pub lacpdu_tx: u64,
    /// Data frames passed up through the collection filter.
    pub frames_collected: u64,
    /// Data frames dropped by the collection filter.
    pub frames_discarded: u64,
    /// Times the Receive machine entered `Expired`.
    pub entered_expired: u64,
    /// Times the Receive machine entered `Defaulted`.
    pub entered_defaulted: u64,
}

/// One aggregation port: a link endpoint plus every LACP variable the four
/// port machines and the selection logic operate on.
pub struct AggPort {
    /// This port's slot in the engine's arena.
    pub index: PortIndex,
    /// Management-visible port identifier.
    pub port_identifier: u16,
    /// The attached link.
    pub link: Box<dyn LinkService>,
    /// Timer values.
    pub timers: TimerProfile,
    /// Counters.
    pub stats: PortStats,

    /// LACP version the actor speaks.
    pub actor_lacp_version: u8,
    /// Actor admin system identifier.
    pub actor_admin_system: SystemId,
    /// Actor oper system identifier (follows the aggregator's).
    pub actor_oper_system: SystemId,
    /// Actor port identifier.
    pub actor_port: PortId,
    /// Actor admin port key.
    pub actor_admin_key: u16,
    /// Actor oper port key.
    pub actor_oper_key: u16,
    /// Actor admin state bits.
    pub actor_admin_state: LacpPortState,
    /// Actor oper state bits.
    pub actor_oper_state: LacpPortState,

    /// Partner admin system identifier.
    pub partner_admin_system: SystemId,
    /// Partner oper system identifier.
    pub partner_oper_system: SystemId,
    /// Partner admin port identifier.
    pub partner_admin_port: PortId,
    /// Partner oper port identifier.
    pub partner_oper_port: PortId,
    /// Partner admin key.
    pub partner_admin_key: u16,
    /// Partner oper key.
    pub partner_oper_key: u16,
    /// Partner admin state bits.
    pub partner_admin_state: LacpPortState,
    /// Partner oper state bits.
    pub partner_oper_state: LacpPortState,
    /// LACP version last recorded from the partner.
    pub partner_lacp_version: u8,

    /// LACP administratively enabled on this port.
    pub lacp_enabled: bool,
    /// Periodic machine grants transmission (always true for version 2).
    pub lacp_tx_enabled: bool,
    /// Link status cached at the last Receive step.
    pub port_operational: bool,

    /// Selection value.
    pub selected: Selected,
    /// Aggregator this port selects or was last attached to.
    pub aggregator: Option<AggIndex>,
    /// This port is done waiting and may attach.
    pub ready_n: bool,
    /// Every waiting port on the aggregator reports `ready_n`.
    pub ready: bool,
    /// The Mux machine has attached this port.
    pub actor_attached: bool,
    /// A PDU changed the recorded partner; selection re-checks port moves.
    pub new_partner: bool,
    /// This port's partner surfaced on another port; reinitialize.
    pub port_moved: bool,

    /// Receive machine state.
    pub rx_state: RxSmState,
    /// Periodic machine state.
    pub periodic_state: PeriodicSmState,
    /// Mux machine state.
    pub mux_state: MuxSmState,
    /// Transmit machine state.
    pub tx_state: TxSmState,
    /// Enable and disable collecting/distributing together.
    pub coupled_mux_control: bool,

    /// Receive liveness timer.
    pub current_while_timer: u32,
    /// Periodic cadence timer (version 1).
    pub periodic_timer: u32,
    /// Mux aggregate-wait timer.
    pub wait_while_timer: u32,
    /// Transmit cadence timer (version 2).
    pub tx_when_timer: u32,
    /// Transmit rate-limit window timer.
    pub tx_limit_timer: u32,
    /// PDUs transmitted in the current rate-limit window.
    pub tx_count: u32,
    /// Version 2: transmission permitted in this window.
    pub tx_opportunity: bool,
    /// Need to transmit.
    pub ntt: bool,

    /// Admin wait-to-restore time; 0 disables the hold.
    pub wtr_time: u16,
    /// Release the hold when the timer expires (vs. on demand only).
    pub wtr_revertive: bool,
    /// Running wait-to-restore timer.
    pub wtr_timer: u32,
    /// Recovered link still held out of the LAG.
    pub wtr_waiting: bool,

    /// LACPDU delivered this cycle, if any; consumed by the Receive step.
    pub rx_lacpdu: Option<Lacpdu>,

    /// Admin link number.
    pub admin_link_number: LinkNumber,
    /// Oper link number (may adopt the partner's, see the Receive machine).
    pub oper_link_number: LinkNumber,
    /// Partner's link number for this link.
    pub partner_link_number: LinkNumber,
    /// Actor port algorithm, copied from the aggregator.
    pub actor_algorithm: LagAlgorithm,
    /// Actor conversation link-list digest, copied from the aggregator.
    pub actor_link_digest: Digest,
    /// Actor service mapping digest, copied from the aggregator.
    pub actor_service_digest: Digest,
    /// Partner port algorithm recorded from PDUs.
    pub partner_algorithm: LagAlgorithm,
    /// Partner conversation link-list digest recorded from PDUs.
    pub partner_link_digest: Digest,
    /// Partner service mapping digest recorded from PDUs.
    pub partner_service_digest: Digest,
    /// Collector max delay advertised in transmitted PDUs.
    pub collector_max_delay: u16,
    /// Discard-wrong-conversation, copied from the aggregator.
    pub actor_dwc: bool,

    /// Management changed an actor admin value.
    pub change_actor_admin: bool,
    /// Management changed the actor admin key specifically.
    pub change_actor_admin_key: bool,
    /// Management changed a partner admin value.
    pub change_partner_admin: bool,
    /// Management changed the admin link number.
    pub change_admin_link_number: bool,
    /// Partner distribution parameters changed while collecting.
    pub change_partner_dist_alg: bool,
    /// Link number changed while the link is active.
    pub change_port_link_state: bool,
    /// Actor distributing changed; conversation masks must follow.
    pub change_actor_distributing: bool,
}

impl AggPort {
    /// Builds a port from its config and link endpoint.
    pub fn new(index: PortIndex, config: PortConfig, link: Box<dyn LinkService>) -> Self {
        let admin_link_number = if config.admin_link_number != 0 {
            config.admin_link_number
        } else {
            (config.port_number & 0x00ff) + 1
        };
        Self {
            index,
            port_identifier: config.port_number,
            link,
            timers: config.timers,
            stats: PortStats::default(),
            actor_lacp_version: config.lacp_version,
            actor_admin_system: config.system,
            actor_oper_system: config.system,
            actor_port: PortId::new(config.port_priority, config.port_number),
            actor_admin_key: config.admin_key,
            actor_oper_key: config.admin_key,
            actor_admin_state: config.actor_state,
            actor_oper_state: config.actor_state,
            partner_admin_system: config.partner_admin_system,
            partner_oper_system: config.partner_admin_system,
            partner_admin_port: PortId::new(0, config.partner_admin_port),
            partner_oper_port: PortId::new(0, config.partner_admin_port),
            partner_admin_key: config.partner_admin_key,
            partner_oper_key: config.partner_admin_key,
            partner_admin_state: config.partner_state,
            partner_oper_state: config.partner_state,
            partner_lacp_version: 1,
            lacp_enabled: true,
            lacp_tx_enabled: false,
            port_operational: false,
            selected: Selected::Unselected,
            aggregator: None,
            ready_n: false,
            ready: false,
            actor_attached: false,
            new_partner: false,
            port_moved: false,
            rx_state: RxSmState::Initialize,
            periodic_state: PeriodicSmState::NoPeriodic,
            mux_state: MuxSmState::Detached,
            tx_state: TxSmState::NoTx,
            coupled_mux_control: false,
            current_while_timer: 0,
            periodic_timer: 0,
            wait_while_timer: 0,
            tx_when_timer: 0,
            tx_limit_timer: 0,
            tx_count: 0,
            tx_opportunity: false,
            ntt: false,
            wtr_time: 0,
            wtr_revertive: true,
            wtr_timer: 0,
            wtr_waiting: false,
            rx_lacpdu: None,
            admin_link_number,
            oper_link_number: admin_link_number,
            partner_link_number: admin_link_number,
            actor_algorithm: LagAlgorithm::UNSPECIFIED,
            actor_link_digest: Digest::ZERO,
            actor_service_digest: Digest::ZERO,
            partner_algorithm: LagAlgorithm::NONE,
            partner_link_digest: Digest::ZERO,
            partner_service_digest: Digest::ZERO,
            collector_max_delay: 0,
            actor_dwc: false,
            change_actor_admin: false,
            change_actor_admin_key: false,
            change_partner_admin: false,
            change_admin_link_number: false,
            change_partner_dist_alg: false,
            change_port_link_state: false,
            change_actor_distributing: false,
        }
    }

    /// The aggregator this port is selected for, when `Selected`.
    pub fn selected_aggregator(&self) -> Option<AggIndex> {
        match self.selected {
            Selected::Selected => self.aggregator,
            _ => None,
        }
    }

    /// The aggregator this port is attached to, when in sync.
    pub fn attached_aggregator(&self) -> Option<AggIndex> {
        if self.actor_oper_state.sync {
            self.aggregator
        } else {
            None
        }
    }

    /// True when this port can pair with nothing but its default partner.
    pub fn is_individual(&self) -> bool {
        !self.actor_oper_state.aggregation
    }

    /// Sets the actor admin port key.
    ///
    /// The key-change flag is raised only when the new value differs while
    /// admin and oper currently agree; a pending dynamic-key divergence is
    /// left for the Receive machine to resolve.
    pub fn set_admin_key(&mut self, key: u16) {
        self.change_actor_admin_key |=
            key != self.actor_admin_key && self.actor_oper_key == self.actor_admin_key;
        self.change_actor_admin |= self.change_actor_admin_key;
        self.actor_admin_key = key;
    }

    /// Sets the actor port number and priority.
    pub fn set_actor_port(&mut self, priority: u16, number: u16) {
        self.actor_port = PortId::new(priority, number);
        self.change_actor_admin = true;
    }

    /// Sets the actor admin state bits.
    pub fn set_actor_admin_state(&mut self, state: LacpPortState) {
        self.actor_admin_state = state;
        self.change_actor_admin = true;
    }

    /// Sets the partner admin system identifier.
    pub fn set_partner_admin_system(&mut self, system: SystemId) {
        self.partner_admin_system = system;
        self.change_partner_admin = true;
    }

    /// Sets the partner admin key.
    pub fn set_partner_admin_key(&mut self, key: u16) {
        self.partner_admin_key = key;
        self.change_partner_admin = true;
    }

    /// Sets the partner admin port identifier.
    pub fn set_partner_admin_port(&mut self, priority: u16, number: u16) {
        self.partner_admin_port = PortId::new(priority, number);
        self.change_partner_admin = true;
    }

    /// Sets the partner admin state bits.
    pub fn set_partner_admin_state(&mut self, state: LacpPortState) {
        self.partner_admin_state = state;
        self.change_partner_admin = true;
    }

    /// Sets the admin link number. 0 is reserved and ignored here; the
    /// engine surface rejects it with an error.
    pub fn set_admin_link_number(&mut self, link: LinkNumber) {
        if link > 0 && link != self.admin_link_number {
            self.admin_link_number = link;
            self.change_admin_link_number = true;
        }
    }

    /// Enables or disables LACP on this port.
    pub fn set_lacp_enabled(&mut self, enabled: bool) {
        self.lacp_enabled = enabled;
    }

    /// Sets the LACP version the actor speaks.
    pub fn set_lacp_version(&mut self, version: u8) {
        if version != self.actor_lacp_version {
            self.actor_lacp_version = version;
            self.change_actor_admin = true;
        }
    }

    /// Sets the wait-to-restore time from its packed representation: the
    /// low 15 bits are the hold time in ticks, the top bit selects
    /// non-revertive mode.
    pub fn set_wtr_time(&mut self, packed: u16) {
        self.wtr_time = packed & 0x7fff;
        self.wtr_revertive = packed & 0x8000 == 0;
        if self.wtr_time == 0 {
            self.wtr_waiting = false;
            self.wtr_timer = 0;
        }
    }

    /// Returns the wait-to-restore time in its packed representation.
    pub fn wtr_time_packed(&self) -> u16 {
        let mut packed = self.wtr_time;
        if !self.wtr_revertive {
            packed |= 0x8000;
        }
        packed
    }

    /// True while wait-to-restore holds this port out of the LAG.
    pub fn wtr_held(&self) -> bool {
        self.wtr_waiting
    }

    /// Resets every machine and derived value, keeping admin config.
    pub fn reset(&mut self) {
        super::rx::reset(self);
        super::mux::reset(self);
        super::periodic::reset(self);
        super::tx::reset(self);

        self.ready = false;
        self.wtr_waiting = false;
        self.wtr_timer = 0;
        self.aggregator = None;
        self.actor_algorithm = LagAlgorithm::UNSPECIFIED;
        self.actor_link_digest = Digest::ZERO;
        self.actor_service_digest = Digest::ZERO;
        self.actor_dwc = false;
        self.change_actor_distributing = false;
        self.change_partner_dist_alg = false;
        self.change_port_link_state = false;
    }

    /// Advances every port timer by one tick.
    pub fn timer_tick(&mut self) {
        super::rx::timer_tick(self);
        super::mux::timer_tick(self);
        super::periodic::timer_tick(self);
        super::tx::timer_tick(self);
    }
}

impl std::fmt::Debug for AggPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggPort")
            .field("index", &self.index)
            .field("port_identifier", &self.port_identifier)
            .field("rx_state", &self.rx_state)
            .field("mux_state", &self.mux_state)
            .field("selected", &self.selected)
            .field("aggregator", &self.aggregator)
            .field("actor_oper_state", &self.actor_oper_state)
            .field("partner_oper_system", &self.partner_oper_system)
            .finish()
    }
}
