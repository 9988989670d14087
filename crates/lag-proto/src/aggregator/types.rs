//! Aggregator state and configuration.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use lag_types::{
    ConversationId, ConversationMask, Digest, LagAlgorithm, LinkNumber, MacAddress, SystemId,
    CONVERSATION_ID_COUNT,
};

use crate::pdu::Frame;
use crate::{AggIndex, PortIndex};
#[cfg(feature = "drni")]
use crate::RelayIndex;

/// Built-in conversation-to-link assignment rules.
///
/// The engine turns the active rule plus the current active link list into
/// the conversation link vector; the same inputs feed the digest
/// advertised to the partner, so both ends can tell when they disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvLinkMap {
    /// Even conversation IDs on the lowest active link, odd on the second;
    /// with one link everything lands on it.
    #[default]
    EvenOdd,
    /// Every conversation on the lowest active link.
    ActiveStandby,
    /// Conversation ID modulo eight picks among up to eight active links.
    EightLinkSpread,
    /// Explicit per-conversation priority lists from management.
    AdminTable,
}

/// Construction-time parameters for an aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Actor system identifier; matches the ports'.
    pub system: SystemId,
    /// Management-visible aggregator identifier.
    pub aggregator_identifier: u16,
    /// Admin key; ports with this oper key may join.
    pub admin_key: u16,
    /// MAC address presented by the aggregated interface.
    pub mac: MacAddress,
    /// Port algorithm used to classify frames into conversation IDs.
    pub algorithm: LagAlgorithm,
    /// Conversation-to-link assignment rule.
    pub conv_link_map: ConvLinkMap,
    /// Per-conversation link priority lists, used by `AdminTable`.
    pub admin_link_map: BTreeMap<ConversationId, Vec<LinkNumber>>,
    /// Service to conversation ID mapping for service-keyed algorithms.
    pub service_map: BTreeMap<u32, ConversationId>,
    /// Discard frames arriving on a link their conversation is not
    /// assigned to.
    pub admin_dwc: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            system: SystemId::ZERO,
            aggregator_identifier: 0,
            admin_key: 0,
            mac: MacAddress::ZERO,
            algorithm: LagAlgorithm::UNSPECIFIED,
            conv_link_map: ConvLinkMap::EvenOdd,
            admin_link_map: BTreeMap::new(),
            service_map: BTreeMap::new(),
            admin_dwc: false,
        }
    }
}

impl AggregatorConfig {
    /// Builds a config with defaults for everything but the identity.
    pub fn new(system: SystemId, aggregator_identifier: u16, admin_key: u16) -> Self {
        Self {
            system,
            aggregator_identifier,
            admin_key,
            ..Self::default()
        }
    }
}

/// Counters bumped by distribution and collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Frames handed to a member link for transmission.
    pub frames_distributed: u64,
    /// Frames delivered to the client queue.
    pub frames_collected: u64,
    /// Frames dropped because no active link carries their conversation.
    pub discarded_no_link: u64,
    /// Frames dropped by discard-wrong-conversation.
    pub discarded_wrong_conversation: u64,
    /// Frames dropped because the client queue was full.
    pub client_queue_drops: u64,
}

/// One aggregator: the client-facing end of a LAG and the anchor for
/// conversation-sensitive distribution state.
#[derive(Debug)]
pub struct Aggregator {
    /// This aggregator's slot in the engine's arena.
    pub index: AggIndex,
    /// Management-visible identifier.
    pub aggregator_identifier: u16,
    /// MAC address presented by the aggregated interface.
    pub mac: MacAddress,
    /// Counters.
    pub stats: AggregatorStats,

    /// Actor admin system identifier.
    pub actor_admin_system: SystemId,
    /// Actor oper system identifier (a portal may override it).
    pub actor_oper_system: SystemId,
    /// Admin key.
    pub admin_key: u16,
    /// Oper key (a portal may override it).
    pub oper_key: u16,
    /// Partner system of the LAG formed on this aggregator.
    pub partner_system: SystemId,
    /// Partner key of the LAG.
    pub partner_oper_key: u16,
    /// The LAG consists of exactly one individual port.
    pub individual: bool,

    /// Some member port is distributing.
    pub operational: bool,

    /// Attached member ports, in arena order.
    pub lag_ports: Vec<PortIndex>,
    /// Link numbers currently distributing, sorted ascending.
    pub active_lag_links: Vec<LinkNumber>,

    /// Admin port algorithm; member ports advertise it.
    pub actor_algorithm: LagAlgorithm,
    /// Conversation-to-link assignment rule.
    pub conv_link_map: ConvLinkMap,
    /// Per-conversation link priority lists, used by `AdminTable`.
    pub admin_link_map: BTreeMap<ConversationId, Vec<LinkNumber>>,
    /// Service to conversation ID mapping.
    pub service_map: BTreeMap<u32, ConversationId>,
    /// Digest over the conversation-to-link assignment.
    pub link_digest: Digest,
    /// Digest over the service mapping.
    pub service_digest: Digest,
    /// Partner's port algorithm, rolled up from member ports.
    pub partner_algorithm: LagAlgorithm,
    /// Partner's conversation link digest.
    pub partner_link_digest: Digest,
    /// Partner's service mapping digest.
    pub partner_service_digest: Digest,

    /// Admin discard-wrong-conversation.
    pub admin_dwc: bool,
    /// Oper discard-wrong-conversation; on only while both ends agree on
    /// the distribution parameters.
    pub oper_dwc: bool,
    /// Partner disagrees on the port algorithm.
    pub partner_algorithm_differs: bool,
    /// Partner disagrees on the conversation link digest.
    pub partner_link_digest_differs: bool,
    /// Partner disagrees on the service mapping digest.
    pub partner_service_digest_differs: bool,

    /// Link number carrying each conversation ID; 0 means none.
    pub conversation_link_vector: Vec<LinkNumber>,
    /// Member port carrying each conversation ID.
    pub conversation_port_vector: Vec<Option<PortIndex>>,
    /// Conversation IDs with an active link assigned.
    pub operational_mask: ConversationMask,
    /// Conversation IDs this aggregator collects.
    pub collection_mask: ConversationMask,
    /// Conversation IDs this aggregator distributes.
    pub distribution_mask: ConversationMask,

    /// Distributed relay this aggregator belongs to, if any.
    #[cfg(feature = "drni")]
    pub relay: Option<RelayIndex>,
    /// Portal identity this aggregator must present; the relay rewrites it
    /// when the portal forms or falls back to solo operation.
    #[cfg(feature = "drni")]
    pub drni_system: SystemId,
    /// Portal key paired with `drni_system`.
    #[cfg(feature = "drni")]
    pub drni_key: u16,
    /// The relay changed the portal identity; selection must push it.
    #[cfg(feature = "drni")]
    pub change_drni_solo: bool,
    /// The relay's last recorded solo/paired view.
    #[cfg(feature = "drni")]
    pub drni_solo: bool,
    /// Distribution state changed; the relay must refresh its home
    /// aggregator vector.
    #[cfg(feature = "drni")]
    pub change_relay_agg_state: bool,
    /// Partner (system, key) every member port must agree on, imposed by
    /// the relay so both portal systems aggregate toward one partner.
    #[cfg(feature = "drni")]
    pub drni_partner_restriction: Option<(SystemId, u16)>,

    /// Client frames awaiting distribution, oldest first.
    pub egress: VecDeque<Frame>,
    /// Collected frames awaiting the client, oldest first.
    pub collected: VecDeque<Frame>,

    /// Management changed the actor system identifier.
    pub change_actor_system: bool,
    /// Management changed the admin key.
    pub change_admin_key: bool,
    /// Management changed a distribution parameter (algorithm, map, DWC).
    pub change_dist_alg: bool,
    /// A member link number changed while active.
    pub change_link_state: bool,
}

impl Aggregator {
    /// Builds an aggregator from its config.
    pub fn new(index: AggIndex, config: AggregatorConfig) -> Self {
        let mut agg = Self {
            index,
            aggregator_identifier: config.aggregator_identifier,
            mac: config.mac,
            stats: AggregatorStats::default(),
            actor_admin_system: config.system,
            actor_oper_system: config.system,
            admin_key: config.admin_key,
            oper_key: config.admin_key,
            partner_system: SystemId::ZERO,
            partner_oper_key: 0,
            individual: false,
            operational: false,
            lag_ports: Vec::new(),
            active_lag_links: Vec::new(),
            actor_algorithm: config.algorithm,
            conv_link_map: config.conv_link_map,
            admin_link_map: config.admin_link_map,
            service_map: config.service_map,
            link_digest: Digest::ZERO,
            service_digest: Digest::ZERO,
            partner_algorithm: LagAlgorithm::NONE,
            partner_link_digest: Digest::ZERO,
            partner_service_digest: Digest::ZERO,
            admin_dwc: config.admin_dwc,
            oper_dwc: false,
            // No partner yet, so every comparison starts disagreeing.
            partner_algorithm_differs: true,
            partner_link_digest_differs: true,
            partner_service_digest_differs: true,
            conversation_link_vector: vec![0; CONVERSATION_ID_COUNT],
            conversation_port_vector: vec![None; CONVERSATION_ID_COUNT],
            operational_mask: ConversationMask::new(),
            collection_mask: ConversationMask::new(),
            distribution_mask: ConversationMask::new(),
            #[cfg(feature = "drni")]
            relay: None,
            #[cfg(feature = "drni")]
            drni_system: SystemId::ZERO,
            #[cfg(feature = "drni")]
            drni_key: 0,
            #[cfg(feature = "drni")]
            change_drni_solo: false,
            #[cfg(feature = "drni")]
            drni_solo: false,
            #[cfg(feature = "drni")]
            change_relay_agg_state: false,
            #[cfg(feature = "drni")]
            drni_partner_restriction: None,
            egress: VecDeque::new(),
            collected: VecDeque::new(),
            change_actor_system: false,
            change_admin_key: false,
            change_dist_alg: false,
            change_link_state: false,
        };
        agg.refresh_digests();
        agg
    }

    /// True while no port holds this aggregator.
    pub fn is_free(&self) -> bool {
        self.lag_ports.is_empty()
    }

    /// Recomputes the advertised digests from the administered maps.
    ///
    /// The link digest folds the assignment rule itself, so two systems
    /// running different rules disagree even with empty tables. An empty
    /// service map yields the zero digest, the conventional "nothing
    /// administered" value.
    pub(crate) fn refresh_digests(&mut self) {
        let mut words = vec![match self.conv_link_map {
            ConvLinkMap::EvenOdd => 1u64,
            ConvLinkMap::ActiveStandby => 2,
            ConvLinkMap::EightLinkSpread => 3,
            ConvLinkMap::AdminTable => 4,
        }];
        if self.conv_link_map == ConvLinkMap::AdminTable {
            for (cid, links) in &self.admin_link_map {
                words.push((*cid as u64) << 16 | links.len() as u64);
                words.extend(links.iter().map(|&link| link as u64));
            }
        }
        self.link_digest = Digest::fold(words);

        self.service_digest = if self.service_map.is_empty() {
            Digest::ZERO
        } else {
            Digest::fold(
                self.service_map
                    .iter()
                    .map(|(service, cid)| (*service as u64) << 16 | *cid as u64),
            )
        };
    }

    /// Sets the actor admin system identifier.
    ///
    /// Deferred like the port key setter: the change flag is raised only
    /// when admin and oper currently agree, so a portal override in force
    /// is not clobbered until the portal itself reconciles.
    pub fn set_actor_system(&mut self, system: SystemId) {
        self.change_actor_system |=
            system != self.actor_admin_system && self.actor_oper_system == self.actor_admin_system;
        self.actor_admin_system = system;
    }

    /// Sets the admin key, deferred the same way as the system identifier.
    pub fn set_admin_key(&mut self, key: u16) {
        self.change_admin_key |= key != self.admin_key && self.oper_key == self.admin_key;
        self.admin_key = key;
    }

    /// Sets the port algorithm.
    pub fn set_algorithm(&mut self, algorithm: LagAlgorithm) {
        if algorithm != self.actor_algorithm {
            self.actor_algorithm = algorithm;
            self.change_dist_alg = true;
        }
    }

    /// Sets the conversation-to-link assignment rule.
    pub fn set_conv_link_map(&mut self, map: ConvLinkMap) {
        if map != self.conv_link_map {
            self.conv_link_map = map;
            self.change_dist_alg = true;
        }
    }

    /// Replaces the explicit per-conversation link priority lists.
    pub fn set_admin_link_map(&mut self, map: BTreeMap<ConversationId, Vec<LinkNumber>>) {
        self.admin_link_map = map;
        self.change_dist_alg = true;
    }

    /// Replaces the service to conversation ID mapping.
    pub fn set_service_map(&mut self, map: BTreeMap<u32, ConversationId>) {
        self.service_map = map;
        self.change_dist_alg = true;
    }

    /// Sets admin discard-wrong-conversation.
    pub fn set_admin_dwc(&mut self, dwc: bool) {
        if dwc != self.admin_dwc {
            self.admin_dwc = dwc;
            self.change_dist_alg = true;
        }
    }
}
