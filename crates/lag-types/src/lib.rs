//! Common types for the 802.1AX link-aggregation control plane.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the LACP and DRCP state machinery:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`SystemId`]: priority + MAC system identifiers (lower value wins)
//! - [`PortId`]: priority + number port identifiers
//! - [`LacpPortState`]: the eight actor/partner state bits of a LACPDU
//! - [`LagAlgorithm`]: frame distribution algorithm identifiers
//! - [`Digest`]: 16-byte configuration digests
//! - [`ConversationMask`]: fixed 4096-bit per-conversation-ID sets

mod algorithm;
mod digest;
mod ids;
mod mac;
mod mask;
mod state;

pub use algorithm::LagAlgorithm;
pub use digest::Digest;
pub use ids::{PortId, SystemId};
pub use mac::MacAddress;
pub use mask::{ConversationId, ConversationMask, CONVERSATION_ID_COUNT};
pub use state::LacpPortState;

/// Link numbers identify aggregation links within a LAG; 0 means "no link".
pub type LinkNumber = u16;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid system identifier format: {0}")]
    InvalidSystemId(String),
}
