//! Engine error types.

use thiserror::Error;

use crate::{AggIndex, PortIndex, RelayIndex};

/// Errors returned by the engine's configuration and management surface.
///
/// The state machines themselves never fail: malformed or mismatched PDUs
/// are dropped or regress a machine through expiry, and transient absence
/// is modeled with `Option`. `LagError` covers only the operations a
/// management caller can get wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LagError {
    /// Port index outside the engine's port arena.
    #[error("no such aggregation port: {0}")]
    UnknownPort(PortIndex),

    /// Aggregator index outside the engine's aggregator arena.
    #[error("no such aggregator: {0}")]
    UnknownAggregator(AggIndex),

    /// Relay index outside the engine's relay arena.
    #[error("no such distributed relay: {0}")]
    UnknownRelay(RelayIndex),

    /// Each aggregator can serve at most one distributed relay.
    #[error("{0} is already bound to a distributed relay")]
    AggregatorInUse(AggIndex),

    /// Link number 0 is reserved for "no link".
    #[error("link number 0 is reserved")]
    ReservedLinkNumber,

    /// A conversation ID at or above the 4096-entry space.
    #[error("conversation id {0} out of range")]
    ConversationIdOutOfRange(u16),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            LagError::UnknownPort(PortIndex(3)).to_string(),
            "no such aggregation port: port3"
        );
        assert_eq!(
            LagError::AggregatorInUse(AggIndex(0)).to_string(),
            "agg0 is already bound to a distributed relay"
        );
        assert_eq!(
            LagError::ConversationIdOutOfRange(4096).to_string(),
            "conversation id 4096 out of range"
        );
    }
}
