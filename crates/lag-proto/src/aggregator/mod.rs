//! Aggregators and the selection logic.
//!
//! An [`Aggregator`] is the client-facing end of a LAG: ports bind to it
//! through selection, the Mux machines attach them, and CSCD steers each
//! conversation ID to one member link. The [`selection`] module owns the
//! binding rules; it runs before the port machines each cycle so a port
//! never attaches to an aggregator another port just claimed.

mod selection;
mod types;

pub(crate) use selection::{admin_aggregator_update, run_selection};
pub use types::{Aggregator, AggregatorConfig, AggregatorStats, ConvLinkMap};
