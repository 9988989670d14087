//! Test infrastructure for the link aggregation engine.
//!
//! Provides:
//! - [`SimLink`]: paired in-memory links with per-direction fault
//!   injection
//! - back-to-back LACP and two-chassis portal fixtures
//! - mask and relay state verification helpers
//!
//! The end-to-end scenarios live in this crate's `tests/` directory.

mod fixtures;
mod sim;
mod verification;

pub use fixtures::{
    aggregatable_port, back_to_back, converge, portal_pair, trace_init, LagSide, PortalChassis,
};
pub use sim::{SimLink, SimWireHandle};
pub use verification::{masks_disjoint, masks_partition, relay_masks_exclusive, relay_settled};
