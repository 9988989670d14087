//! Distributed relay: DRNI over an intra-relay port.
//!
//! A [`DistributedRelay`] fronts one aggregator and pairs it with a
//! neighbor chassis into a single portal:
//!
//! ```text
//!   irp.poll() ──► DRCPDU ──► DRCP Receive ──► neighbor vectors, NTT
//!        │                          │
//!      data                         ▼
//!        │           gateway/aggregator logic ──► per-CID selections,
//!        ▼                          │             forwarding masks
//!   relay paths ◄─── masks          ▼
//!   gateway ↔ IRP ↔ aggregator   DRCP Transmit ──► irp.send(DRCPDU)
//! ```
//!
//! The machines are free functions over `&mut DistributedRelay`, run once
//! per engine cycle after the per-port machines, so an aggregator change
//! feeds the same cycle's DRCPDU. Without an IRP the relay degenerates to
//! a transparent pass-through between its gateway queues and the
//! aggregator.

mod forward;
mod machine;
mod rx;
mod state;
mod tx;
mod types;

use crate::aggregator::Aggregator;
use crate::observer::LagContext;

/// Upper bound on chained transitions in one machine run.
pub(crate) const MAX_STEPS: u32 = 10;

pub use state::{AggState, CscdState, GwPreference, GwState, IrpState};
pub use types::{
    DistributedRelay, DrcpRxSmState, DrcpTxSmState, PortalSide, RelayConfig, RelayStats,
};

/// Runs one relay cycle: frame relay first, then the DRCP machines and
/// the gateway/aggregator logic.
pub(crate) fn run(
    relay: &mut DistributedRelay,
    agg: &mut Aggregator,
    ctx: &LagContext,
    single_step: bool,
) {
    if relay.irp.is_none() {
        forward::run_transparent(relay, agg);
        return;
    }

    forward::poll_irp(relay, agg);
    forward::relay_down(relay, agg);
    forward::relay_up(relay, agg);

    // One DRCPDU may go out per cycle.
    relay.tx_opportunity = true;
    rx::run(relay, agg, ctx, single_step);
    machine::run(relay, agg, ctx);
    tx::run(relay, agg, ctx, single_step);

    // The relay moves client frames while its own LAG links distribute or
    // while the neighbor's do and the IRC can carry data across.
    relay.dr_operational = agg.operational
        || (relay.enable_irc_data && !relay.nbor_agg_state.active_links.is_empty());
}
