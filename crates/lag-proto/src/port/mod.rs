//! Aggregation port: per-port LACP machines.
//!
//! Each port runs four machines over the shared [`AggPort`] state:
//!
//! ```text
//!   link.poll() ──► Receive ──► partner oper info, Selected/Unselected
//!                      │
//!                      ▼
//!   Periodic (v1) ──► NTT                    selection logic (aggregator
//!                      │                      module) assigns Selected
//!                      ▼                              │
//!   Transmit ◄── NTT, cadence                         ▼
//!       │                                    Mux ──► attach, collect,
//!       ▼                                            distribute
//!   link.send(LACPDU)
//! ```
//!
//! The machines are free functions over `&mut AggPort`; the engine module
//! sequences them and owns the cross-port work (selection, conversation
//! masks). Timers count down in ticks and fire at zero; one tick is the
//! engine's fixed scheduling interval.

mod mux;
mod periodic;
mod rx;
mod tx;
mod types;

/// Upper bound on chained transitions in one machine run.
pub(crate) const MAX_STEPS: u32 = 10;

pub(crate) use mux::run as run_mux;
pub(crate) use periodic::run as run_periodic;
pub(crate) use rx::partner_decides_link_number;
pub(crate) use rx::run as run_rx;
pub(crate) use tx::run as run_tx;

pub use types::{
    AggPort, MuxSmState, PeriodicSmState, PortConfig, PortStats, RxSmState, Selected, TxSmState,
};
