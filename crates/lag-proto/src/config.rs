//! Timer profiles.
//!
//! All machines count time in engine ticks. The protocol depends only on
//! the ratios between these values; the defaults put ten ticks in one fast
//! periodic interval and keep the standard ratios from there, which keeps
//! test runs short without changing any machine behavior.

use serde::{Deserialize, Serialize};

/// LACP timer and rate-limit values, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerProfile {
    /// Interval between periodic LACPDUs while the partner wants them fast.
    pub fast_periodic: u32,
    /// Interval between periodic LACPDUs while the partner is content slow.
    pub slow_periodic: u32,
    /// Receive liveness bound while the actor uses short timeout.
    pub short_timeout: u32,
    /// Receive liveness bound while the actor uses long timeout.
    pub long_timeout: u32,
    /// Hold in the Mux `Waiting` state before a port may attach.
    pub aggregate_wait: u32,
    /// Maximum LACPDUs transmitted per rate-limit interval.
    pub tx_limit: u32,
    /// Length of the transmit rate-limit interval.
    pub tx_limit_interval: u32,
}

impl Default for TimerProfile {
    fn default() -> Self {
        Self {
            fast_periodic: 10,
            slow_periodic: 300,
            short_timeout: 30,
            long_timeout: 900,
            aggregate_wait: 20,
            tx_limit: 3,
            tx_limit_interval: 10,
        }
    }
}

/// DRCP timer values, in ticks.
///
/// DRCP's slow cadence is three fast periods (not thirty as in LACP); the
/// short and long timeouts are three missed periods of each cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcpTimerProfile {
    /// Interval between DRCPDUs while the neighbor wants them fast.
    pub fast_periodic: u32,
    /// Interval between DRCPDUs while the neighbor is content slow.
    pub slow_periodic: u32,
    /// Receive liveness bound while the home side uses short timeout.
    pub short_timeout: u32,
    /// Receive liveness bound while the home side uses long timeout.
    pub long_timeout: u32,
}

impl Default for DrcpTimerProfile {
    fn default() -> Self {
        Self {
            fast_periodic: 10,
            slow_periodic: 30,
            short_timeout: 30,
            long_timeout: 90,
        }
    }
}
