//! The LACP port state octet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The eight actor/partner state bits carried in every LACPDU.
///
/// Bit assignments follow the wire encoding, LSB first: activity,
/// short-timeout, aggregation, synchronization, collecting, distributing,
/// defaulted, expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LacpPortState {
    pub activity: bool,
    pub short_timeout: bool,
    pub aggregation: bool,
    pub sync: bool,
    pub collecting: bool,
    pub distributing: bool,
    pub defaulted: bool,
    pub expired: bool,
}

impl LacpPortState {
    /// Default actor admin state: active, short timeout, defaulted (0x43).
    pub const DEFAULT_ACTOR: LacpPortState = LacpPortState::from_octet(0x43);

    /// Default partner admin state: in sync, collecting, distributing (0x38),
    /// so that a port running on defaults can carry traffic as an
    /// individual link.
    pub const DEFAULT_PARTNER: LacpPortState = LacpPortState::from_octet(0x38);

    /// Decodes the state octet.
    pub const fn from_octet(octet: u8) -> Self {
        LacpPortState {
            activity: octet & 0x01 != 0,
            short_timeout: octet & 0x02 != 0,
            aggregation: octet & 0x04 != 0,
            sync: octet & 0x08 != 0,
            collecting: octet & 0x10 != 0,
            distributing: octet & 0x20 != 0,
            defaulted: octet & 0x40 != 0,
            expired: octet & 0x80 != 0,
        }
    }

    /// Encodes the state octet.
    pub const fn to_octet(self) -> u8 {
        (self.activity as u8)
            | (self.short_timeout as u8) << 1
            | (self.aggregation as u8) << 2
            | (self.sync as u8) << 3
            | (self.collecting as u8) << 4
            | (self.distributing as u8) << 5
            | (self.defaulted as u8) << 6
            | (self.expired as u8) << 7
    }
}

impl fmt::Display for LacpPortState {
    /// Compact flag rendering, one letter per set bit in wire order
    /// (`A`ctivity, short-`T`imeout, a`G`gregation, `S`ync, `C`ollecting,
    /// `D`istributing, de`F`aulted, e`X`pired).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.activity, 'A'),
            (self.short_timeout, 'T'),
            (self.aggregation, 'G'),
            (self.sync, 'S'),
            (self.collecting, 'C'),
            (self.distributing, 'D'),
            (self.defaulted, 'F'),
            (self.expired, 'X'),
        ];
        for (set, letter) in flags {
            write!(f, "{}", if set { letter } else { '-' })?;
        }
        Ok(())
    }
}
