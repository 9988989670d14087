//! System and port identifiers.
//!
//! 802.1AX orders systems and ports by the numeric concatenation of
//! priority and address/number. Every election in this workspace follows
//! the same rule: the lower value wins.

use crate::{MacAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A system identifier: 16-bit priority concatenated with a MAC address.
///
/// Ordering compares the 64-bit value `priority << 48 | mac`, so a lower
/// priority (or, at equal priority, a lower address) wins elections.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SystemId {
    pub priority: u16,
    pub addr: MacAddress,
}

impl SystemId {
    /// The all-zero system identifier, used for "no partner recorded".
    pub const ZERO: SystemId = SystemId {
        priority: 0,
        addr: MacAddress::ZERO,
    };

    /// Creates a system identifier from priority and address.
    pub const fn new(priority: u16, addr: MacAddress) -> Self {
        SystemId { priority, addr }
    }

    /// Returns the identifier as `priority << 48 | mac`.
    pub const fn as_u64(&self) -> u64 {
        (self.priority as u64) << 48 | self.addr.to_u64()
    }

    /// Builds an identifier from the packed 64-bit form.
    pub const fn from_u64(value: u64) -> Self {
        SystemId {
            priority: (value >> 48) as u16,
            addr: MacAddress::from_u64(value),
        }
    }

    /// Returns true if both priority and address are zero.
    pub const fn is_zero(&self) -> bool {
        self.priority == 0 && self.addr.is_zero()
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority, self.addr)
    }
}

impl FromStr for SystemId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prio, addr) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidSystemId(s.to_string()))?;
        let priority = prio
            .parse()
            .map_err(|_| ParseError::InvalidSystemId(s.to_string()))?;
        let addr = addr
            .parse()
            .map_err(|_| ParseError::InvalidSystemId(s.to_string()))?;
        Ok(SystemId { priority, addr })
    }
}

/// A port identifier: 16-bit priority concatenated with a port number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PortId {
    pub priority: u16,
    pub number: u16,
}

impl PortId {
    /// The all-zero port identifier.
    pub const ZERO: PortId = PortId {
        priority: 0,
        number: 0,
    };

    /// Creates a port identifier from priority and number.
    pub const fn new(priority: u16, number: u16) -> Self {
        PortId { priority, number }
    }

    /// Returns the identifier as `priority << 16 | number`.
    pub const fn as_u32(&self) -> u32 {
        (self.priority as u32) << 16 | self.number as u32
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority, self.number)
    }
}
