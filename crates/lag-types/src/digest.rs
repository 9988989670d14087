//! Configuration digests.

use serde::{Deserialize, Serialize};
use std::fmt;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A 16-byte digest summarizing an administered mapping table.
///
/// Two systems compare digests to decide whether their conversation
/// mappings agree; equality is the only semantics. Digests are built with
/// a deterministic fold so that identical tables always produce identical
/// values, on any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Digest(pub [u8; 16]);

impl Digest {
    /// The zero digest, advertised when no mapping is administered.
    pub const ZERO: Digest = Digest([0; 16]);

    /// Returns true if this is the zero digest.
    pub const fn is_zero(&self) -> bool {
        u128::from_be_bytes(self.0) == 0
    }

    /// Folds a word stream into a digest (FNV-1a over two lanes).
    pub fn fold(words: impl IntoIterator<Item = u64>) -> Digest {
        let mut lo = FNV_OFFSET;
        let mut hi = FNV_OFFSET ^ 0x5a5a_5a5a_5a5a_5a5a;
        for word in words {
            for byte in word.to_be_bytes() {
                lo = (lo ^ byte as u64).wrapping_mul(FNV_PRIME);
            }
            hi = (hi ^ lo).wrapping_mul(FNV_PRIME);
        }
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&hi.to_be_bytes());
        out[8..].copy_from_slice(&lo.to_be_bytes());
        Digest(out)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
