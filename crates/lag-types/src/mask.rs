//! Fixed-size per-conversation-ID bit masks.

use std::fmt;
use std::ops::BitAnd;

/// Conversation IDs occupy a fixed 12-bit space.
pub type ConversationId = u16;

/// Number of distinct conversation IDs (2^12).
pub const CONVERSATION_ID_COUNT: usize = 4096;

const WORDS: usize = CONVERSATION_ID_COUNT / 64;

/// A set over the 4096 conversation IDs.
///
/// The size is fixed by the protocol; indices are taken modulo 4096 so
/// mask access can never go out of bounds.
#[derive(Clone, PartialEq, Eq)]
pub struct ConversationMask([u64; WORDS]);

impl ConversationMask {
    /// The empty mask.
    pub const fn new() -> Self {
        ConversationMask([0; WORDS])
    }

    /// The full mask (every conversation ID set).
    pub const fn full() -> Self {
        ConversationMask([u64::MAX; WORDS])
    }

    /// Tests one conversation ID.
    pub fn get(&self, cid: ConversationId) -> bool {
        let i = (cid as usize) % CONVERSATION_ID_COUNT;
        self.0[i / 64] >> (i % 64) & 1 != 0
    }

    /// Sets or clears one conversation ID.
    pub fn set(&mut self, cid: ConversationId, value: bool) {
        let i = (cid as usize) % CONVERSATION_ID_COUNT;
        if value {
            self.0[i / 64] |= 1 << (i % 64);
        } else {
            self.0[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Sets every conversation ID.
    pub fn set_all(&mut self) {
        self.0 = [u64::MAX; WORDS];
    }

    /// Clears every conversation ID.
    pub fn clear_all(&mut self) {
        self.0 = [0; WORDS];
    }

    /// Clears exactly the bits at which `before` and `after` differ.
    pub fn clear_where_changed(&mut self, before: &ConversationMask, after: &ConversationMask) {
        for (word, (b, a)) in self.0.iter_mut().zip(before.0.iter().zip(after.0.iter())) {
            *word &= !(b ^ a);
        }
    }

    /// Number of conversation IDs in the set.
    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    /// True when no conversation ID is set.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// True when every conversation ID is set.
    pub fn is_full(&self) -> bool {
        self.0.iter().all(|w| *w == u64::MAX)
    }
}

impl Default for ConversationMask {
    fn default() -> Self {
        ConversationMask::new()
    }
}

impl BitAnd for &ConversationMask {
    type Output = ConversationMask;

    fn bitand(self, rhs: &ConversationMask) -> ConversationMask {
        let mut out = [0u64; WORDS];
        for (o, (a, b)) in out.iter_mut().zip(self.0.iter().zip(rhs.0.iter())) {
            *o = a & b;
        }
        ConversationMask(out)
    }
}

impl fmt::Debug for ConversationMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationMask({} set)", self.count_ones())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_get() {
        let mut mask = ConversationMask::new();
        assert!(!mask.get(100));
        mask.set(100, true);
        assert!(mask.get(100));
        assert_eq!(mask.count_ones(), 1);
        mask.set(100, false);
        assert!(mask.is_empty());
    }

    #[test]
    fn test_index_wraps_modulo_4096() {
        let mut mask = ConversationMask::new();
        mask.set(4096, true);
        assert!(mask.get(0));
    }

    #[test]
    fn test_full_and_clear() {
        let mut mask = ConversationMask::full();
        assert!(mask.is_full());
        assert_eq!(mask.count_ones(), 4096);
        mask.clear_all();
        assert!(mask.is_empty());
        mask.set_all();
        assert!(mask.get(4095));
    }

    #[test]
    fn test_clear_where_changed() {
        let mut before = ConversationMask::new();
        before.set(1, true);
        before.set(2, true);
        let mut after = before.clone();
        after.set(2, false);
        after.set(3, true);

        let mut sync = ConversationMask::full();
        sync.clear_where_changed(&before, &after);
        assert!(sync.get(1));
        assert!(!sync.get(2));
        assert!(!sync.get(3));
        assert_eq!(sync.count_ones(), 4094);
    }

    #[test]
    fn test_bitand_for_overlap_checks() {
        let mut a = ConversationMask::new();
        let mut b = ConversationMask::new();
        a.set(7, true);
        b.set(7, true);
        b.set(8, true);
        let both = &a & &b;
        assert!(both.get(7));
        assert!(!both.get(8));
        assert_eq!(both.count_ones(), 1);
    }
}
