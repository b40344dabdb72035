//! Object and record identifiers.

use std::fmt;

/// Identifier of an entry inside a keyed container (hash, trie, table).
///
/// Ids are dense within their container, allocated from 1 upward; id 0 is
/// the reserved nil value. A deleted entry's id may be reused by a later
/// insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u32);

impl Id {
    /// The reserved "no entry" id.
    pub const NIL: Self = Self(0);
    /// Largest addressable id.
    pub const MAX: Self = Self(u32::MAX);

    /// True when this is the nil id.
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Id {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
