//! Flag sets shared by the keyed containers and the context.

use bitflags::bitflags;

bitflags! {
    /// Per-context mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CtxFlags: u32 {
        /// Load the query interpreter into the context.
        const USE_QL = 1 << 0;
        /// Suppress interactive prompts and banners.
        const BATCH_MODE = 1 << 1;
    }
}

bitflags! {
    /// Flags accepted by `lookup` on hashes, tries, and tables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SearchFlags: u32 {
        /// Match the key byte-for-byte (the default when no bit is set).
        const EXACT = 1 << 0;
        /// Longest-common-prefix match (tries only).
        const LCP = 1 << 1;
        /// Insert the key when absent.
        const ADD = 1 << 2;
    }
}

bitflags! {
    /// Cursor direction and endpoint flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CursorFlags: u32 {
        /// Walk in ascending order (the default).
        const ASCENDING = 1 << 0;
        /// Walk in descending order.
        const DESCENDING = 1 << 1;
        /// Exclude the `min` endpoint.
        const GT = 1 << 2;
        /// Exclude the `max` endpoint.
        const LT = 1 << 3;
    }
}

/// How `set_value` combines the incoming bytes with the stored cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Replace the stored value.
    #[default]
    Set,
    /// Numeric increment for integer-sized cells, append otherwise.
    Incr,
    /// Concatenate onto the stored value.
    Append,
}

impl CursorFlags {
    /// True when the descending bit is set.
    #[must_use]
    pub const fn is_descending(self) -> bool {
        self.contains(Self::DESCENDING)
    }
}
