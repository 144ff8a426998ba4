//! Representation flags threaded through encode/decode

use std::ops::{BitOr, BitOrAssign};

/// Per-call representation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    /// No special representation.
    pub const NONE: Flags = Flags(0);

    /// Booleans travel as 16-bit `VARIANT_BOOL` (`0xFFFF` / `0x0000`)
    /// instead of a single byte.
    pub const VARIANT_BOOL: Flags = Flags(1 << 0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}
