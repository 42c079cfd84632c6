//! Reserved frame-header bits and their allocation during one handshake.
//!
//! RFC 6455 leaves RSV1, RSV2 and RSV3 to extensions. Two extensions that
//! claim the same bit cannot both be active on a connection, so the negotiator
//! hands bits out first-come in offer order.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::protocol::Frame;

/// Set of reserved bits, stored in frame-header order (RSV1 is the high bit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RsvBits(u8);

impl RsvBits {
    /// No reserved bits.
    pub const NONE: Self = Self(0);
    /// RSV1 (used by permessage-deflate).
    pub const RSV1: Self = Self(0b100);
    /// RSV2.
    pub const RSV2: Self = Self(0b010);
    /// RSV3.
    pub const RSV3: Self = Self(0b001);
    /// All three reserved bits.
    pub const ALL: Self = Self(0b111);

    /// Build from raw bits; anything outside the three reserved bits is dropped.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set these bits on a frame, leaving the others as they are.
    pub fn set_on(self, frame: &mut Frame) {
        frame.rsv1 |= self.contains(Self::RSV1);
        frame.rsv2 |= self.contains(Self::RSV2);
        frame.rsv3 |= self.contains(Self::RSV3);
    }

    /// Clear these bits on a frame, leaving the others as they are.
    pub fn clear_on(self, frame: &mut Frame) {
        frame.rsv1 &= !self.contains(Self::RSV1);
        frame.rsv2 &= !self.contains(Self::RSV2);
        frame.rsv3 &= !self.contains(Self::RSV3);
    }
}

impl BitOr for RsvBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RsvBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for RsvBits {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for RsvBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = [(Self::RSV1, "RSV1"), (Self::RSV2, "RSV2"), (Self::RSV3, "RSV3")];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Claim `candidate` on top of `current`, all-or-nothing.
///
/// Returns the new mask, or `None` if any candidate bit is already claimed.
#[must_use]
pub const fn try_claim(current: RsvBits, candidate: RsvBits) -> Option<RsvBits> {
    if current.intersects(candidate) {
        None
    } else {
        Some(RsvBits(current.0 | candidate.0))
    }
}

/// Tracks the reserved bits claimed so far in one handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvAllocator {
    claimed: RsvBits,
}

impl RsvAllocator {
    /// Allocator with nothing claimed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            claimed: RsvBits::NONE,
        }
    }

    /// Bits claimed so far.
    #[must_use]
    pub const fn claimed(&self) -> RsvBits {
        self.claimed
    }

    /// Claim `candidate`, returning the new claimed mask.
    ///
    /// On overlap nothing is claimed and `None` is returned.
    pub fn try_claim(&mut self, candidate: RsvBits) -> Option<RsvBits> {
        let claimed = try_claim(self.claimed, candidate)?;
        self.claimed = claimed;
        Some(claimed)
    }
}
