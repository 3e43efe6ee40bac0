//! Transaction identifiers with wrap-around ordering.
//!
//! A transaction id is a 32-bit unsigned counter that is allowed to wrap.
//! Two reserved values exist below the first allocatable id: 0 is invalid
//! (used for "no xmax") and 2 is the frozen id that orders before every
//! normal id. Ordering between two normal ids is the sign of their
//! 32-bit difference, so the id space behaves like a circle with half the
//! space "in the past" and half "in the future".

use std::fmt;

/// A 32-bit transaction id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TransactionId(u32);

impl TransactionId {
    /// Invalid id. Used as "no transaction", e.g. the xmax of a tuple
    /// that has not been deleted.
    pub const INVALID: Self = Self(0);

    /// Frozen id. Orders before every normal id; assigned by vacuum when
    /// a tuple becomes visible to all transactions forever.
    pub const FROZEN: Self = Self(2);

    /// First id the allocator hands out, and the id it wraps back to.
    pub const FIRST_NORMAL: Self = Self(3);

    /// Create a transaction id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this id is a normal (allocatable) id.
    #[inline]
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 >= Self::FIRST_NORMAL.0
    }

    /// Whether this id is the invalid id.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Wrap-around-aware "comes after" comparison.
    ///
    /// For two normal ids the comparison is the sign of their 32-bit
    /// difference; for reserved ids plain unsigned comparison applies,
    /// which keeps the invalid and frozen ids before everything normal.
    #[must_use]
    pub fn follows(self, other: Self) -> bool {
        if !self.is_normal() || !other.is_normal() {
            return self.0 >= other.0;
        }
        let diff = self.0.wrapping_sub(other.0);
        (diff as i32) > 0
    }

    /// The next id in allocation order, skipping the reserved values on
    /// wrap-around.
    #[must_use]
    pub fn advance(self) -> Self {
        let next = Self(self.0.wrapping_add(1));
        if next.is_normal() {
            next
        } else {
            Self::FIRST_NORMAL
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
