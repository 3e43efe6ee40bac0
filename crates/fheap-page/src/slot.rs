//! The 32-bit slot: a pointer from the slot array to an item payload.
//!
//! Bit layout (little-endian u32): bits 0..=14 item size, bits 15..=16
//! flag, bits 17..=31 item offset. A slot's *index* is the stable
//! address of its tuple; compaction rewrites the offset but never the
//! index.

/// Width of one slot in the slot array.
pub const SLOT_SIZE: usize = 4;

const SIZE_BITS: u32 = 15;
const FLAG_BITS: u32 = 2;
const SIZE_MASK: u32 = (1 << SIZE_BITS) - 1;
const FLAG_SHIFT: u32 = SIZE_BITS;
const FLAG_MASK: u32 = ((1 << FLAG_BITS) - 1) << FLAG_SHIFT;
const OFFSET_SHIFT: u32 = SIZE_BITS + FLAG_BITS;

/// Life-cycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotFlag {
    /// Never used, or freed by a reclamation pass; may be reused.
    Unused = 0,
    /// Points at a live item.
    Normal = 1,
    /// Redirects to another slot on the same page.
    Redirected = 2,
    /// Item is dead but the slot index is still reserved.
    Dead = 3,
}

impl SlotFlag {
    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Unused,
            1 => Self::Normal,
            2 => Self::Redirected,
            _ => Self::Dead,
        }
    }
}

/// A packed slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Slot(u32);

impl Slot {
    /// An unused slot pointing nowhere.
    pub const UNUSED: Self = Self(0);

    /// Pack offset, flag, and size into a slot.
    ///
    /// Offset and size must each fit in 15 bits; with 8 KiB pages they
    /// always do.
    #[must_use]
    pub fn new(offset: u16, flag: SlotFlag, len: u16) -> Self {
        debug_assert!(u32::from(offset) <= SIZE_MASK);
        debug_assert!(u32::from(len) <= SIZE_MASK);
        Self((u32::from(offset) << OFFSET_SHIFT) | ((flag as u32) << FLAG_SHIFT) | u32::from(len))
    }

    /// Rebuild a slot from its packed representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The packed representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Byte offset of the item within the page.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u16 {
        (self.0 >> OFFSET_SHIFT) as u16
    }

    /// Byte length of the item.
    #[inline]
    #[must_use]
    pub const fn len(self) -> u16 {
        (self.0 & SIZE_MASK) as u16
    }

    /// Whether the item has zero length.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The slot's flag.
    #[inline]
    #[must_use]
    pub const fn flag(self) -> SlotFlag {
        SlotFlag::from_bits(self.0 >> FLAG_SHIFT)
    }

    /// Copy of this slot with a different item offset.
    #[must_use]
    pub fn with_offset(self, offset: u16) -> Self {
        Self::new(offset, self.flag(), self.len())
    }

    /// Copy of this slot with a different flag.
    #[must_use]
    pub fn with_flag(self, flag: SlotFlag) -> Self {
        Self::new(self.offset(), flag, self.len())
    }

    /// Whether the slot is free for reuse.
    #[inline]
    #[must_use]
    pub const fn is_unused(self) -> bool {
        matches!(self.flag(), SlotFlag::Unused)
    }

    /// Whether the slot points at a live item.
    #[inline]
    #[must_use]
    pub const fn is_normal(self) -> bool {
        matches!(self.flag(), SlotFlag::Normal)
    }
}
