//! The slotted page.
//!
//! ```text
//! +----------------------+--------------------------------+
//! | header (16 B)        | slot[0] slot[1] ...            |
//! +------------+---------+--------------------------------+
//! | ... slot[N]| ^ lower                                  |
//! |                        free space                     |
//! |                                 v upper               |
//! +------------+------------------------------------------+
//! |            | item[N] ... item[1] item[0] |  special   |
//! +------------+-----------------------------+------------+
//! ```
//!
//! Header fields are little-endian: lsn (8 B), flags (2 B), lower (2 B),
//! upper (2 B), special (2 B). `lower` is the end of the slot array,
//! `upper` the lowest item start; the bytes between are free. A page is
//! initialized iff `upper != 0`.

use fheap_error::{FerroError, Result};
use fheap_types::{SlotIndex, PAGE_SIZE};

use crate::slot::{Slot, SlotFlag, SLOT_SIZE};

/// Byte offset of the log-sequence-number field.
pub const LSN_OFFSET: usize = 0;
/// Byte offset of the flags field.
pub const FLAGS_OFFSET: usize = 8;
/// Byte offset of the lower-offset field.
pub const LOWER_OFFSET: usize = 10;
/// Byte offset of the upper-offset field.
pub const UPPER_OFFSET: usize = 12;
/// Byte offset of the special-offset field.
pub const SPECIAL_OFFSET: usize = 14;
/// Byte offset where the slot array starts.
pub const SLOTS_OFFSET: usize = 16;

/// Hard cap on the number of slots a page can carry.
pub const MAX_SLOT_COUNT: u32 = (PAGE_SIZE / SLOT_SIZE) as u32;

/// Special-region size the heap access method reserves on tuple pages.
pub const SPECIAL_SIZE_HEAP: usize = 10;

bitflags::bitflags! {
    /// Page-header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        /// Every tuple on the page is visible to every snapshot. Must be
        /// kept in step with the relation's visibility map.
        const ALL_VISIBLE = 0x0001;
    }
}

// ---------------------------------------------------------------------------
// Header accessors
// ---------------------------------------------------------------------------

fn read_u16(page: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([page[at], page[at + 1]])
}

fn write_u16(page: &mut [u8], at: usize, v: u16) {
    page[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

/// The page's log sequence number.
#[must_use]
pub fn lsn(page: &[u8]) -> u64 {
    u64::from_le_bytes(page[LSN_OFFSET..LSN_OFFSET + 8].try_into().expect("8 bytes"))
}

/// Set the page's log sequence number.
pub fn set_lsn(page: &mut [u8], lsn: u64) {
    page[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
}

/// The raw flags word.
#[must_use]
pub fn flags(page: &[u8]) -> PageFlags {
    PageFlags::from_bits_retain(read_u16(page, FLAGS_OFFSET))
}

/// Overwrite the flags word.
pub fn set_flags(page: &mut [u8], flags: PageFlags) {
    write_u16(page, FLAGS_OFFSET, flags.bits());
}

/// End of the slot array.
#[must_use]
pub fn lower(page: &[u8]) -> u16 {
    read_u16(page, LOWER_OFFSET)
}

/// Set the end of the slot array.
pub fn set_lower(page: &mut [u8], v: u16) {
    write_u16(page, LOWER_OFFSET, v);
}

/// Lowest item start.
#[must_use]
pub fn upper(page: &[u8]) -> u16 {
    read_u16(page, UPPER_OFFSET)
}

/// Set the lowest item start.
pub fn set_upper(page: &mut [u8], v: u16) {
    write_u16(page, UPPER_OFFSET, v);
}

/// Start of the special region.
#[must_use]
pub fn special(page: &[u8]) -> u16 {
    read_u16(page, SPECIAL_OFFSET)
}

/// Set the start of the special region.
pub fn set_special(page: &mut [u8], v: u16) {
    write_u16(page, SPECIAL_OFFSET, v);
}

/// Whether the all-visible bit is set.
#[must_use]
pub fn is_all_visible(page: &[u8]) -> bool {
    flags(page).contains(PageFlags::ALL_VISIBLE)
}

/// Set the all-visible bit. The caller pairs this with a VM update.
pub fn set_all_visible(page: &mut [u8]) {
    set_flags(page, flags(page) | PageFlags::ALL_VISIBLE);
}

/// Clear the all-visible bit. The caller pairs this with a VM update.
pub fn clear_all_visible(page: &mut [u8]) {
    set_flags(page, flags(page) - PageFlags::ALL_VISIBLE);
}

// ---------------------------------------------------------------------------
// Initialization and free space
// ---------------------------------------------------------------------------

/// Initialize an empty page, reserving `special_size` bytes at the end.
pub fn init(page: &mut [u8], special_size: usize) {
    debug_assert!(special_size <= PAGE_SIZE - SLOTS_OFFSET);
    page.fill(0);
    set_lsn(page, 0);
    set_flags(page, PageFlags::empty());
    set_lower(page, SLOTS_OFFSET as u16);
    let special = (PAGE_SIZE - special_size) as u16;
    set_upper(page, special);
    set_special(page, special);
}

/// A zeroed page has `upper == 0`; any initialized page does not.
#[must_use]
pub fn is_initialized(page: &[u8]) -> bool {
    upper(page) != 0
}

/// Bytes between the slot array and the lowest item.
#[must_use]
pub fn free_space(page: &[u8]) -> usize {
    usize::from(upper(page).saturating_sub(lower(page)))
}

// ---------------------------------------------------------------------------
// Slot array
// ---------------------------------------------------------------------------

/// Number of slots currently allocated on the page.
#[must_use]
pub fn slot_count(page: &[u8]) -> u32 {
    let lo = usize::from(lower(page));
    if lo <= SLOTS_OFFSET {
        return 0;
    }
    ((lo - SLOTS_OFFSET) / SLOT_SIZE) as u32
}

fn slot_pos(idx: SlotIndex) -> usize {
    SLOTS_OFFSET + idx.get() as usize * SLOT_SIZE
}

/// Read slot `idx`.
pub fn slot(page: &[u8], idx: SlotIndex) -> Result<Slot> {
    if idx.get() >= slot_count(page) {
        return Err(FerroError::SlotOutOfRange { slot: idx.get() });
    }
    let at = slot_pos(idx);
    Ok(Slot::from_raw(u32::from_le_bytes(
        page[at..at + SLOT_SIZE].try_into().expect("4 bytes"),
    )))
}

/// Overwrite slot `idx`, which must already be allocated.
pub fn set_slot(page: &mut [u8], idx: SlotIndex, slot: Slot) -> Result<()> {
    if idx.get() >= slot_count(page) {
        return Err(FerroError::SlotOutOfRange { slot: idx.get() });
    }
    let at = slot_pos(idx);
    page[at..at + SLOT_SIZE].copy_from_slice(&slot.raw().to_le_bytes());
    Ok(())
}

/// Lowest unused slot, if any.
#[must_use]
pub fn find_free_slot(page: &[u8]) -> Option<SlotIndex> {
    let count = slot_count(page);
    (0..count)
        .map(SlotIndex::new)
        .find(|&idx| slot(page, idx).is_ok_and(Slot::is_unused))
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Add an item to the page and return the slot index it landed in.
///
/// With `hint` the caller pins the target slot: an existing index is
/// overwritten, the index one past the current array appends. Without a
/// hint the lowest unused slot is reused, or a fresh slot appended.
pub fn add_item(page: &mut [u8], item: &[u8], hint: Option<SlotIndex>) -> Result<SlotIndex> {
    let count = slot_count(page);
    let (idx, appending) = match hint {
        Some(idx) if idx.get() < count => (idx, false),
        Some(idx) if idx.get() == count => (idx, true),
        Some(idx) => return Err(FerroError::SlotOutOfRange { slot: idx.get() }),
        None => match find_free_slot(page) {
            Some(idx) => (idx, false),
            None => (SlotIndex::new(count), true),
        },
    };
    if appending && idx.get() >= MAX_SLOT_COUNT {
        return Err(FerroError::SlotArrayFull);
    }

    let needed = item.len() + if appending { SLOT_SIZE } else { 0 };
    let free = free_space(page);
    if needed > free {
        return Err(FerroError::PageFull { free, needed });
    }

    let new_upper = usize::from(upper(page)) - item.len();
    page[new_upper..new_upper + item.len()].copy_from_slice(item);
    set_upper(page, new_upper as u16);
    if appending {
        set_lower(page, (slot_pos(idx) + SLOT_SIZE) as u16);
    }
    let len = u16::try_from(item.len()).map_err(|_| FerroError::PayloadTooLarge {
        size: item.len(),
        max: PAGE_SIZE,
    })?;
    set_slot(
        page,
        idx,
        Slot::new(new_upper as u16, SlotFlag::Normal, len),
    )?;
    Ok(idx)
}

/// Borrow the payload of slot `idx`.
pub fn item(page: &[u8], idx: SlotIndex) -> Result<&[u8]> {
    let slot = slot(page, idx)?;
    let start = usize::from(slot.offset());
    Ok(&page[start..start + usize::from(slot.len())])
}

/// Mutably borrow the payload of slot `idx`.
pub fn item_mut(page: &mut [u8], idx: SlotIndex) -> Result<&mut [u8]> {
    let slot = slot(page, idx)?;
    let start = usize::from(slot.offset());
    Ok(&mut page[start..start + usize::from(slot.len())])
}

// ---------------------------------------------------------------------------
// Compaction
// ---------------------------------------------------------------------------

/// Squeeze the item region so all free space is contiguous.
///
/// Every occupied slot's payload moves to the highest still-free
/// position, in descending slot order; unused slots stay where they
/// are. Slot indexes never change, so tids held by other pages stay
/// valid.
pub fn compact(page: &mut [u8]) {
    let count = slot_count(page);

    // Stage all live payloads before writing any: slot-index order is
    // not offset order, so an in-place move could overwrite a payload
    // that has not been relocated yet.
    let mut staged = Vec::with_capacity(count as usize);
    for raw_idx in (0..count).rev() {
        let idx = SlotIndex::new(raw_idx);
        let slot = slot(page, idx).expect("index below slot_count");
        if slot.is_unused() {
            continue;
        }
        let start = usize::from(slot.offset());
        let len = usize::from(slot.len());
        staged.push((idx, slot, page[start..start + len].to_vec()));
    }

    let mut target = usize::from(special(page));
    for (idx, slot, payload) in staged {
        target -= payload.len();
        page[target..target + payload.len()].copy_from_slice(&payload);
        set_slot(page, idx, slot.with_offset(target as u16)).expect("index below slot_count");
    }
    set_upper(page, target as u16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fresh_page() -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        init(&mut page, SPECIAL_SIZE_HEAP);
        page
    }

    #[test]
    fn init_layout() {
        let page = fresh_page();
        assert!(is_initialized(&page));
        assert_eq!(lower(&page), SLOTS_OFFSET as u16);
        assert_eq!(upper(&page), (PAGE_SIZE - SPECIAL_SIZE_HEAP) as u16);
        assert_eq!(special(&page), (PAGE_SIZE - SPECIAL_SIZE_HEAP) as u16);
        assert_eq!(lsn(&page), 0);
        assert_eq!(slot_count(&page), 0);
        assert!(!is_all_visible(&page));
    }

    #[test]
    fn zeroed_page_is_uninitialized() {
        let page = vec![0u8; PAGE_SIZE];
        assert!(!is_initialized(&page));
    }

    #[test]
    fn header_round_trip() {
        let mut page = fresh_page();
        set_lsn(&mut page, 0xDEAD_BEEF_0123);
        assert_eq!(lsn(&page), 0xDEAD_BEEF_0123);
        set_lower(&mut page, 40);
        assert_eq!(lower(&page), 40);
        set_upper(&mut page, 4000);
        assert_eq!(upper(&page), 4000);
        set_special(&mut page, 8000);
        assert_eq!(special(&page), 8000);
        set_flags(&mut page, PageFlags::ALL_VISIBLE);
        assert_eq!(flags(&page), PageFlags::ALL_VISIBLE);
    }

    #[test]
    fn all_visible_bit() {
        let mut page = fresh_page();
        set_all_visible(&mut page);
        assert!(is_all_visible(&page));
        clear_all_visible(&mut page);
        assert!(!is_all_visible(&page));
    }

    #[test]
    fn add_and_get_item() {
        let mut page = fresh_page();
        let idx = add_item(&mut page, &[1, 2, 3], None).unwrap();
        assert_eq!(idx, SlotIndex::FIRST);
        assert_eq!(item(&page, idx).unwrap(), &[1, 2, 3]);
        assert_eq!(slot_count(&page), 1);

        let idx2 = add_item(&mut page, &[9; 10], None).unwrap();
        assert_eq!(idx2, SlotIndex::new(1));
        assert_eq!(item(&page, idx2).unwrap(), &[9; 10]);
        // Items grow down from the special region.
        assert!(slot(&page, idx2).unwrap().offset() < slot(&page, idx).unwrap().offset());
    }

    #[test]
    fn add_item_reuses_unused_slot() {
        let mut page = fresh_page();
        add_item(&mut page, &[1], None).unwrap();
        let middle = add_item(&mut page, &[2], None).unwrap();
        add_item(&mut page, &[3], None).unwrap();

        let freed = slot(&page, middle).unwrap().with_flag(SlotFlag::Unused);
        set_slot(&mut page, middle, freed).unwrap();

        let idx = add_item(&mut page, &[4, 4], None).unwrap();
        assert_eq!(idx, middle);
        assert_eq!(item(&page, idx).unwrap(), &[4, 4]);
        assert_eq!(slot_count(&page), 3);
    }

    #[test]
    fn add_item_hint_appends_or_overwrites() {
        let mut page = fresh_page();
        let idx = add_item(&mut page, &[1], Some(SlotIndex::FIRST)).unwrap();
        assert_eq!(idx, SlotIndex::FIRST);

        // Hint at an existing slot overwrites it.
        let again = add_item(&mut page, &[7, 7], Some(SlotIndex::FIRST)).unwrap();
        assert_eq!(again, SlotIndex::FIRST);
        assert_eq!(item(&page, again).unwrap(), &[7, 7]);

        // Hint past the array end fails.
        let err = add_item(&mut page, &[8], Some(SlotIndex::new(5))).unwrap_err();
        assert!(matches!(err, FerroError::SlotOutOfRange { slot: 5 }));
    }

    #[test]
    fn add_item_respects_free_space() {
        let mut page = fresh_page();
        let free = free_space(&page);
        // One byte too large once the new slot is accounted for.
        let item_bytes = vec![0u8; free - SLOT_SIZE + 1];
        let err = add_item(&mut page, &item_bytes, None).unwrap_err();
        assert!(matches!(err, FerroError::PageFull { .. }));

        // Exactly fitting succeeds.
        let item_bytes = vec![0u8; free - SLOT_SIZE];
        add_item(&mut page, &item_bytes, None).unwrap();
        assert_eq!(free_space(&page), 0);
    }

    #[test]
    fn free_space_shrinks_by_item_plus_slot() {
        let mut page = fresh_page();
        let before = free_space(&page);
        add_item(&mut page, &[0; 100], None).unwrap();
        assert_eq!(free_space(&page), before - 100 - SLOT_SIZE);
    }

    #[test]
    fn get_item_out_of_range() {
        let page = fresh_page();
        let err = item(&page, SlotIndex::new(0)).unwrap_err();
        assert!(matches!(err, FerroError::SlotOutOfRange { .. }));
    }

    #[test]
    fn compact_preserves_live_items_and_frees_space() {
        let mut page = fresh_page();
        let a = add_item(&mut page, &[1; 50], None).unwrap();
        let b = add_item(&mut page, &[2; 60], None).unwrap();
        let c = add_item(&mut page, &[3; 70], None).unwrap();

        let freed = slot(&page, b).unwrap().with_flag(SlotFlag::Unused);
        set_slot(&mut page, b, freed).unwrap();
        let before = free_space(&page);

        compact(&mut page);

        // Freed bytes coalesced into the free region; slots kept their
        // indexes and payloads.
        assert_eq!(free_space(&page), before + 60);
        assert_eq!(item(&page, a).unwrap(), &[1; 50]);
        assert_eq!(item(&page, c).unwrap(), &[3; 70]);
        assert_eq!(slot_count(&page), 3);
        assert!(slot(&page, b).unwrap().is_unused());
    }

    proptest! {
        #[test]
        fn compact_is_byte_preserving(
            sizes in proptest::collection::vec(1usize..200, 1..20),
            free_mask in proptest::collection::vec(proptest::bool::ANY, 1..20),
        ) {
            let mut page = fresh_page();
            let mut live = Vec::new();
            for (i, &size) in sizes.iter().enumerate() {
                let fill = (i % 251) as u8;
                let bytes = vec![fill; size];
                let Ok(idx) = add_item(&mut page, &bytes, None) else { break };
                live.push((idx, bytes));
            }
            // Free a pseudo-random subset.
            let mut kept = Vec::new();
            for (i, (idx, bytes)) in live.into_iter().enumerate() {
                if free_mask.get(i).copied().unwrap_or(false) {
                    let s = slot(&page, idx).unwrap().with_flag(SlotFlag::Unused);
                    set_slot(&mut page, idx, s).unwrap();
                } else {
                    kept.push((idx, bytes));
                }
            }

            let before = free_space(&page);
            compact(&mut page);
            prop_assert!(free_space(&page) >= before);
            for (idx, bytes) in kept {
                prop_assert_eq!(item(&page, idx).unwrap(), bytes.as_slice());
            }
        }

        #[test]
        fn free_space_monotone_under_add(sizes in proptest::collection::vec(0usize..300, 0..30)) {
            let mut page = fresh_page();
            let mut prev = free_space(&page);
            for size in sizes {
                if add_item(&mut page, &vec![0u8; size], None).is_ok() {
                    let now = free_space(&page);
                    prop_assert!(now <= prev);
                    prev = now;
                }
            }
        }
    }
}
