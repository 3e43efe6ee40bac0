//! Free-space categories.
//!
//! Free space is tracked to one byte of precision: category `k` covers
//! `32·k ..= 32·k + 31` bytes, capped at 255, with 255 also standing
//! for an exactly empty page. Stored values round *down* (a page never
//! promises more than it has); requested values round *up* (a request
//! must be satisfiable by any page in the matching category).

use fheap_types::PAGE_SIZE;

/// Bytes per category step.
pub const CATEGORY_STEP: usize = 32;

/// Highest category.
pub const MAX_CATEGORY: u8 = 255;

/// Category recorded for a page with `size` free bytes:
/// `min(255, size / 32)`. `None` when `size` exceeds the page size.
#[must_use]
pub fn category_for(size: usize) -> Option<u8> {
    if size > PAGE_SIZE {
        return None;
    }
    Some((size / CATEGORY_STEP).min(usize::from(MAX_CATEGORY)) as u8)
}

/// Category a request for `size` bytes needs: the smallest category
/// whose every member has at least `size` bytes, i.e. `ceil(size / 32)`
/// capped at 255. `None` when the request can never be satisfied.
#[must_use]
pub fn category_needed(size: usize) -> Option<u8> {
    if size > PAGE_SIZE {
        return None;
    }
    Some((size.div_ceil(CATEGORY_STEP)).min(usize::from(MAX_CATEGORY)) as u8)
}
