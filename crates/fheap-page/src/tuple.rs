//! The heap tuple: an 18-byte MVCC header followed by the payload.
//!
//! Header layout (little-endian): xmin u32, xmax u32, ctid (page u32 +
//! slot u32), infomask u16. `xmin` is the inserting transaction, `xmax`
//! the deleting/updating one (invalid while the tuple is live), and
//! `ctid` points at the tuple itself until an update links it forward to
//! the next version.
//!
//! The infomask bits are *hints*: a set bit is authoritative, an unset
//! bit means "not checked yet", and the commit log remains the source of
//! truth.

use fheap_error::{FerroError, Result};
use fheap_types::{Tid, TransactionId};

/// Byte length of the tuple header.
pub const TUPLE_HEADER_LEN: usize = 18;

const XMIN_OFFSET: usize = 0;
const XMAX_OFFSET: usize = 4;
const CTID_OFFSET: usize = 8;
const INFOMASK_OFFSET: usize = 16;

bitflags::bitflags! {
    /// Cached visibility hints in the tuple header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InfoMask: u16 {
        /// xmin is known committed.
        const XMIN_COMMITTED = 0x0100;
        /// xmin is known aborted / never existed.
        const XMIN_INVALID = 0x0200;
        /// xmin was frozen by vacuum; visible to everyone.
        const XMIN_FROZEN = 0x0400;
        /// xmax is known committed.
        const XMAX_COMMITTED = 0x0800;
        /// xmax is known aborted / never set.
        const XMAX_INVALID = 0x1000;
    }
}

/// A tuple view over any byte container.
///
/// `Tuple<&[u8]>` reads, `Tuple<&mut [u8]>` also writes, and
/// `Tuple<Vec<u8>>` owns a copied image (sequential scans project
/// into owned tuples so visibility checks never write through a shared
/// latch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple<B> {
    bytes: B,
}

/// Borrowed read-only tuple view.
pub type TupleRef<'a> = Tuple<&'a [u8]>;
/// Borrowed mutable tuple view.
pub type TupleMut<'a> = Tuple<&'a mut [u8]>;
/// Owned tuple image.
pub type OwnedTuple = Tuple<Vec<u8>>;

impl<B: AsRef<[u8]>> Tuple<B> {
    /// Wrap raw tuple bytes. Fails when the bytes cannot hold a header.
    pub fn new(bytes: B) -> Result<Self> {
        if bytes.as_ref().len() < TUPLE_HEADER_LEN {
            return Err(FerroError::corrupt(format!(
                "tuple of {} bytes is shorter than its header",
                bytes.as_ref().len()
            )));
        }
        Ok(Self { bytes })
    }

    /// The raw bytes, header included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    fn read_u32(&self, at: usize) -> u32 {
        let b = self.bytes.as_ref();
        u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    /// Inserting transaction id.
    #[must_use]
    pub fn xmin(&self) -> TransactionId {
        TransactionId::new(self.read_u32(XMIN_OFFSET))
    }

    /// Deleting/updating transaction id; invalid while the tuple lives.
    #[must_use]
    pub fn xmax(&self) -> TransactionId {
        TransactionId::new(self.read_u32(XMAX_OFFSET))
    }

    /// Self-or-next-version pointer.
    #[must_use]
    pub fn ctid(&self) -> Tid {
        let b = self.bytes.as_ref();
        Tid::from_bytes(
            b[CTID_OFFSET..CTID_OFFSET + Tid::ENCODED_LEN]
                .try_into()
                .expect("8 bytes"),
        )
    }

    /// The visibility hint bits.
    #[must_use]
    pub fn infomask(&self) -> InfoMask {
        let b = self.bytes.as_ref();
        InfoMask::from_bits_retain(u16::from_le_bytes([
            b[INFOMASK_OFFSET],
            b[INFOMASK_OFFSET + 1],
        ]))
    }

    /// The user payload after the header.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes.as_ref()[TUPLE_HEADER_LEN..]
    }

    /// Copy this tuple into an owned image.
    #[must_use]
    pub fn to_owned_tuple(&self) -> OwnedTuple {
        Tuple {
            bytes: self.bytes.as_ref().to_vec(),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Tuple<B> {
    fn write_u32(&mut self, at: usize, v: u32) {
        self.bytes.as_mut()[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Set the inserting transaction id.
    pub fn set_xmin(&mut self, xmin: TransactionId) {
        self.write_u32(XMIN_OFFSET, xmin.get());
    }

    /// Stamp the deleting/updating transaction id.
    pub fn set_xmax(&mut self, xmax: TransactionId) {
        self.write_u32(XMAX_OFFSET, xmax.get());
    }

    /// Point the ctid at a tuple (self, or the successor version).
    pub fn set_ctid(&mut self, ctid: Tid) {
        self.bytes.as_mut()[CTID_OFFSET..CTID_OFFSET + Tid::ENCODED_LEN]
            .copy_from_slice(&ctid.to_bytes());
    }

    /// Overwrite the infomask.
    pub fn set_infomask(&mut self, mask: InfoMask) {
        self.bytes.as_mut()[INFOMASK_OFFSET..INFOMASK_OFFSET + 2]
            .copy_from_slice(&mask.bits().to_le_bytes());
    }

    /// OR hint bits into the infomask. Hints only ever accumulate.
    pub fn set_hint(&mut self, hint: InfoMask) {
        self.set_infomask(self.infomask() | hint);
    }
}

/// Serialize a fresh tuple: header fields plus payload.
///
/// New tuples carry `xmax = invalid` and an empty infomask; the caller
/// fills the ctid in once the slot index is known.
#[must_use]
pub fn compose(xmin: TransactionId, ctid: Tid, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(TUPLE_HEADER_LEN + payload.len());
    bytes.extend_from_slice(&xmin.get().to_le_bytes());
    bytes.extend_from_slice(&TransactionId::INVALID.get().to_le_bytes());
    bytes.extend_from_slice(&ctid.to_bytes());
    bytes.extend_from_slice(&InfoMask::empty().bits().to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use fheap_types::{PageId, SlotIndex};

    fn tid(page: u32, slot: u32) -> Tid {
        Tid::new(PageId::new(page), SlotIndex::new(slot))
    }

    #[test]
    fn compose_layout() {
        let bytes = compose(TransactionId::new(15), tid(0, 1), &[1, 2, 3]);
        assert_eq!(bytes.len(), TUPLE_HEADER_LEN + 3);

        let tup = Tuple::new(bytes.as_slice()).unwrap();
        assert_eq!(tup.xmin(), TransactionId::new(15));
        assert_eq!(tup.xmax(), TransactionId::INVALID);
        assert_eq!(tup.ctid(), tid(0, 1));
        assert_eq!(tup.infomask(), InfoMask::empty());
        assert_eq!(tup.payload(), &[1, 2, 3]);
    }

    #[test]
    fn field_round_trip() {
        let mut bytes = compose(TransactionId::new(10), tid(0, 0), b"xyz");
        let mut tup = Tuple::new(bytes.as_mut_slice()).unwrap();

        tup.set_xmax(TransactionId::new(15));
        assert_eq!(tup.xmax(), TransactionId::new(15));

        tup.set_ctid(tid(7, 3));
        assert_eq!(tup.ctid(), tid(7, 3));

        tup.set_xmin(TransactionId::new(11));
        assert_eq!(tup.xmin(), TransactionId::new(11));
        // Payload untouched by header edits.
        assert_eq!(tup.payload(), b"xyz");
    }

    #[test]
    fn hints_accumulate() {
        let mut bytes = compose(TransactionId::new(10), tid(0, 0), &[]);
        let mut tup = Tuple::new(bytes.as_mut_slice()).unwrap();

        tup.set_hint(InfoMask::XMIN_COMMITTED);
        tup.set_hint(InfoMask::XMAX_INVALID);
        assert!(tup.infomask().contains(InfoMask::XMIN_COMMITTED));
        assert!(tup.infomask().contains(InfoMask::XMAX_INVALID));
        assert!(!tup.infomask().contains(InfoMask::XMIN_INVALID));
    }

    #[test]
    fn infomask_bits_are_distinct() {
        let all = [
            InfoMask::XMIN_COMMITTED,
            InfoMask::XMIN_INVALID,
            InfoMask::XMIN_FROZEN,
            InfoMask::XMAX_COMMITTED,
            InfoMask::XMAX_INVALID,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!((*a & *b).is_empty());
            }
        }
    }

    #[test]
    fn too_short_is_corrupt() {
        let err = Tuple::new(&[0u8; 4][..]).unwrap_err();
        assert!(matches!(err, FerroError::Corrupt { .. }));
    }

    #[test]
    fn owned_image_detaches() {
        let mut bytes = compose(TransactionId::new(10), tid(0, 0), &[5]);
        let owned = {
            let tup = Tuple::new(bytes.as_slice()).unwrap();
            tup.to_owned_tuple()
        };
        // Mutating the original does not affect the image.
        Tuple::new(bytes.as_mut_slice())
            .unwrap()
            .set_xmax(TransactionId::new(99));
        assert_eq!(owned.xmax(), TransactionId::INVALID);
    }
}
