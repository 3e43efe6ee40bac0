//! Primary error type for Ferroheap operations.
//!
//! One structured enum covers the whole storage kernel. Concurrency
//! conflicts on individual tuples (being modified, already updated,
//! invisible) are deliberately *not* errors — they are ordinary return
//! values of the heap layer so callers can apply isolation-level policy.

use thiserror::Error;

/// Primary error type for Ferroheap operations.
#[derive(Error, Debug)]
pub enum FerroError {
    // === I/O ===
    /// Underlying file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read returned fewer bytes than a full page.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A write stored fewer bytes than a full page.
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    // === Invalid arguments ===
    /// Page id does not exist in the fork.
    #[error("page {page} is out of range")]
    PageOutOfRange { page: u32 },

    /// Slot index is past the page's slot array.
    #[error("slot {slot} is out of range")]
    SlotOutOfRange { slot: u32 },

    /// Payload cannot fit in a page even when empty.
    #[error("payload of {size} bytes exceeds the page capacity of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Requested free-space size is not representable.
    #[error("free-space request of {size} bytes is invalid")]
    InvalidSpaceRequest { size: usize },

    // === Not found ===
    /// A tid does not address a live slot.
    #[error("no tuple at page {page}, slot {slot}")]
    TupleNotFound { page: u32, slot: u32 },

    // === Exhaustion ===
    /// The fork already ends at the maximum page id.
    #[error("relation fork is at the maximum page id and cannot grow")]
    RelationFull,

    /// Page has no room for the item.
    #[error("page has {free} free bytes, item needs {needed}")]
    PageFull { free: usize, needed: usize },

    /// Every buffer in the pool is pinned.
    #[error("no evictable buffer: all {pool_size} buffers are in use")]
    BufferPoolExhausted { pool_size: usize },

    /// The page already carries its maximum number of slots.
    #[error("page slot array is full")]
    SlotArrayFull,

    // === Corruption ===
    /// On-disk bytes are not a valid page.
    #[error("page image is malformed: {detail}")]
    Corrupt { detail: String },

    // === Internal ===
    /// Internal invariant violation (a bug, not a user error).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an error, mirroring the failure taxonomy the
/// heap layer promises to its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Programmer error; retrying the identical call cannot succeed.
    InvalidArgument,
    /// The addressed object does not exist.
    NotFound,
    /// A finite resource ran out; retry after something is released.
    Exhausted,
    /// The storage layer failed; state was released before returning.
    Io,
    /// On-disk bytes failed validation.
    Corrupt,
    /// A bug in the engine.
    Internal,
}

impl FerroError {
    /// Classify this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::ShortRead { .. } | Self::ShortWrite { .. } => ErrorClass::Io,
            Self::PageOutOfRange { .. }
            | Self::SlotOutOfRange { .. }
            | Self::PayloadTooLarge { .. }
            | Self::InvalidSpaceRequest { .. } => ErrorClass::InvalidArgument,
            Self::TupleNotFound { .. } => ErrorClass::NotFound,
            Self::RelationFull
            | Self::PageFull { .. }
            | Self::BufferPoolExhausted { .. }
            | Self::SlotArrayFull => ErrorClass::Exhausted,
            Self::Corrupt { .. } => ErrorClass::Corrupt,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether retrying the operation can succeed once resources free up.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Exhausted
        )
    }

    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using [`FerroError`].
pub type Result<T> = std::result::Result<T, FerroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = FerroError::ShortRead {
            expected: 8192,
            actual: 100,
        };
        assert_eq!(err.to_string(), "short read: expected 8192 bytes, got 100");

        let err = FerroError::TupleNotFound { page: 0, slot: 3 };
        assert_eq!(err.to_string(), "no tuple at page 0, slot 3");
    }

    #[test]
    fn classification() {
        assert_eq!(
            FerroError::PageOutOfRange { page: 9 }.class(),
            ErrorClass::InvalidArgument
        );
        assert_eq!(FerroError::RelationFull.class(), ErrorClass::Exhausted);
        assert_eq!(
            FerroError::corrupt("bad header").class(),
            ErrorClass::Corrupt
        );
        assert_eq!(
            FerroError::Io(std::io::Error::other("disk on fire")).class(),
            ErrorClass::Io
        );
    }

    #[test]
    fn retryability() {
        assert!(FerroError::BufferPoolExhausted { pool_size: 4 }.is_retryable());
        assert!(FerroError::PageFull { free: 0, needed: 10 }.is_retryable());
        assert!(!FerroError::internal("bug").is_retryable());
        assert!(!FerroError::SlotOutOfRange { slot: 1 }.is_retryable());
    }

    #[test]
    fn io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: FerroError = io.into();
        assert!(matches!(err, FerroError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Io);
    }
}
