//! Cell header
//!
//! Every heap-allocated cell starts with a `GcHeader`.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ GcHeader (16 bytes, 8-byte aligned)     │
//! │  - kind: CellKind (2 bytes)             │
//! │  - flags: u8                            │
//! │  - age: u8 (minor cycles survived)      │
//! │  - size: u32 (total, incl. header)      │
//! │  - forward: u64 (relocation target)     │
//! ├─────────────────────────────────────────┤
//! │ payload (size - 16 bytes)               │
//! └─────────────────────────────────────────┘
//! ```

use crate::gc::metadata::CellKind;
use crate::gc::segment::CellAddr;

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Cell is reachable (set during a full collection's mark phase).
pub(crate) const FLAG_MARKED: u8 = 1 << 0;
/// Cell has been relocated; `forward` holds the new address.
pub(crate) const FLAG_FORWARDED: u8 = 1 << 1;
/// Cell's kind declares a finalizer.
pub(crate) const FLAG_FINALIZABLE: u8 = 1 << 2;
/// Cell is variable-length (has a trailing element array).
pub(crate) const FLAG_VARIABLE: u8 = 1 << 3;

/// Header stored in front of each allocated cell.
///
/// The kind tag and size never change after construction.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    kind: CellKind,
    flags: u8,
    age: u8,
    size: u32,
    forward: u64,
}

impl GcHeader {
    /// Create a header for a freshly allocated cell.
    pub(crate) fn new(kind: CellKind, size: usize, flags: u8) -> Self {
        debug_assert!(size <= u32::MAX as usize);
        debug_assert_eq!(size % 8, 0);
        Self {
            kind,
            flags,
            age: 0,
            size: size as u32,
            forward: 0,
        }
    }

    /// The cell's kind tag.
    #[inline]
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Total allocation size in bytes, header included.
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Minor collection cycles this cell has survived.
    #[inline]
    pub fn age(&self) -> u8 {
        self.age
    }

    #[inline]
    pub(crate) fn bump_age(&mut self) {
        self.age = self.age.saturating_add(1);
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.flags & FLAG_MARKED != 0
    }

    #[inline]
    pub(crate) fn mark(&mut self) {
        self.flags |= FLAG_MARKED;
    }

    #[inline]
    pub(crate) fn unmark(&mut self) {
        self.flags &= !FLAG_MARKED;
    }

    #[inline]
    pub(crate) fn is_forwarded(&self) -> bool {
        self.flags & FLAG_FORWARDED != 0
    }

    /// Record the cell's relocation target.
    #[inline]
    pub(crate) fn forward_to(&mut self, dest: CellAddr) {
        self.forward = dest.as_ptr() as u64;
        self.flags |= FLAG_FORWARDED;
    }

    /// The relocation target recorded by [`GcHeader::forward_to`].
    #[inline]
    pub(crate) fn forwarded(&self) -> CellAddr {
        debug_assert!(self.is_forwarded());
        CellAddr::from_ptr(self.forward as *mut u8)
    }

    #[inline]
    pub(crate) fn clear_forward(&mut self) {
        self.forward = 0;
        self.flags &= !FLAG_FORWARDED;
    }

    #[inline]
    pub(crate) fn is_finalizable(&self) -> bool {
        self.flags & FLAG_FINALIZABLE != 0
    }

    /// Whether the cell carries a trailing variable-length array.
    #[inline]
    pub fn is_variable(&self) -> bool {
        self.flags & FLAG_VARIABLE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_and_alignment() {
        assert_eq!(std::mem::size_of::<GcHeader>(), HEADER_SIZE);
        assert_eq!(std::mem::align_of::<GcHeader>(), 8);
    }

    #[test]
    fn test_header_mark_unmark() {
        let mut header = GcHeader::new(CellKind(3), 64, 0);
        assert!(!header.is_marked());
        header.mark();
        assert!(header.is_marked());
        header.unmark();
        assert!(!header.is_marked());
        assert_eq!(header.kind(), CellKind(3));
        assert_eq!(header.size(), 64);
    }

    #[test]
    fn test_header_age() {
        let mut header = GcHeader::new(CellKind(0), 16, 0);
        assert_eq!(header.age(), 0);
        header.bump_age();
        header.bump_age();
        assert_eq!(header.age(), 2);
    }

    #[test]
    fn test_header_flags() {
        let header = GcHeader::new(CellKind(1), 32, FLAG_FINALIZABLE | FLAG_VARIABLE);
        assert!(header.is_finalizable());
        assert!(header.is_variable());
        assert!(!header.is_marked());
        assert!(!header.is_forwarded());
    }

    #[test]
    fn test_header_forwarding() {
        let mut header = GcHeader::new(CellKind(0), 16, 0);
        let mut target = GcHeader::new(CellKind(0), 16, 0);
        let dest = CellAddr::from_ptr(&mut target as *mut GcHeader as *mut u8);
        header.forward_to(dest);
        assert!(header.is_forwarded());
        assert_eq!(header.forwarded(), dest);
        header.clear_forward();
        assert!(!header.is_forwarded());
    }
}
