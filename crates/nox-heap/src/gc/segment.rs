//! Address space and reference encoding
//!
//! The whole heap lives in one reservation ([`Slab`]) of `maxHeapSize`
//! bytes. Both young semispaces and the old generation are carved out of it,
//! so every cell address is expressible as an offset from a single base.
//!
//! This module is the only place that translates between the three address
//! forms:
//! - [`CellAddr`] — a raw, internal cell address (header position)
//! - [`GcRef`] — the reference payload stored inside [`crate::Value`]s and
//!   cell fields: a raw pointer by default, a 32-bit offset with the
//!   `compressed-pointers` feature
//! - byte offsets from the slab base, used by the region accounting
//!
//! The first [`RESERVED_PREFIX`] bytes of the slab are never allocated, so
//! offset 0 (and raw bit pattern 0) never names a cell. Zeroed storage is
//! therefore never mistaken for a reference.

use crate::gc::header::GcHeader;
use crate::{HeapError, HeapResult};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Bytes at the start of the slab that are never handed out.
pub(crate) const RESERVED_PREFIX: usize = 16;

/// The slab base address. Copyable token for the translation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapBase(NonNull<u8>);

impl HeapBase {
    #[inline]
    pub(crate) fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// Raw address of a cell's header. Internal to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellAddr(NonNull<GcHeader>);

impl CellAddr {
    #[inline]
    pub(crate) fn from_ptr(ptr: *mut u8) -> Self {
        debug_assert!(!ptr.is_null());
        debug_assert_eq!(ptr as usize % 8, 0);
        CellAddr(unsafe { NonNull::new_unchecked(ptr as *mut GcHeader) })
    }

    #[inline]
    pub(crate) fn as_ptr(self) -> *mut GcHeader {
        self.0.as_ptr()
    }

    /// Borrow the header at this address.
    ///
    /// # Safety
    ///
    /// The address must name a live, initialized cell, and no conflicting
    /// mutable borrow of the header may exist.
    #[inline]
    pub(crate) unsafe fn header<'a>(self) -> &'a GcHeader {
        &*self.as_ptr()
    }

    /// Mutably borrow the header at this address.
    ///
    /// # Safety
    ///
    /// Same as [`CellAddr::header`], plus exclusivity.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn header_mut<'a>(self) -> &'a mut GcHeader {
        &mut *self.as_ptr()
    }

    /// Address of the cell payload (just past the header).
    #[inline]
    pub(crate) fn payload(self) -> *mut u8 {
        unsafe { (self.0.as_ptr() as *mut u8).add(crate::gc::header::HEADER_SIZE) }
    }

    /// Byte offset of this cell from the slab base.
    #[inline]
    pub(crate) fn byte_offset(self, base: HeapBase) -> usize {
        self.0.as_ptr() as usize - base.as_ptr() as usize
    }

    /// Cell address at `offset` bytes past the slab base.
    #[inline]
    pub(crate) fn from_base_offset(base: HeapBase, offset: usize) -> Self {
        debug_assert!(offset >= RESERVED_PREFIX);
        CellAddr::from_ptr(unsafe { base.as_ptr().add(offset) })
    }
}

/// An encoded heap reference, as stored in values and cell fields.
///
/// A `GcRef` is only stable until the next allocation or collection; to hold
/// one across such a call, root it through a [`crate::Handle`].
#[cfg(not(feature = "compressed-pointers"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    ptr: NonNull<GcHeader>,
}

/// An encoded heap reference: a 32-bit offset from the slab base.
///
/// A `GcRef` is only stable until the next allocation or collection; to hold
/// one across such a call, root it through a [`crate::Handle`].
#[cfg(feature = "compressed-pointers")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    off: std::num::NonZeroU32,
}

#[cfg(not(feature = "compressed-pointers"))]
impl GcRef {
    #[inline]
    pub(crate) fn from_addr(addr: CellAddr, _base: HeapBase) -> Self {
        GcRef {
            ptr: unsafe { NonNull::new_unchecked(addr.as_ptr()) },
        }
    }

    #[inline]
    pub(crate) fn to_addr(self, _base: HeapBase) -> CellAddr {
        CellAddr::from_ptr(self.ptr.as_ptr() as *mut u8)
    }

    /// The 48-bit payload stored in a NaN-boxed value.
    #[inline]
    pub(crate) fn raw_bits(self) -> u64 {
        let bits = self.ptr.as_ptr() as u64;
        debug_assert_eq!(bits >> 48, 0, "heap address exceeds the 48-bit payload");
        bits
    }

    /// Decode a reference payload produced by [`GcRef::raw_bits`].
    ///
    /// # Safety
    ///
    /// `bits` must come from `raw_bits` of a reference into the live heap.
    #[inline]
    pub(crate) unsafe fn from_raw_bits(bits: u64) -> Self {
        debug_assert_ne!(bits, 0);
        GcRef {
            ptr: NonNull::new_unchecked(bits as usize as *mut GcHeader),
        }
    }
}

#[cfg(feature = "compressed-pointers")]
impl GcRef {
    #[inline]
    pub(crate) fn from_addr(addr: CellAddr, base: HeapBase) -> Self {
        let off = addr.byte_offset(base);
        debug_assert!(off >= RESERVED_PREFIX);
        debug_assert!(off <= u32::MAX as usize);
        GcRef {
            off: unsafe { std::num::NonZeroU32::new_unchecked(off as u32) },
        }
    }

    #[inline]
    pub(crate) fn to_addr(self, base: HeapBase) -> CellAddr {
        CellAddr::from_base_offset(base, self.off.get() as usize)
    }

    /// The 48-bit payload stored in a NaN-boxed value.
    #[inline]
    pub(crate) fn raw_bits(self) -> u64 {
        self.off.get() as u64
    }

    /// Decode a reference payload produced by [`GcRef::raw_bits`].
    ///
    /// # Safety
    ///
    /// `bits` must come from `raw_bits` of a reference into the live heap.
    #[inline]
    pub(crate) unsafe fn from_raw_bits(bits: u64) -> Self {
        GcRef {
            off: std::num::NonZeroU32::new_unchecked(bits as u32),
        }
    }
}

/// The heap's single address reservation.
pub(crate) struct Slab {
    base: NonNull<u8>,
    layout: Layout,
}

impl Slab {
    /// Reserve `size` bytes, 8-byte aligned. The memory is uninitialized;
    /// each allocation zeroes its own payload.
    pub(crate) fn new(size: usize) -> HeapResult<Self> {
        let layout = Layout::from_size_align(size, 8)
            .map_err(|e| HeapError::InvalidConfig(e.to_string()))?;
        let ptr = unsafe { alloc(layout) };
        let base = NonNull::new(ptr).ok_or(HeapError::OutOfMemory {
            requested: size,
            max: size,
        })?;
        Ok(Slab { base, layout })
    }

    #[inline]
    pub(crate) fn base(&self) -> HeapBase {
        HeapBase(self.base)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}
