//! Tagged value representation (NaN-boxed, 64-bit)
//!
//! Every runtime value fits in one 8-byte cell slot. Doubles are stored
//! verbatim; all other kinds are boxed into the quiet-NaN space.
//!
//! # Encoding
//!
//! ```text
//! Double:     any bit pattern outside the quiet-NaN tag space
//! NaN:        0x7FFA_0000_0000_0000 (canonical, produced by `Value::double`)
//! Undefined:  0x7FF8_0000_0000_0000
//! Null:       0x7FF8_0000_0000_0001
//! False:      0x7FF8_0000_0000_0002
//! True:       0x7FF8_0000_0000_0003
//! Int:        0x7FF9_0000_0000_0000 | (i32 as u32)
//! String:     0x7FFC_0000_0000_0000 | reference payload
//! Object:     0x7FFE_0000_0000_0000 | reference payload
//! ```
//!
//! Reference payloads hold 48 bits: a raw pointer by default, or a 32-bit
//! segment offset with the `compressed-pointers` feature. Identity of
//! references is decided by resolved address, never by encoded bits; use
//! [`crate::Heap::same_reference`] for that.
//!
//! A `Value` held live across a potential allocation must be reachable
//! through a root (see [`crate::Handle`]), or its content is undefined.

use crate::gc::segment::GcRef;
use std::fmt;

const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_SPECIAL: u64 = 0x7FF8_0000_0000_0000;
const TAG_INT: u64 = 0x7FF9_0000_0000_0000;
const TAG_STRING: u64 = 0x7FFC_0000_0000_0000;
const TAG_OBJECT: u64 = 0x7FFE_0000_0000_0000;

const BITS_UNDEFINED: u64 = TAG_SPECIAL;
const BITS_NULL: u64 = TAG_SPECIAL | 1;
const BITS_FALSE: u64 = TAG_SPECIAL | 2;
const BITS_TRUE: u64 = TAG_SPECIAL | 3;

/// Canonical NaN. `Value::double` folds every NaN input into this pattern so
/// the rest of the quiet-NaN space is free for tags.
const BITS_CANON_NAN: u64 = 0x7FFA_0000_0000_0000;

/// The kind of payload a [`Value`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// IEEE-754 double.
    Double,
    /// Boolean.
    Boolean,
    /// Null.
    Null,
    /// Undefined.
    Undefined,
    /// Native 32-bit integer.
    Int,
    /// Reference to a heap-allocated string cell.
    String,
    /// Reference to a heap-allocated object cell.
    Object,
}

/// NaN-boxed tagged value.
///
/// `PartialEq` compares encoded bits, which is identity for primitives and
/// encoding equality for references. Reference identity across heap layouts
/// goes through [`crate::Heap::same_reference`].
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// Create an undefined value.
    #[inline]
    pub const fn undefined() -> Self {
        Value(BITS_UNDEFINED)
    }

    /// Create a null value.
    #[inline]
    pub const fn null() -> Self {
        Value(BITS_NULL)
    }

    /// Create a boolean value.
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Value(if b { BITS_TRUE } else { BITS_FALSE })
    }

    /// Create a double value. NaN inputs are canonicalized.
    #[inline]
    pub fn double(d: f64) -> Self {
        if d.is_nan() {
            Value(BITS_CANON_NAN)
        } else {
            Value(d.to_bits())
        }
    }

    /// Create a native integer value.
    #[inline]
    pub const fn int(i: i32) -> Self {
        Value(TAG_INT | (i as u32 as u64))
    }

    /// Create a string-reference value.
    #[inline]
    pub fn string(r: GcRef) -> Self {
        Value(TAG_STRING | r.raw_bits())
    }

    /// Create an object-reference value.
    #[inline]
    pub fn object(r: GcRef) -> Self {
        Value(TAG_OBJECT | r.raw_bits())
    }

    #[inline]
    fn is_boxed(&self) -> bool {
        (self.0 & QUIET_NAN) == QUIET_NAN && self.0 != BITS_CANON_NAN
    }

    /// Check for a double payload.
    #[inline]
    pub fn is_double(&self) -> bool {
        !self.is_boxed()
    }

    /// Check for a boolean payload.
    #[inline]
    pub const fn is_boolean(&self) -> bool {
        self.0 == BITS_TRUE || self.0 == BITS_FALSE
    }

    /// Check for null.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == BITS_NULL
    }

    /// Check for undefined.
    #[inline]
    pub const fn is_undefined(&self) -> bool {
        self.0 == BITS_UNDEFINED
    }

    /// Check for a native integer payload.
    #[inline]
    pub const fn is_int(&self) -> bool {
        (self.0 & TAG_MASK) == TAG_INT
    }

    /// Check for a string reference.
    #[inline]
    pub const fn is_string(&self) -> bool {
        (self.0 & TAG_MASK) == TAG_STRING
    }

    /// Check for an object reference.
    #[inline]
    pub const fn is_object(&self) -> bool {
        (self.0 & TAG_MASK) == TAG_OBJECT
    }

    /// Check for any heap reference (string or object).
    #[inline]
    pub const fn is_reference(&self) -> bool {
        self.is_string() || self.is_object()
    }

    /// Extract the double payload. `None` on kind mismatch.
    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        if self.is_double() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    /// Extract the boolean payload. `None` on kind mismatch.
    #[inline]
    pub const fn as_boolean(&self) -> Option<bool> {
        match self.0 {
            BITS_TRUE => Some(true),
            BITS_FALSE => Some(false),
            _ => None,
        }
    }

    /// Extract the integer payload. `None` on kind mismatch.
    #[inline]
    pub const fn as_int(&self) -> Option<i32> {
        if self.is_int() {
            Some(self.0 as u32 as i32)
        } else {
            None
        }
    }

    /// Extract a string reference. `None` on kind mismatch.
    #[inline]
    pub fn as_string(&self) -> Option<GcRef> {
        if self.is_string() {
            Some(unsafe { GcRef::from_raw_bits(self.0 & PAYLOAD_MASK) })
        } else {
            None
        }
    }

    /// Extract an object reference. `None` on kind mismatch.
    #[inline]
    pub fn as_object(&self) -> Option<GcRef> {
        if self.is_object() {
            Some(unsafe { GcRef::from_raw_bits(self.0 & PAYLOAD_MASK) })
        } else {
            None
        }
    }

    /// Extract any reference payload, string or object.
    #[inline]
    pub fn as_reference(&self) -> Option<GcRef> {
        if self.is_reference() {
            Some(unsafe { GcRef::from_raw_bits(self.0 & PAYLOAD_MASK) })
        } else {
            None
        }
    }

    /// Rebind a reference value to a new target, keeping the kind tag.
    ///
    /// Used by the collector when a cell is relocated.
    #[inline]
    pub(crate) fn with_reference(self, r: GcRef) -> Value {
        debug_assert!(self.is_reference());
        Value((self.0 & TAG_MASK) | r.raw_bits())
    }

    /// The kind of the current payload.
    pub fn kind(&self) -> ValueKind {
        match self.0 & TAG_MASK {
            _ if self.is_double() => ValueKind::Double,
            TAG_INT => ValueKind::Int,
            TAG_STRING => ValueKind::String,
            TAG_OBJECT => ValueKind::Object,
            _ => match self.0 {
                BITS_NULL => ValueKind::Null,
                BITS_UNDEFINED => ValueKind::Undefined,
                _ => ValueKind::Boolean,
            },
        }
    }

    /// Raw encoded bits (debugging and tests).
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::undefined()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Double => write!(f, "double({})", self.as_double().unwrap()),
            ValueKind::Boolean => write!(f, "bool({})", self.as_boolean().unwrap()),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Undefined => write!(f, "undefined"),
            ValueKind::Int => write!(f, "int({})", self.as_int().unwrap()),
            ValueKind::String => write!(f, "string({:#x})", self.0 & PAYLOAD_MASK),
            ValueKind::Object => write!(f, "object({:#x})", self.0 & PAYLOAD_MASK),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Double => write!(f, "{}", self.as_double().unwrap()),
            ValueKind::Boolean => write!(f, "{}", self.as_boolean().unwrap()),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Undefined => write!(f, "undefined"),
            ValueKind::Int => write!(f, "{}", self.as_int().unwrap()),
            ValueKind::String => write!(f, "[string@{:#x}]", self.0 & PAYLOAD_MASK),
            ValueKind::Object => write!(f, "[object@{:#x}]", self.0 & PAYLOAD_MASK),
        }
    }
}

/// A string reference with its tag, for typed handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRef(pub GcRef);

/// An object reference with its tag, for typed handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef(pub GcRef);
