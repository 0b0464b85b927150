//! Per-kind cell metadata
//!
//! The collector has no compile-time knowledge of cell layouts. Each kind
//! registers a [`Metadata`] record once — the ordered reference fields, an
//! optional finalizer, and an optional variable-length array descriptor —
//! and the collector drives every trace from that record.
//!
//! Getting a declaration wrong is not a recoverable condition: an undeclared
//! reference field makes the collector under-trace and corrupt the heap.
//! The builder and table therefore fail fast (panic) on contract violations
//! instead of returning errors.

use rustc_hash::FxHashMap;

/// Static kind tag of a cell, used to look up its [`Metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKind(pub u16);

/// How a declared field stores its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A tagged [`crate::Value`] slot. Traced when it holds a reference.
    Slot,
    /// A bare [`crate::GcRef`], stored as its raw bits. An all-zero field is
    /// treated as absent, so zero-initialized cells trace cleanly.
    Cell,
}

/// Bytes occupied by one declared field or array element.
pub(crate) const FIELD_SIZE: usize = 8;

/// Finalizer callback, invoked with the cell payload pointer after the
/// collector has proven the cell unreachable and before its memory is
/// reused.
///
/// The callback receives only the payload; it has no heap access, so it
/// cannot allocate or trigger a collection.
///
/// # Safety
///
/// The pointer is valid for the payload of a cell of the declaring kind, for
/// the duration of the call only.
pub type Finalizer = unsafe fn(*mut u8);

/// A declared reference field: payload byte offset plus storage form.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// Byte offset within the payload.
    pub offset: usize,
    /// Storage form of the reference.
    pub kind: FieldKind,
}

/// Trailing variable-length array declaration.
#[derive(Debug, Clone, Copy)]
pub struct VarArrayDescriptor {
    /// Payload offset of the `u32` element count.
    pub length_offset: usize,
    /// Payload offset where elements begin.
    pub base_offset: usize,
    /// Storage form of each element.
    pub element_kind: FieldKind,
}

/// Immutable trace descriptor for one cell kind.
///
/// Built once through [`Metadata::builder`]; the collector consumes it
/// read-only.
#[derive(Debug, Clone)]
pub struct Metadata {
    fixed_size: usize,
    fields: Vec<FieldDescriptor>,
    finalizer: Option<Finalizer>,
    var_array: Option<VarArrayDescriptor>,
}

impl Metadata {
    /// Start declaring a kind with the given fixed payload size in bytes.
    pub fn builder(fixed_size: usize) -> MetadataBuilder {
        MetadataBuilder {
            fixed_size,
            fields: Vec::new(),
            finalizer: None,
            var_array: None,
        }
    }

    /// Fixed payload size in bytes (excludes header and trailing array).
    #[inline]
    pub fn fixed_size(&self) -> usize {
        self.fixed_size
    }

    /// Declared reference fields, in construction order.
    #[inline]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The declared finalizer, if any.
    #[inline]
    pub fn finalizer(&self) -> Option<Finalizer> {
        self.finalizer
    }

    /// The trailing array declaration, if any.
    #[inline]
    pub fn var_array(&self) -> Option<&VarArrayDescriptor> {
        self.var_array.as_ref()
    }

    /// Whether cells of this kind can hold outgoing references at all.
    pub fn has_references(&self) -> bool {
        !self.fields.is_empty() || self.var_array.is_some()
    }
}

/// Declarative builder for [`Metadata`].
pub struct MetadataBuilder {
    fixed_size: usize,
    fields: Vec<FieldDescriptor>,
    finalizer: Option<Finalizer>,
    var_array: Option<VarArrayDescriptor>,
}

impl MetadataBuilder {
    /// Declare a reference field at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is already declared, misaligned, or outside the
    /// fixed payload. These corrupt tracing for the process lifetime, so
    /// they are fatal.
    pub fn field(mut self, offset: usize, kind: FieldKind) -> Self {
        assert_eq!(offset % FIELD_SIZE, 0, "field offset {offset} is misaligned");
        assert!(
            offset + FIELD_SIZE <= self.fixed_size,
            "field offset {offset} is outside the fixed payload of {} bytes",
            self.fixed_size
        );
        assert!(
            self.fields.iter().all(|f| f.offset != offset),
            "duplicate field declaration at offset {offset}"
        );
        self.fields.push(FieldDescriptor { offset, kind });
        self
    }

    /// Declare the finalizer for this kind.
    pub fn finalizer(mut self, f: Finalizer) -> Self {
        assert!(self.finalizer.is_none(), "finalizer declared twice");
        self.finalizer = Some(f);
        self
    }

    /// Declare a trailing variable-length array: a `u32` element count at
    /// `length_offset` and elements of `element_kind` starting at
    /// `base_offset`.
    pub fn var_array(
        mut self,
        length_offset: usize,
        base_offset: usize,
        element_kind: FieldKind,
    ) -> Self {
        assert!(self.var_array.is_none(), "variable array declared twice");
        assert_eq!(base_offset % FIELD_SIZE, 0, "array base {base_offset} is misaligned");
        assert!(
            length_offset + 4 <= self.fixed_size,
            "length field at {length_offset} is outside the fixed payload"
        );
        assert!(
            base_offset >= self.fixed_size,
            "array base {base_offset} overlaps the fixed payload"
        );
        self.var_array = Some(VarArrayDescriptor {
            length_offset,
            base_offset,
            element_kind,
        });
        self
    }

    /// Finish the declaration.
    pub fn build(self) -> Metadata {
        Metadata {
            fixed_size: self.fixed_size,
            fields: self.fields,
            finalizer: self.finalizer,
            var_array: self.var_array,
        }
    }
}

/// Registry mapping each [`CellKind`] to its [`Metadata`].
///
/// Frozen before heap construction; the collector only reads it.
#[derive(Debug, Default)]
pub struct MetadataTable {
    kinds: FxHashMap<CellKind, Metadata>,
}

impl MetadataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind's metadata.
    ///
    /// # Panics
    ///
    /// Panics if the kind is already registered.
    pub fn register(&mut self, kind: CellKind, metadata: Metadata) {
        let prev = self.kinds.insert(kind, metadata);
        assert!(prev.is_none(), "cell kind {kind:?} registered twice");
    }

    /// Look up a kind's metadata.
    ///
    /// # Panics
    ///
    /// Panics if the kind was never registered. An unregistered kind cannot
    /// be traced, so this is fatal at first use.
    pub fn get(&self, kind: CellKind) -> &Metadata {
        self.kinds
            .get(&kind)
            .unwrap_or_else(|| panic!("cell kind {kind:?} is not registered"))
    }

    /// Whether a kind has been registered.
    pub fn contains(&self, kind: CellKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
