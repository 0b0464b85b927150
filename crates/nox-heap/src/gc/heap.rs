//! The heap context
//!
//! [`Heap`] is the one explicit context value of this crate: segments,
//! handle stack, permanent roots, remembered set, weak table, metadata and
//! configuration, owned together and passed by reference to every
//! operation. There is no process-wide heap singleton.
//!
//! One mutator thread owns a `Heap`. Collections run synchronously from
//! inside an allocation call or an explicit `collect_*` request; the
//! collection phases themselves live in [`crate::gc::collector`].

use crate::config::GcConfig;
use crate::gc::barrier::RememberedSet;
use crate::gc::collector::GcStats;
use crate::gc::handles::{Handle, HandleStack, Marker, MutHandle, SlotValue};
use crate::gc::header::{GcHeader, FLAG_FINALIZABLE, FLAG_VARIABLE, HEADER_SIZE};
use crate::gc::metadata::{CellKind, MetadataTable, FIELD_SIZE};
use crate::gc::segment::{CellAddr, GcRef, HeapBase, Slab, RESERVED_PREFIX};
use crate::gc::weak::{WeakRef, WeakTable};
use crate::value::Value;
use crate::{HeapError, HeapResult, OomPolicy};
use std::ptr;

/// Upper bound for one young semispace.
pub(crate) const YOUNG_MAX: usize = 1024 * 1024;

/// Lower bound for one young semispace.
pub(crate) const YOUNG_MIN: usize = 4096;

/// Minor cycles a young cell survives before promotion to the old
/// generation.
pub(crate) const PROMOTION_AGE: u8 = 2;

/// Smallest old-generation soft limit.
pub(crate) const OLD_LIMIT_FLOOR: usize = 8192;

#[inline]
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Which generation a cell currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Bump-allocated semispace, collected by copying.
    Young,
    /// Mark-compact region.
    Old,
}

/// The managed heap: object storage, rooting, and the generational
/// collector's state.
pub struct Heap {
    pub(crate) config: GcConfig,
    pub(crate) metadata: MetadataTable,
    pub(crate) slab: Slab,

    /// One young semispace, in bytes.
    pub(crate) young_size: usize,
    /// Byte offset of the active (from) semispace.
    pub(crate) from_off: usize,
    /// Byte offset of the copy target (to) semispace.
    pub(crate) to_off: usize,
    /// Bytes bump-allocated in the active semispace.
    pub(crate) young_cursor: usize,

    /// Byte offset of the old region.
    pub(crate) old_off: usize,
    /// Old region capacity in bytes (hard bound from `maxHeapSize`).
    pub(crate) old_cap: usize,
    /// Bytes in use in the old region.
    pub(crate) old_cursor: usize,
    /// Soft limit; crossing it triggers a full collection before growth.
    pub(crate) old_limit: usize,

    pub(crate) handles: HandleStack,
    pub(crate) permanent: Vec<Value>,
    pub(crate) remembered: RememberedSet,
    pub(crate) weak: WeakTable,

    /// Young cells whose kind declares a finalizer.
    pub(crate) young_finalizable: Vec<CellAddr>,
    /// Old cells whose kind declares a finalizer.
    pub(crate) old_finalizable: Vec<CellAddr>,

    pub(crate) stats: GcStats,
}

impl Heap {
    /// Construct a heap from a validated configuration and a frozen
    /// metadata table.
    pub fn new(config: GcConfig, metadata: MetadataTable) -> HeapResult<Self> {
        config.validate()?;
        let max = config.max_heap_size;
        let slab = Slab::new(max)?;

        let young_size = align8((max / 8).clamp(YOUNG_MIN, YOUNG_MAX));
        let from_off = RESERVED_PREFIX;
        let to_off = from_off + young_size;
        let old_off = to_off + young_size;
        let old_cap = max - old_off;
        let old_limit = config.init_heap_size.clamp(OLD_LIMIT_FLOOR, old_cap);

        Ok(Self {
            config,
            metadata,
            slab,
            young_size,
            from_off,
            to_off,
            young_cursor: 0,
            old_off,
            old_cap,
            old_cursor: 0,
            old_limit,
            handles: HandleStack::new(),
            permanent: Vec::new(),
            remembered: RememberedSet::new(),
            weak: WeakTable::new(),
            young_finalizable: Vec::new(),
            old_finalizable: Vec::new(),
            stats: GcStats::default(),
        })
    }

    /// Construct a heap from a JSON configuration document.
    pub fn from_json_config(source: &str, metadata: MetadataTable) -> HeapResult<Self> {
        let runtime = crate::RuntimeConfig::from_json(source)?;
        Self::new(runtime.gc_config, metadata)
    }

    #[inline]
    pub(crate) fn base(&self) -> HeapBase {
        self.slab.base()
    }

    #[inline]
    pub(crate) fn addr_of(&self, r: GcRef) -> CellAddr {
        r.to_addr(self.base())
    }

    // ----- region membership -----

    #[inline]
    pub(crate) fn in_young(&self, addr: CellAddr) -> bool {
        let off = addr.byte_offset(self.base());
        off >= self.from_off && off < self.from_off + self.young_size
    }

    #[inline]
    pub(crate) fn in_to_space(&self, addr: CellAddr) -> bool {
        let off = addr.byte_offset(self.base());
        off >= self.to_off && off < self.to_off + self.young_size
    }

    #[inline]
    pub(crate) fn in_old(&self, addr: CellAddr) -> bool {
        let off = addr.byte_offset(self.base());
        off >= self.old_off && off < self.old_off + self.old_cap
    }

    /// Which generation a cell currently lives in.
    pub fn generation_of(&self, r: GcRef) -> Generation {
        let addr = self.addr_of(r);
        if self.in_old(addr) {
            Generation::Old
        } else {
            Generation::Young
        }
    }

    // ----- allocation -----

    /// Allocate a fixed-size cell of `kind`, zero-initialized.
    ///
    /// May run a minor or full collection. The returned reference is only
    /// stable until the next allocation; root it if it must live longer.
    pub fn alloc_cell(&mut self, kind: CellKind) -> HeapResult<GcRef> {
        let md = self.metadata.get(kind);
        assert!(
            md.var_array().is_none(),
            "kind {kind:?} is variable-length; use alloc_variable_cell"
        );
        let payload = md.fixed_size();
        let finalizable = md.finalizer().is_some();
        self.alloc_raw(kind, payload, finalizable, false)
    }

    /// Allocate a variable-length cell of `kind` with `length` elements,
    /// zero-initialized, with the declared length field filled in.
    pub fn alloc_variable_cell(&mut self, kind: CellKind, length: usize) -> HeapResult<GcRef> {
        let md = self.metadata.get(kind);
        let arr = *md
            .var_array()
            .unwrap_or_else(|| panic!("kind {kind:?} has no variable array declaration"));
        let finalizable = md.finalizer().is_some();
        assert!(length <= u32::MAX as usize, "array length exceeds u32");

        let payload = arr.base_offset + length * FIELD_SIZE;
        let r = self.alloc_raw(kind, payload, finalizable, true)?;
        let addr = self.addr_of(r);
        unsafe {
            ptr::write(
                addr.payload().add(arr.length_offset) as *mut u32,
                length as u32,
            );
        }
        Ok(r)
    }

    fn alloc_raw(
        &mut self,
        kind: CellKind,
        payload_size: usize,
        finalizable: bool,
        variable: bool,
    ) -> HeapResult<GcRef> {
        let total = align8(HEADER_SIZE + payload_size);
        if total > self.config.max_heap_size {
            return Err(self.oom(total));
        }

        let addr = if total <= self.young_size {
            match self.young_bump(total) {
                Some(addr) => addr,
                None => {
                    self.collect_minor();
                    match self.young_bump(total) {
                        Some(addr) => addr,
                        // Young generation is saturated with live data;
                        // place the cell directly in the old generation.
                        None => self.old_alloc(total)?,
                    }
                }
            }
        } else {
            self.old_alloc(total)?
        };

        let mut flags = 0u8;
        if finalizable {
            flags |= FLAG_FINALIZABLE;
        }
        if variable {
            flags |= FLAG_VARIABLE;
        }
        unsafe {
            ptr::write(addr.as_ptr(), GcHeader::new(kind, total, flags));
            ptr::write_bytes(addr.payload(), 0, total - HEADER_SIZE);
        }
        if finalizable {
            if self.in_young(addr) {
                self.young_finalizable.push(addr);
            } else {
                self.old_finalizable.push(addr);
            }
        }
        self.stats.bytes_allocated += total as u64;
        Ok(GcRef::from_addr(addr, self.base()))
    }

    fn young_bump(&mut self, total: usize) -> Option<CellAddr> {
        if self.young_cursor + total > self.young_size {
            return None;
        }
        let addr = CellAddr::from_base_offset(self.base(), self.from_off + self.young_cursor);
        self.young_cursor += total;
        Some(addr)
    }

    fn old_alloc(&mut self, total: usize) -> HeapResult<CellAddr> {
        if self.old_cursor + total > self.old_limit {
            self.collect_full();
            if self.old_cursor + total > self.old_limit {
                let needed = self.old_cursor + total;
                let grown = (self.old_limit * 2).max(needed).min(self.old_cap);
                if needed > grown {
                    return Err(self.oom(total));
                }
                self.old_limit = grown;
            }
        }
        let addr = CellAddr::from_base_offset(self.base(), self.old_off + self.old_cursor);
        self.old_cursor += total;
        Ok(addr)
    }

    pub(crate) fn oom(&self, requested: usize) -> HeapError {
        match self.config.oom_policy {
            OomPolicy::Abort => std::process::abort(),
            OomPolicy::Recover => HeapError::OutOfMemory {
                requested,
                max: self.config.max_heap_size,
            },
        }
    }

    // ----- cell access -----

    /// The kind tag of a cell.
    pub fn kind_of(&self, r: GcRef) -> CellKind {
        unsafe { self.addr_of(r).header() }.kind()
    }

    /// Total size of a cell in bytes, header included.
    pub fn cell_size(&self, r: GcRef) -> usize {
        unsafe { self.addr_of(r).header() }.size()
    }

    #[inline]
    fn check_field(&self, addr: CellAddr, offset: usize) {
        debug_assert_eq!(offset % FIELD_SIZE, 0, "field offset is misaligned");
        debug_assert!(
            HEADER_SIZE + offset + FIELD_SIZE <= unsafe { addr.header() }.size(),
            "field offset outside the cell"
        );
    }

    /// Read a tagged value slot at `offset` within the payload.
    pub fn value_field(&self, cell: GcRef, offset: usize) -> Value {
        let addr = self.addr_of(cell);
        self.check_field(addr, offset);
        unsafe { ptr::read(addr.payload().add(offset) as *const Value) }
    }

    /// Store a tagged value slot at `offset`, applying the write barrier.
    pub fn set_value_field(&mut self, cell: GcRef, offset: usize, value: Value) {
        let addr = self.addr_of(cell);
        self.check_field(addr, offset);
        if let Some(target) = value.as_reference() {
            self.barrier(addr, target);
        }
        unsafe { ptr::write(addr.payload().add(offset) as *mut Value, value) }
    }

    /// Read a bare reference field at `offset`. Zero bits read as `None`.
    pub fn cell_field(&self, cell: GcRef, offset: usize) -> Option<GcRef> {
        let addr = self.addr_of(cell);
        self.check_field(addr, offset);
        let bits = unsafe { ptr::read(addr.payload().add(offset) as *const u64) };
        if bits == 0 {
            None
        } else {
            Some(unsafe { GcRef::from_raw_bits(bits) })
        }
    }

    /// Store a bare reference field at `offset`, applying the write barrier.
    pub fn set_cell_field(&mut self, cell: GcRef, offset: usize, target: Option<GcRef>) {
        let addr = self.addr_of(cell);
        self.check_field(addr, offset);
        if let Some(t) = target {
            self.barrier(addr, t);
        }
        let bits = target.map_or(0, |t| t.raw_bits());
        unsafe { ptr::write(addr.payload().add(offset) as *mut u64, bits) }
    }

    /// Record an old→young reference created by a direct payload write.
    ///
    /// Callers that write reference fields through [`Heap::payload_ptr`]
    /// must invoke this for every stored reference; a missed record makes
    /// every later minor collection unsound.
    pub fn write_barrier(&mut self, owner: GcRef, value: Value) {
        let addr = self.addr_of(owner);
        if let Some(target) = value.as_reference() {
            self.barrier(addr, target);
        }
    }

    #[inline]
    fn barrier(&mut self, owner: CellAddr, target: GcRef) {
        if self.in_old(owner) && self.in_young(target.to_addr(self.base())) {
            self.remembered.insert(owner);
        }
    }

    // ----- variable-length arrays -----

    /// Element count of a variable-length cell.
    pub fn array_length(&self, cell: GcRef) -> usize {
        let addr = self.addr_of(cell);
        let kind = unsafe { addr.header() }.kind();
        let arr = self
            .metadata
            .get(kind)
            .var_array()
            .unwrap_or_else(|| panic!("kind {kind:?} has no variable array declaration"));
        unsafe { ptr::read(addr.payload().add(arr.length_offset) as *const u32) as usize }
    }

    /// Read a tagged element of a variable-length cell.
    pub fn array_get(&self, cell: GcRef, index: usize) -> Value {
        let addr = self.addr_of(cell);
        let base_offset = self.array_slot_offset(addr, index);
        unsafe { ptr::read(addr.payload().add(base_offset) as *const Value) }
    }

    /// Store a tagged element of a variable-length cell, with barrier.
    pub fn array_set(&mut self, cell: GcRef, index: usize, value: Value) {
        let addr = self.addr_of(cell);
        let base_offset = self.array_slot_offset(addr, index);
        if let Some(target) = value.as_reference() {
            self.barrier(addr, target);
        }
        unsafe { ptr::write(addr.payload().add(base_offset) as *mut Value, value) }
    }

    fn array_slot_offset(&self, addr: CellAddr, index: usize) -> usize {
        let kind = unsafe { addr.header() }.kind();
        let arr = self
            .metadata
            .get(kind)
            .var_array()
            .unwrap_or_else(|| panic!("kind {kind:?} has no variable array declaration"));
        debug_assert_eq!(
            arr.element_kind,
            crate::FieldKind::Slot,
            "array_get/array_set require tagged-slot elements"
        );
        let length =
            unsafe { ptr::read(addr.payload().add(arr.length_offset) as *const u32) } as usize;
        assert!(index < length, "array index {index} out of bounds ({length})");
        arr.base_offset + index * FIELD_SIZE
    }

    /// Grow a variable-length cell: allocate a new cell with `new_length`
    /// elements, copy the fixed payload and existing elements, and return
    /// the new reference. The old cell is left untouched; in-place extension
    /// is never performed because recorded barrier entries may depend on the
    /// old addresses.
    ///
    /// `source` must be a rooted handle whose value is the cell to grow (it
    /// is re-read after the allocation, which may move the cell).
    pub fn grow_variable_cell(
        &mut self,
        source: Handle<Value>,
        new_length: usize,
    ) -> HeapResult<GcRef> {
        let src_ref = source
            .get(self)
            .as_reference()
            .unwrap_or_else(|| panic!("grow_variable_cell requires a reference handle"));
        let kind = self.kind_of(src_ref);
        let arr = *self
            .metadata
            .get(kind)
            .var_array()
            .unwrap_or_else(|| panic!("kind {kind:?} has no variable array declaration"));
        let old_length = self.array_length(src_ref);
        assert!(new_length >= old_length, "variable cells never shrink");

        let fresh = self.alloc_variable_cell(kind, new_length)?;

        // The allocation may have moved the source; re-resolve through the
        // handle before copying.
        let src_ref = source
            .get(self)
            .as_reference()
            .unwrap_or_else(|| panic!("source handle no longer holds a reference"));
        let src_addr = self.addr_of(src_ref);
        let dst_addr = self.addr_of(fresh);
        unsafe {
            // Fixed payload, then elements; the length field is rewritten
            // after the prefix copy.
            ptr::copy_nonoverlapping(src_addr.payload(), dst_addr.payload(), arr.base_offset);
            ptr::write(
                dst_addr.payload().add(arr.length_offset) as *mut u32,
                new_length as u32,
            );
            ptr::copy_nonoverlapping(
                src_addr.payload().add(arr.base_offset),
                dst_addr.payload().add(arr.base_offset),
                old_length * FIELD_SIZE,
            );
        }
        // The copied fields may carry young references into an old cell.
        if self.in_old(dst_addr) && self.cell_references_young(dst_addr) {
            self.remembered.insert(dst_addr);
        }
        Ok(fresh)
    }

    /// Raw pointer to a cell's payload, for in-place construction.
    ///
    /// # Safety
    ///
    /// The pointer is invalidated by any allocation or collection. Reference
    /// stores through it must be followed by [`Heap::write_barrier`].
    pub unsafe fn payload_ptr(&self, cell: GcRef) -> *mut u8 {
        self.addr_of(cell).payload()
    }

    // ----- rooting -----

    /// Root a value in a new slot of the nearest active scope.
    pub fn make_handle<T: SlotValue>(&mut self, value: T) -> Handle<T> {
        let (index, epoch) = self.handles.push(value.into_value());
        Handle::new(index, epoch)
    }

    /// Root a value in a rebindable slot.
    pub fn make_mut_handle<T: SlotValue>(&mut self, value: T) -> MutHandle<T> {
        let (index, epoch) = self.handles.push(value.into_value());
        MutHandle::new(index, epoch)
    }

    /// Snapshot the current handle-slot count.
    pub fn marker(&self) -> Marker {
        self.handles.marker()
    }

    /// Release every handle slot created after `marker`.
    pub fn flush_to_marker(&mut self, marker: Marker) {
        self.handles.flush_to_marker(marker);
    }

    /// Run `f` inside a fresh handle scope; every slot it creates is
    /// released when `f` returns.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.handles.enter_scope();
        let out = f(self);
        self.handles.exit_scope();
        out
    }

    /// Register a root that lives for the heap's whole lifetime.
    pub fn add_permanent_root(&mut self, value: Value) {
        if value.is_reference() {
            self.permanent.push(value);
        }
    }

    pub(crate) fn handle_stack(&self) -> &HandleStack {
        &self.handles
    }

    pub(crate) fn handle_stack_mut(&mut self) -> &mut HandleStack {
        &mut self.handles
    }

    // ----- weak references -----

    /// Create a weak reference to a cell. Does not keep the target alive.
    pub fn new_weak(&mut self, target: Value) -> WeakRef {
        assert!(
            target.is_reference(),
            "weak references require a reference target"
        );
        self.weak.insert(target)
    }

    /// Read a weak reference. `None` once the target has been reclaimed.
    pub fn weak_get(&self, weak: WeakRef) -> Option<Value> {
        self.weak.get(weak)
    }

    /// Return a weak slot to the free list.
    pub fn release_weak(&mut self, weak: WeakRef) {
        self.weak.release(weak);
    }

    // ----- identity & introspection -----

    /// Reference identity: both values are references resolving to the same
    /// cell address. Encoded bits are not compared directly because
    /// compressed encodings are layout-relative.
    pub fn same_reference(&self, a: Value, b: Value) -> bool {
        match (a.as_reference(), b.as_reference()) {
            (Some(ra), Some(rb)) => ra.to_addr(self.base()) == rb.to_addr(self.base()),
            _ => false,
        }
    }

    /// Bytes currently in use across both generations.
    pub fn used_bytes(&self) -> usize {
        self.young_cursor + self.old_cursor
    }

    /// Bytes in use in the young generation.
    pub fn young_used(&self) -> usize {
        self.young_cursor
    }

    /// Bytes in use in the old generation.
    pub fn old_used(&self) -> usize {
        self.old_cursor
    }

    /// Current old-generation soft limit.
    pub fn old_limit(&self) -> usize {
        self.old_limit
    }

    /// Collector statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// The active configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The frozen metadata table.
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Finalizers run once for every still-registered finalizable cell.
        let cells: Vec<CellAddr> = self
            .young_finalizable
            .drain(..)
            .chain(self.old_finalizable.drain(..))
            .collect();
        for addr in cells {
            let kind = unsafe { addr.header() }.kind();
            if let Some(finalizer) = self.metadata.get(kind).finalizer() {
                unsafe { finalizer(addr.payload()) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::metadata::{FieldKind, Metadata};

    const PAIR: CellKind = CellKind(1);
    const LEAF: CellKind = CellKind(2);
    const LIST: CellKind = CellKind(3);

    fn test_table() -> MetadataTable {
        let mut table = MetadataTable::new();
        table.register(
            PAIR,
            Metadata::builder(16)
                .field(0, FieldKind::Slot)
                .field(8, FieldKind::Slot)
                .build(),
        );
        table.register(LEAF, Metadata::builder(8).build());
        table.register(
            LIST,
            Metadata::builder(8).var_array(0, 8, FieldKind::Slot).build(),
        );
        table
    }

    fn small_heap() -> Heap {
        let config = GcConfig {
            init_heap_size: 64 * 1024,
            max_heap_size: 4 * 1024 * 1024,
            ..GcConfig::default()
        };
        Heap::new(config, test_table()).unwrap()
    }

    #[test]
    fn test_heap_creation() {
        let heap = small_heap();
        assert_eq!(heap.used_bytes(), 0);
        assert!(heap.old_limit() >= 64 * 1024);
    }

    #[test]
    fn test_alloc_zeroed_payload() {
        let mut heap = small_heap();
        let cell = heap.alloc_cell(PAIR).unwrap();
        assert_eq!(heap.kind_of(cell), PAIR);
        assert_eq!(heap.cell_size(cell), 16 + 16);
        // Zeroed slots read as double(0.0), never as references.
        assert_eq!(heap.value_field(cell, 0).as_double(), Some(0.0));
        assert!(!heap.value_field(cell, 8).is_reference());
    }

    #[test]
    fn test_alloc_lands_in_young() {
        let mut heap = small_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        assert_eq!(heap.generation_of(cell), Generation::Young);
        assert!(heap.young_used() > 0);
    }

    #[test]
    fn test_large_alloc_goes_old_direct() {
        let mut heap = small_heap();
        // Larger than one semispace: placed straight into the old region.
        let elements = (heap.young_size / FIELD_SIZE) + 8;
        let cell = heap.alloc_variable_cell(LIST, elements).unwrap();
        assert_eq!(heap.generation_of(cell), Generation::Old);
        assert_eq!(heap.array_length(cell), elements);
    }

    #[test]
    fn test_field_roundtrip() {
        let mut heap = small_heap();
        let cell = heap.alloc_cell(PAIR).unwrap();
        heap.set_value_field(cell, 0, Value::int(11));
        heap.set_value_field(cell, 8, Value::double(2.5));
        assert_eq!(heap.value_field(cell, 0), Value::int(11));
        assert_eq!(heap.value_field(cell, 8), Value::double(2.5));
    }

    #[test]
    fn test_array_roundtrip() {
        let mut heap = small_heap();
        let list = heap.alloc_variable_cell(LIST, 4).unwrap();
        assert_eq!(heap.array_length(list), 4);
        for i in 0..4 {
            heap.array_set(list, i, Value::int(i as i32 * 10));
        }
        for i in 0..4 {
            assert_eq!(heap.array_get(list, i), Value::int(i as i32 * 10));
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_array_bounds_checked() {
        let mut heap = small_heap();
        let list = heap.alloc_variable_cell(LIST, 2).unwrap();
        let _ = heap.array_get(list, 2);
    }

    #[test]
    fn test_oversized_request_is_oom() {
        let mut heap = small_heap();
        let max = heap.config().max_heap_size;
        let result = heap.alloc_variable_cell(LIST, max / FIELD_SIZE + 1);
        assert!(matches!(
            result,
            Err(HeapError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_same_reference() {
        let mut heap = small_heap();
        let a = heap.alloc_cell(LEAF).unwrap();
        let b = heap.alloc_cell(LEAF).unwrap();
        assert!(heap.same_reference(Value::object(a), Value::object(a)));
        // Tag does not matter for identity, only the resolved address.
        assert!(heap.same_reference(Value::object(a), Value::string(a)));
        assert!(!heap.same_reference(Value::object(a), Value::object(b)));
        assert!(!heap.same_reference(Value::int(1), Value::int(1)));
    }

    #[test]
    fn test_handle_roundtrip() {
        let mut heap = small_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        let h = heap.make_handle(Value::object(cell));
        assert_eq!(h.get(&heap), Value::object(cell));
    }

    #[test]
    fn test_mut_handle_rebind() {
        let mut heap = small_heap();
        let h = heap.make_mut_handle(Value::int(1));
        h.set(&mut heap, Value::int(2));
        assert_eq!(h.get(&heap), Value::int(2));
    }

    #[test]
    fn test_scoped_releases_slots() {
        let mut heap = small_heap();
        let outer = heap.make_handle(Value::int(1));
        heap.scoped(|heap| {
            let _ = heap.make_handle(Value::int(2));
            let _ = heap.make_handle(Value::int(3));
        });
        assert_eq!(outer.get(&heap), Value::int(1));
        assert_eq!(heap.handle_stack().len(), 1);
    }

    #[test]
    fn test_grow_variable_cell_copies_elements() {
        let mut heap = small_heap();
        let list = heap.alloc_variable_cell(LIST, 2).unwrap();
        heap.array_set(list, 0, Value::int(7));
        heap.array_set(list, 1, Value::int(8));

        let h = heap.make_handle(Value::object(list));
        let grown = heap.grow_variable_cell(h, 5).unwrap();
        assert_eq!(heap.array_length(grown), 5);
        assert_eq!(heap.array_get(grown, 0), Value::int(7));
        assert_eq!(heap.array_get(grown, 1), Value::int(8));
        // New tail slots are zeroed.
        assert_eq!(heap.array_get(grown, 4).as_double(), Some(0.0));
    }
}
