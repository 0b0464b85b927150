//! Collection cycles
//!
//! Two cycle shapes, both synchronous with the mutator:
//!
//! - **Minor**: Cheney copying over the young semispaces. Roots are the
//!   handle stack, the permanent roots, and the remembered set. Survivors
//!   are copied to the to-space or, once old enough, promoted into the old
//!   generation; everything left behind is dead, so dead finalizable cells
//!   are finalized while the from-space is still intact, then the
//!   semispaces flip.
//! - **Full**: a forced-promotion minor first empties the young generation,
//!   then the old generation is traced from the roots (mark), weak slots to
//!   unmarked cells are cleared, dead finalizable cells are finalized, and
//!   the survivors are slid down to one contiguous prefix (compact) with
//!   every stored reference rewritten through per-cell forwarding.
//!
//! Mark bits are an intra-full-collection state: outside a full cycle no
//! cell is marked. Fresh allocations start unmarked and minor copies clear
//! the bit on the destination, so a full cycle never needs a separate
//! clearing pass up front.

use crate::gc::heap::{Heap, OLD_LIMIT_FLOOR, PROMOTION_AGE};
use crate::gc::metadata::{FieldKind, Metadata, MetadataTable, FIELD_SIZE};
use crate::gc::segment::{CellAddr, GcRef};
use crate::value::Value;
use std::ptr;
use std::time::{Duration, Instant};

/// Collector counters and pause accounting.
///
/// Monotone over the heap's lifetime; read through [`Heap::stats`].
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Completed minor (young-generation) cycles.
    pub minor_collections: u64,
    /// Completed full (both-generation) cycles.
    pub full_collections: u64,
    /// Total bytes handed out, headers included.
    pub bytes_allocated: u64,
    /// Cells moved from the young to the old generation.
    pub cells_promoted: u64,
    /// Finalizers run on dead cells.
    pub cells_finalized: u64,
    /// Weak slots cleared because their target died.
    pub weak_cleared: u64,
    /// Duration of the most recent cycle.
    pub last_pause: Duration,
    /// Sum of all cycle durations.
    pub total_pause: Duration,
    /// Longest single cycle.
    pub max_pause: Duration,
}

impl GcStats {
    fn record_pause(&mut self, pause: Duration) {
        self.last_pause = pause;
        self.total_pause += pause;
        self.max_pause = self.max_pause.max(pause);
    }
}

/// Per-minor-cycle evacuation state.
struct Evacuation {
    /// Bytes copied into the to-space so far.
    to_cursor: usize,
    /// Cells promoted this cycle, pending a field scan.
    promoted: Vec<CellAddr>,
}

/// Visit the address of every declared reference slot of a cell: the fixed
/// fields, then the trailing array elements if the kind declares one.
fn visit_reference_slots<F>(md: &Metadata, addr: CellAddr, mut f: F)
where
    F: FnMut(*mut u8, FieldKind),
{
    let payload = addr.payload();
    for field in md.fields() {
        f(unsafe { payload.add(field.offset) }, field.kind);
    }
    if let Some(arr) = md.var_array() {
        let length =
            unsafe { ptr::read(payload.add(arr.length_offset) as *const u32) } as usize;
        for i in 0..length {
            f(
                unsafe { payload.add(arr.base_offset + i * FIELD_SIZE) },
                arr.element_kind,
            );
        }
    }
}

/// Read the reference a slot currently holds, if any.
fn slot_target(slot: *mut u8, kind: FieldKind) -> Option<GcRef> {
    match kind {
        FieldKind::Slot => unsafe { ptr::read(slot as *const Value) }.as_reference(),
        FieldKind::Cell => {
            let bits = unsafe { ptr::read(slot as *const u64) };
            if bits == 0 {
                None
            } else {
                Some(unsafe { GcRef::from_raw_bits(bits) })
            }
        }
    }
}

/// Rewrite a slot's reference in place, preserving a tagged slot's kind tag.
fn set_slot_target(slot: *mut u8, kind: FieldKind, target: GcRef) {
    match kind {
        FieldKind::Slot => unsafe {
            let v = ptr::read(slot as *const Value);
            ptr::write(slot as *mut Value, v.with_reference(target));
        },
        FieldKind::Cell => unsafe {
            ptr::write(slot as *mut u64, target.raw_bits());
        },
    }
}

impl Heap {
    /// Run a minor collection: evacuate the live young generation and flip
    /// the semispaces.
    ///
    /// Triggered automatically when the young generation fills; callable
    /// directly for deterministic tests and embedder-driven pacing.
    pub fn collect_minor(&mut self) {
        let start = Instant::now();
        self.collect_minor_inner(false);
        self.stats.minor_collections += 1;
        self.stats.record_pause(start.elapsed());
    }

    /// Run a full collection: empty the young generation by forced
    /// promotion, then mark and compact the old generation.
    pub fn collect_full(&mut self) {
        let start = Instant::now();
        self.collect_minor_inner(true);
        self.mark_compact();
        self.stats.full_collections += 1;
        self.stats.record_pause(start.elapsed());
    }

    // ----- minor cycle -----

    pub(crate) fn collect_minor_inner(&mut self, force_promote: bool) {
        // The table is moved out for the duration of the cycle so trace
        // lookups do not alias the heap state being mutated.
        let metadata = std::mem::take(&mut self.metadata);
        let mut ev = Evacuation {
            to_cursor: 0,
            promoted: Vec::new(),
        };

        // Roots: handle slots, permanent roots, then the remembered set.
        for i in 0..self.handles.len() {
            let mut v = self.handles.slot(i);
            if self.evacuate_value(&mut ev, &mut v, force_promote) {
                self.handles.set_slot(i, v);
            }
        }
        for i in 0..self.permanent.len() {
            let mut v = self.permanent[i];
            if self.evacuate_value(&mut ev, &mut v, force_promote) {
                self.permanent[i] = v;
            }
        }
        for owner in self.remembered.take() {
            if self.scan_cell(&metadata, &mut ev, owner, force_promote) {
                self.remembered.insert(owner);
            }
        }

        // Transitive closure: the to-space is scanned Cheney-style, promoted
        // cells through an explicit worklist. Scanning either may extend
        // both, so alternate until neither grows.
        let mut to_scan = 0usize;
        let mut promoted_scan = 0usize;
        loop {
            let mut progressed = false;
            while to_scan < ev.to_cursor {
                let addr = CellAddr::from_base_offset(self.base(), self.to_off + to_scan);
                to_scan += unsafe { addr.header() }.size();
                self.scan_cell(&metadata, &mut ev, addr, force_promote);
                progressed = true;
            }
            while promoted_scan < ev.promoted.len() {
                let addr = ev.promoted[promoted_scan];
                promoted_scan += 1;
                if self.scan_cell(&metadata, &mut ev, addr, force_promote) {
                    self.remembered.insert(addr);
                }
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        // Weak slots: follow forwarding for survivors, clear the rest.
        let mut weak = std::mem::take(&mut self.weak);
        weak.for_each_live(|v| {
            let Some(r) = v.as_reference() else {
                return Some(v);
            };
            let addr = r.to_addr(self.base());
            if !self.in_young(addr) {
                return Some(v);
            }
            let header = unsafe { addr.header() };
            if header.is_forwarded() {
                Some(v.with_reference(GcRef::from_addr(header.forwarded(), self.base())))
            } else {
                self.stats.weak_cleared += 1;
                None
            }
        });
        self.weak = weak;

        // Finalizable young cells: re-register survivors under their new
        // address, finalize the dead while the from-space is still intact.
        let pending = std::mem::take(&mut self.young_finalizable);
        for addr in pending {
            let header = unsafe { addr.header() };
            if header.is_forwarded() {
                let dest = header.forwarded();
                if self.in_to_space(dest) {
                    self.young_finalizable.push(dest);
                } else {
                    self.old_finalizable.push(dest);
                }
            } else if let Some(finalizer) = metadata.get(header.kind()).finalizer() {
                unsafe { finalizer(addr.payload()) };
                self.stats.cells_finalized += 1;
            }
        }

        // Flip.
        std::mem::swap(&mut self.from_off, &mut self.to_off);
        self.young_cursor = ev.to_cursor;
        if self.old_cursor > self.old_limit {
            self.old_limit = self.old_cursor.min(self.old_cap);
        }
        self.metadata = metadata;
    }

    /// Evacuate one young cell, returning its new reference. `None` when the
    /// target is not in the from-space (old cells do not move in a minor
    /// cycle).
    fn evacuate(&mut self, ev: &mut Evacuation, r: GcRef, force_promote: bool) -> Option<GcRef> {
        let addr = r.to_addr(self.base());
        if !self.in_young(addr) {
            return None;
        }
        let header = unsafe { addr.header_mut() };
        if header.is_forwarded() {
            return Some(GcRef::from_addr(header.forwarded(), self.base()));
        }

        let size = header.size();
        let promote = (force_promote || header.age().saturating_add(1) >= PROMOTION_AGE)
            && self.old_cursor + size <= self.old_cap;
        let dest = if promote {
            let dest = CellAddr::from_base_offset(self.base(), self.old_off + self.old_cursor);
            self.old_cursor += size;
            self.stats.cells_promoted += 1;
            ev.promoted.push(dest);
            dest
        } else {
            let dest = CellAddr::from_base_offset(self.base(), self.to_off + ev.to_cursor);
            ev.to_cursor += size;
            dest
        };
        unsafe {
            ptr::copy_nonoverlapping(addr.as_ptr() as *const u8, dest.as_ptr() as *mut u8, size);
            let dest_header = dest.header_mut();
            dest_header.clear_forward();
            dest_header.unmark();
            if !promote {
                dest_header.bump_age();
            }
        }
        header.forward_to(dest);
        Some(GcRef::from_addr(dest, self.base()))
    }

    /// Evacuate the target of a tagged value, rewriting it in place. Returns
    /// whether the value changed.
    fn evacuate_value(&mut self, ev: &mut Evacuation, v: &mut Value, force_promote: bool) -> bool {
        if let Some(r) = v.as_reference() {
            if let Some(moved) = self.evacuate(ev, r, force_promote) {
                *v = v.with_reference(moved);
                return true;
            }
        }
        false
    }

    /// Evacuate every reference a cell holds. Returns whether any slot still
    /// points into the young generation (the to-space) afterwards, which is
    /// what decides remembered-set membership for old cells.
    fn scan_cell(
        &mut self,
        metadata: &MetadataTable,
        ev: &mut Evacuation,
        addr: CellAddr,
        force_promote: bool,
    ) -> bool {
        let md = metadata.get(unsafe { addr.header() }.kind());
        let mut references_young = false;
        visit_reference_slots(md, addr, |slot, kind| {
            let Some(target) = slot_target(slot, kind) else {
                return;
            };
            let current = match self.evacuate(ev, target, force_promote) {
                Some(moved) => {
                    set_slot_target(slot, kind, moved);
                    moved
                }
                None => target,
            };
            if self.in_to_space(current.to_addr(self.base())) {
                references_young = true;
            }
        });
        references_young
    }

    // ----- full cycle: mark and compact the old generation -----

    fn mark_compact(&mut self) {
        let metadata = std::mem::take(&mut self.metadata);

        // Mark from the strong roots. Weak slots and the remembered set are
        // not roots; the remembered set is rebuilt from the survivors below.
        let mut worklist: Vec<CellAddr> = Vec::new();
        for i in 0..self.handles.len() {
            if let Some(r) = self.handles.slot(i).as_reference() {
                self.mark(r.to_addr(self.base()), &mut worklist);
            }
        }
        for i in 0..self.permanent.len() {
            if let Some(r) = self.permanent[i].as_reference() {
                self.mark(r.to_addr(self.base()), &mut worklist);
            }
        }
        while let Some(addr) = worklist.pop() {
            let md = metadata.get(unsafe { addr.header() }.kind());
            visit_reference_slots(md, addr, |slot, kind| {
                if let Some(target) = slot_target(slot, kind) {
                    self.mark(target.to_addr(self.base()), &mut worklist);
                }
            });
        }

        // Clear weak slots whose target did not survive the trace.
        let mut weak = std::mem::take(&mut self.weak);
        weak.for_each_live(|v| {
            let Some(r) = v.as_reference() else {
                return Some(v);
            };
            if unsafe { r.to_addr(self.base()).header() }.is_marked() {
                Some(v)
            } else {
                self.stats.weak_cleared += 1;
                None
            }
        });

        // Plan the slide: assign each marked old cell its compacted address
        // (recorded even when it does not move, so reference rewriting is
        // uniform). Dead finalizable cells are finalized here, while every
        // payload is still intact.
        let mut new_cursor = 0usize;
        let mut off = 0usize;
        while off < self.old_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.old_off + off);
            let header = unsafe { addr.header_mut() };
            let size = header.size();
            if header.is_marked() {
                let dest = CellAddr::from_base_offset(self.base(), self.old_off + new_cursor);
                header.forward_to(dest);
                new_cursor += size;
            } else if header.is_finalizable() {
                if let Some(finalizer) = metadata.get(header.kind()).finalizer() {
                    unsafe { finalizer(addr.payload()) };
                    self.stats.cells_finalized += 1;
                }
            }
            off += size;
        }

        // Rewrite every stored reference through the forwarding plan before
        // anything moves: handle slots, permanent roots, surviving weak
        // slots, and the fields of every live cell in both generations.
        for i in 0..self.handles.len() {
            let v = self.handles.slot(i);
            if let Some(updated) = self.forwarded_value(v) {
                self.handles.set_slot(i, updated);
            }
        }
        for i in 0..self.permanent.len() {
            if let Some(updated) = self.forwarded_value(self.permanent[i]) {
                self.permanent[i] = updated;
            }
        }
        weak.for_each_live(|v| Some(self.forwarded_value(v).unwrap_or(v)));
        self.weak = weak;

        let mut off = 0usize;
        while off < self.old_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.old_off + off);
            let header = unsafe { addr.header() };
            if header.is_marked() {
                self.update_cell_fields(&metadata, addr);
            }
            off += header.size();
        }
        let mut off = 0usize;
        while off < self.young_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.from_off + off);
            self.update_cell_fields(&metadata, addr);
            off += unsafe { addr.header() }.size();
        }

        // Slide. Regions may overlap, so this is a forward `copy`, never
        // `copy_nonoverlapping`.
        let mut off = 0usize;
        while off < self.old_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.old_off + off);
            let header = unsafe { addr.header() };
            let size = header.size();
            if header.is_marked() {
                let dest = header.forwarded();
                if dest != addr {
                    unsafe {
                        ptr::copy(addr.as_ptr() as *const u8, dest.as_ptr() as *mut u8, size);
                    }
                }
            }
            off += size;
        }
        self.old_cursor = new_cursor;

        // Rebuild the derived sets from the compacted survivors and drop the
        // intra-cycle header state.
        self.remembered.clear();
        self.old_finalizable.clear();
        let mut off = 0usize;
        while off < self.old_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.old_off + off);
            let header = unsafe { addr.header_mut() };
            header.unmark();
            header.clear_forward();
            if header.is_finalizable() {
                self.old_finalizable.push(addr);
            }
            if self.cell_references_young_with(&metadata, addr) {
                self.remembered.insert(addr);
            }
            off += header.size();
        }
        let mut off = 0usize;
        while off < self.young_cursor {
            let addr = CellAddr::from_base_offset(self.base(), self.from_off + off);
            let header = unsafe { addr.header_mut() };
            header.unmark();
            off += header.size();
        }

        // Resize the soft limit from the surviving footprint.
        self.old_limit = (self.old_cursor * 2)
            .max(self.config.init_heap_size)
            .max(OLD_LIMIT_FLOOR)
            .min(self.old_cap);

        self.metadata = metadata;
    }

    fn mark(&self, addr: CellAddr, worklist: &mut Vec<CellAddr>) {
        let header = unsafe { addr.header_mut() };
        if !header.is_marked() {
            header.mark();
            worklist.push(addr);
        }
    }

    /// The value rewritten through its target's forwarding entry, or `None`
    /// when the target was not relocated.
    fn forwarded_value(&self, v: Value) -> Option<Value> {
        let r = v.as_reference()?;
        let header = unsafe { r.to_addr(self.base()).header() };
        if header.is_forwarded() {
            Some(v.with_reference(GcRef::from_addr(header.forwarded(), self.base())))
        } else {
            None
        }
    }

    fn update_cell_fields(&self, metadata: &MetadataTable, addr: CellAddr) {
        let md = metadata.get(unsafe { addr.header() }.kind());
        visit_reference_slots(md, addr, |slot, kind| {
            if let Some(target) = slot_target(slot, kind) {
                let header = unsafe { target.to_addr(self.base()).header() };
                if header.is_forwarded() {
                    set_slot_target(
                        slot,
                        kind,
                        GcRef::from_addr(header.forwarded(), self.base()),
                    );
                }
            }
        });
    }

    /// Whether any reference slot of `addr` points into the young
    /// generation. Used when payload bytes were written wholesale and the
    /// per-store barrier could not observe them.
    pub(crate) fn cell_references_young(&self, addr: CellAddr) -> bool {
        let metadata = &self.metadata;
        self.cell_references_young_with(metadata, addr)
    }

    fn cell_references_young_with(&self, metadata: &MetadataTable, addr: CellAddr) -> bool {
        let md = metadata.get(unsafe { addr.header() }.kind());
        let mut found = false;
        visit_reference_slots(md, addr, |slot, kind| {
            if let Some(target) = slot_target(slot, kind) {
                if self.in_young(target.to_addr(self.base())) {
                    found = true;
                }
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::gc::heap::Generation;
    use crate::gc::metadata::CellKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAIR: CellKind = CellKind(1);
    const LEAF: CellKind = CellKind(2);
    const LIST: CellKind = CellKind(3);
    const TRACKED: CellKind = CellKind(4);
    const DEFERRED: CellKind = CellKind(5);

    // One counter per test so parallel test threads never share one.
    static FINALIZED_TRACKED: AtomicUsize = AtomicUsize::new(0);
    static FINALIZED_DEFERRED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn tracked_finalizer(_payload: *mut u8) {
        FINALIZED_TRACKED.fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn deferred_finalizer(_payload: *mut u8) {
        FINALIZED_DEFERRED.fetch_add(1, Ordering::SeqCst);
    }

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
        table.register(
            TRACKED,
            Metadata::builder(8).finalizer(tracked_finalizer).build(),
        );
        table.register(
            DEFERRED,
            Metadata::builder(8).finalizer(deferred_finalizer).build(),
        );
        table
    }

    fn test_heap() -> Heap {
        let config = GcConfig {
            init_heap_size: 64 * 1024,
            max_heap_size: 4 * 1024 * 1024,
            ..GcConfig::default()
        };
        Heap::new(config, test_table()).unwrap()
    }

    #[test]
    fn test_minor_keeps_rooted_cell() {
        let mut heap = test_heap();
        let pair = heap.alloc_cell(PAIR).unwrap();
        heap.set_value_field(pair, 0, Value::int(41));
        let h = heap.make_handle(Value::object(pair));

        heap.collect_minor();

        let moved = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.kind_of(moved), PAIR);
        assert_eq!(heap.value_field(moved, 0), Value::int(41));
        assert_eq!(heap.stats().minor_collections, 1);
    }

    #[test]
    fn test_minor_reclaims_unrooted_cells() {
        let mut heap = test_heap();
        for _ in 0..64 {
            let _ = heap.alloc_cell(PAIR).unwrap();
        }
        let used_before = heap.young_used();
        heap.collect_minor();
        assert!(heap.young_used() < used_before);
        assert_eq!(heap.young_used(), 0);
    }

    #[test]
    fn test_minor_traces_transitively() {
        let mut heap = test_heap();
        let inner = heap.alloc_cell(LEAF).unwrap();
        let outer = heap.alloc_cell(PAIR).unwrap();
        heap.set_value_field(outer, 0, Value::object(inner));
        let h = heap.make_handle(Value::object(outer));

        heap.collect_minor();

        let outer = h.get(&heap).as_object().unwrap();
        let inner = heap.value_field(outer, 0).as_object().unwrap();
        assert_eq!(heap.kind_of(inner), LEAF);
    }

    #[test]
    fn test_minor_rewrites_array_elements() {
        let mut heap = test_heap();
        let leaf = heap.alloc_cell(LEAF).unwrap();
        let list = heap.alloc_variable_cell(LIST, 3).unwrap();
        heap.array_set(list, 1, Value::object(leaf));
        let h = heap.make_handle(Value::object(list));

        heap.collect_minor();

        let list = h.get(&heap).as_object().unwrap();
        let leaf = heap.array_get(list, 1).as_object().unwrap();
        assert_eq!(heap.kind_of(leaf), LEAF);
        assert!(heap.array_get(list, 0).is_double());
    }

    #[test]
    fn test_promotion_after_surviving_minors() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        let h = heap.make_handle(Value::object(cell));
        assert_eq!(heap.generation_of(cell), Generation::Young);

        heap.collect_minor();
        let cell = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.generation_of(cell), Generation::Young);

        heap.collect_minor();
        let cell = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.generation_of(cell), Generation::Old);
        assert!(heap.stats().cells_promoted >= 1);
    }

    #[test]
    fn test_write_barrier_keeps_young_target_of_old_cell() {
        let mut heap = test_heap();
        // Promote a pair into the old generation.
        let pair = heap.alloc_cell(PAIR).unwrap();
        let hp = heap.make_handle(Value::object(pair));
        heap.collect_full();
        let pair = hp.get(&heap).as_object().unwrap();
        assert_eq!(heap.generation_of(pair), Generation::Old);

        // Store a young reference into it; no root other than the old cell.
        let young = heap.alloc_cell(LEAF).unwrap();
        heap.set_value_field(pair, 0, Value::object(young));

        heap.collect_minor();

        let pair = hp.get(&heap).as_object().unwrap();
        let survivor = heap.value_field(pair, 0).as_object().unwrap();
        assert_eq!(heap.kind_of(survivor), LEAF);
    }

    #[test]
    fn test_finalizer_runs_exactly_once_for_dead_cell() {
        let mut heap = test_heap();
        let _ = heap.alloc_cell(TRACKED).unwrap();
        heap.collect_minor();
        assert_eq!(FINALIZED_TRACKED.load(Ordering::SeqCst), 1);

        // A second cycle must not finalize it again.
        heap.collect_minor();
        heap.collect_full();
        assert_eq!(FINALIZED_TRACKED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finalizer_deferred_while_rooted() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(DEFERRED).unwrap();
        let marker = heap.marker();
        let _h = heap.make_handle(Value::object(cell));

        heap.collect_minor();
        assert_eq!(FINALIZED_DEFERRED.load(Ordering::SeqCst), 0);

        heap.flush_to_marker(marker);
        heap.collect_minor();
        heap.collect_full();
        assert_eq!(FINALIZED_DEFERRED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_weak_cleared_by_minor_when_target_dies() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        let w = heap.new_weak(Value::object(cell));
        heap.collect_minor();
        assert_eq!(heap.weak_get(w), None);
    }

    #[test]
    fn test_weak_follows_moved_target() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        let h = heap.make_handle(Value::object(cell));
        let w = heap.new_weak(Value::object(cell));

        heap.collect_minor();

        let live = heap.weak_get(w).unwrap();
        assert!(heap.same_reference(live, h.get(&heap)));
    }

    #[test]
    fn test_weak_cleared_by_full_cycle() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(LEAF).unwrap();
        let h = heap.make_handle(Value::object(cell));
        let w = heap.new_weak(Value::object(cell));

        // Promote, then drop the strong root.
        heap.collect_full();
        assert!(heap.weak_get(w).is_some());
        let old = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.generation_of(old), Generation::Old);

        heap.flush_to_marker(crate::gc::handles::Marker { index: 0 });
        heap.collect_full();
        assert_eq!(heap.weak_get(w), None);
        assert!(heap.stats().weak_cleared >= 1);
    }

    #[test]
    fn test_full_cycle_compacts_old_generation() {
        let mut heap = test_heap();
        // Promote a batch, keep every other cell.
        let mut kept = Vec::new();
        for i in 0..32 {
            let pair = heap.alloc_cell(PAIR).unwrap();
            heap.set_value_field(pair, 0, Value::int(i));
            if i % 2 == 0 {
                kept.push(heap.make_handle(Value::object(pair)));
            }
        }
        heap.collect_full();
        let promoted_used = heap.old_used();
        assert!(promoted_used > 0);

        // Drop nothing further; a second full cycle keeps the footprint.
        heap.collect_full();
        assert_eq!(heap.old_used(), promoted_used);

        for (slot, h) in kept.iter().enumerate() {
            let pair = h.get(&heap).as_object().unwrap();
            assert_eq!(heap.generation_of(pair), Generation::Old);
            assert_eq!(
                heap.value_field(pair, 0),
                Value::int(slot as i32 * 2)
            );
        }
    }

    #[test]
    fn test_full_cycle_shrinks_after_garbage() {
        let mut heap = test_heap();
        let keep = heap.alloc_cell(PAIR).unwrap();
        let h = heap.make_handle(Value::object(keep));
        for _ in 0..128 {
            let _ = heap.alloc_cell(PAIR).unwrap();
        }
        heap.collect_full();
        let after_first = heap.old_used();

        // Only the rooted pair survives the second cycle's compaction.
        heap.collect_full();
        assert!(heap.old_used() <= after_first);
        let keep = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.kind_of(keep), PAIR);
    }

    #[test]
    fn test_old_to_old_references_survive_compaction() {
        let mut heap = test_heap();
        let inner = heap.alloc_cell(LEAF).unwrap();
        let outer = heap.alloc_cell(PAIR).unwrap();
        heap.set_value_field(outer, 0, Value::object(inner));
        let h = heap.make_handle(Value::object(outer));

        // Two full cycles: promote, then compact with both cells old.
        heap.collect_full();
        heap.collect_full();

        let outer = h.get(&heap).as_object().unwrap();
        assert_eq!(heap.generation_of(outer), Generation::Old);
        let inner = heap.value_field(outer, 0).as_object().unwrap();
        assert_eq!(heap.kind_of(inner), LEAF);
        assert_eq!(heap.generation_of(inner), Generation::Old);
    }

    #[test]
    fn test_permanent_root_survives_everything() {
        let mut heap = test_heap();
        let cell = heap.alloc_cell(PAIR).unwrap();
        heap.set_value_field(cell, 0, Value::int(9));
        heap.add_permanent_root(Value::object(cell));

        heap.collect_minor();
        heap.collect_full();
        heap.collect_minor();

        // Reachable through the permanent root only; locate it via a weak
        // reference registered before the cycles would be racy, so assert
        // through the heap accounting instead.
        assert!(heap.old_used() > 0 || heap.young_used() > 0);
        assert_eq!(heap.stats().full_collections, 1);
    }

    #[test]
    fn test_allocation_triggers_minor_collection() {
        let mut heap = test_heap();
        // Fill well past one semispace; unrooted garbage is collected
        // automatically and allocation keeps succeeding.
        for i in 0..20_000 {
            let pair = heap.alloc_cell(PAIR).unwrap();
            heap.set_value_field(pair, 0, Value::int(i));
        }
        assert!(heap.stats().minor_collections > 0);
    }

    #[test]
    fn test_old_limit_grows_under_live_pressure() {
        let config = GcConfig {
            init_heap_size: 16 * 1024,
            max_heap_size: 4 * 1024 * 1024,
            ..GcConfig::default()
        };
        let mut heap = Heap::new(config, test_table()).unwrap();
        let initial_limit = heap.old_limit();

        // Keep everything alive so full cycles cannot reclaim, forcing the
        // soft limit upward instead of out-of-memory.
        let mut handles = Vec::new();
        for _ in 0..40_000 {
            let pair = heap.alloc_cell(PAIR).unwrap();
            handles.push(heap.make_handle(Value::object(pair)));
        }
        assert!(heap.old_limit() > initial_limit);
        assert!(heap.stats().full_collections > 0);
    }

    #[test]
    fn test_recover_policy_returns_error_when_exhausted() {
        let config = GcConfig {
            init_heap_size: 16 * 1024,
            max_heap_size: 64 * 1024,
            ..GcConfig::default()
        };
        let mut heap = Heap::new(config, test_table()).unwrap();

        let mut handles = Vec::new();
        let mut saw_oom = false;
        for _ in 0..8192 {
            match heap.alloc_cell(PAIR) {
                Ok(pair) => handles.push(heap.make_handle(Value::object(pair))),
                Err(crate::HeapError::OutOfMemory { max, .. }) => {
                    assert_eq!(max, 64 * 1024);
                    saw_oom = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_oom);

        // The heap stays usable after a recovered out-of-memory condition.
        handles.clear();
        heap.flush_to_marker(crate::gc::handles::Marker { index: 0 });
        heap.collect_full();
        assert!(heap.alloc_cell(PAIR).is_ok());
    }
}
