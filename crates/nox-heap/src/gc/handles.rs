//! Handle and scope rooting
//!
//! The collector may relocate or reclaim cells at any allocation call, so a
//! native caller that kept a raw [`crate::GcRef`] across such a call would
//! read stale memory. Every reference that must survive a potential
//! collection is instead parked in a slot of the heap's [`HandleStack`]; the
//! collector visits every live slot as a root and rewrites it when the
//! target moves.
//!
//! Slots obey a strict LIFO discipline. A [`Marker`] snapshots the current
//! slot count; [`crate::Heap::flush_to_marker`] releases exactly the slots
//! created after it. Scopes ([`crate::Heap::scoped`]) are markers with
//! automatic flush at exit.
//!
//! A [`Handle`] is a copyable slot key. Using a handle after its slot was
//! flushed is a contract violation; the stack keeps a per-slot epoch so the
//! violation panics instead of yielding a stale value.

use crate::value::{ObjectRef, StringRef, Value};
use std::marker::PhantomData;

/// Types that can live in a handle slot.
pub trait SlotValue: Copy {
    /// Encode into the slot's tagged value.
    fn into_value(self) -> Value;
    /// Decode from the slot's tagged value; `None` on kind mismatch.
    fn from_value(v: Value) -> Option<Self>
    where
        Self: Sized;
}

impl SlotValue for Value {
    #[inline]
    fn into_value(self) -> Value {
        self
    }

    #[inline]
    fn from_value(v: Value) -> Option<Self> {
        Some(v)
    }
}

impl SlotValue for StringRef {
    #[inline]
    fn into_value(self) -> Value {
        Value::string(self.0)
    }

    #[inline]
    fn from_value(v: Value) -> Option<Self> {
        v.as_string().map(StringRef)
    }
}

impl SlotValue for ObjectRef {
    #[inline]
    fn into_value(self) -> Value {
        Value::object(self.0)
    }

    #[inline]
    fn from_value(v: Value) -> Option<Self> {
        v.as_object().map(ObjectRef)
    }
}

/// Opaque snapshot of the handle stack's slot count.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub(crate) index: u32,
}

/// A rooted, collector-visible reference usable across allocations.
///
/// Copyable key into the heap's handle stack. Valid until its owning scope
/// exits or a marker at or below it is flushed.
#[derive(Debug)]
pub struct Handle<T: SlotValue = Value> {
    index: u32,
    epoch: u32,
    _marker: PhantomData<T>,
}

impl<T: SlotValue> Handle<T> {
    pub(crate) fn new(index: u32, epoch: u32) -> Self {
        Self {
            index,
            epoch,
            _marker: PhantomData,
        }
    }

    /// Read the rooted value.
    ///
    /// # Panics
    ///
    /// Panics if the slot has been flushed, or if the slot no longer holds a
    /// value of this handle's kind.
    pub fn get(&self, heap: &crate::Heap) -> T {
        let v = heap.handle_stack().read(self.index, self.epoch);
        T::from_value(v).unwrap_or_else(|| panic!("handle slot no longer holds the expected kind"))
    }

    /// Slot index (diagnostics and tests).
    pub fn slot_index(&self) -> u32 {
        self.index
    }
}

impl<T: SlotValue> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SlotValue> Copy for Handle<T> {}

/// A handle whose slot content can be rebound.
///
/// Used for iteration accumulators that would otherwise allocate a new slot
/// per step.
#[derive(Debug)]
pub struct MutHandle<T: SlotValue = Value> {
    index: u32,
    epoch: u32,
    _marker: PhantomData<T>,
}

impl<T: SlotValue> MutHandle<T> {
    pub(crate) fn new(index: u32, epoch: u32) -> Self {
        Self {
            index,
            epoch,
            _marker: PhantomData,
        }
    }

    /// Read the rooted value. Same contract as [`Handle::get`].
    pub fn get(&self, heap: &crate::Heap) -> T {
        let v = heap.handle_stack().read(self.index, self.epoch);
        T::from_value(v).unwrap_or_else(|| panic!("handle slot no longer holds the expected kind"))
    }

    /// Rebind the slot to a new value.
    pub fn set(&self, heap: &mut crate::Heap, value: T) {
        heap.handle_stack_mut()
            .write(self.index, self.epoch, value.into_value());
    }

    /// A read-only view of the same slot.
    pub fn as_handle(&self) -> Handle<T> {
        Handle::new(self.index, self.epoch)
    }
}

impl<T: SlotValue> Clone for MutHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SlotValue> Copy for MutHandle<T> {}

/// Slot storage for rooted values.
///
/// Slots are appended in O(1) amortized time (the vector grows
/// geometrically) and released in LIFO batches by markers and scopes. Each
/// slot records the epoch it was created in; flushing bumps the epoch, so a
/// stale handle whose slot index was reused is still detected.
#[derive(Debug, Default)]
pub(crate) struct HandleStack {
    slots: Vec<Value>,
    slot_epochs: Vec<u32>,
    scopes: Vec<u32>,
    epoch: u32,
}

impl HandleStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a slot, returning `(index, epoch)` for the handle.
    pub(crate) fn push(&mut self, value: Value) -> (u32, u32) {
        let index = self.slots.len() as u32;
        self.slots.push(value);
        self.slot_epochs.push(self.epoch);
        (index, self.epoch)
    }

    pub(crate) fn read(&self, index: u32, epoch: u32) -> Value {
        match self.slots.get(index as usize) {
            Some(v) if self.slot_epochs[index as usize] == epoch => *v,
            _ => panic!("stale handle: slot {index} was released by a marker flush or scope exit"),
        }
    }

    pub(crate) fn write(&mut self, index: u32, epoch: u32, value: Value) {
        match self.slots.get_mut(index as usize) {
            Some(slot) if self.slot_epochs[index as usize] == epoch => *slot = value,
            _ => panic!("stale handle: slot {index} was released by a marker flush or scope exit"),
        }
    }

    pub(crate) fn marker(&self) -> Marker {
        Marker {
            index: self.slots.len() as u32,
        }
    }

    /// Release every slot created after `marker`.
    pub(crate) fn flush_to_marker(&mut self, marker: Marker) {
        let index = marker.index as usize;
        assert!(
            index <= self.slots.len(),
            "marker is ahead of the handle stack; markers are not reusable across flushes"
        );
        self.slots.truncate(index);
        self.slot_epochs.truncate(index);
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub(crate) fn enter_scope(&mut self) {
        self.scopes.push(self.slots.len() as u32);
    }

    pub(crate) fn exit_scope(&mut self) {
        let base = self.scopes.pop().expect("scope exit without matching enter");
        self.flush_to_marker(Marker { index: base });
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> Value {
        self.slots[index]
    }

    pub(crate) fn set_slot(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }
}
