//! Weak references
//!
//! A [`WeakRef`] relates to a cell without keeping it alive. The heap owns
//! the slot storage; after the phase of a collection that decides liveness,
//! every slot whose target was not retained is cleared before the mutator
//! can observe it again. The collector is synchronous, so clearing is
//! atomic with respect to readers.
//!
//! Slots are recycled through a free list; [`crate::Heap::release_weak`]
//! returns a slot explicitly.

use crate::value::Value;

/// Key to a heap-owned weak slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakRef {
    pub(crate) index: u32,
}

#[derive(Debug)]
pub(crate) enum WeakSlot {
    /// Target still considered reachable as of the last collection.
    Live(Value),
    /// Target was reclaimed; reads yield nothing until the slot is released.
    Cleared,
    /// Slot is on the free list.
    Free { next: Option<u32> },
}

/// Heap-owned weak slot table.
#[derive(Debug, Default)]
pub(crate) struct WeakTable {
    slots: Vec<WeakSlot>,
    free_head: Option<u32>,
}

impl WeakTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, target: Value) -> WeakRef {
        match self.free_head {
            Some(index) => {
                self.free_head = match self.slots[index as usize] {
                    WeakSlot::Free { next } => next,
                    _ => unreachable!("free list points at an occupied slot"),
                };
                self.slots[index as usize] = WeakSlot::Live(target);
                WeakRef { index }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(WeakSlot::Live(target));
                WeakRef { index }
            }
        }
    }

    pub(crate) fn get(&self, weak: WeakRef) -> Option<Value> {
        match &self.slots[weak.index as usize] {
            WeakSlot::Live(v) => Some(*v),
            WeakSlot::Cleared => None,
            WeakSlot::Free { .. } => panic!("weak reference used after release"),
        }
    }

    pub(crate) fn release(&mut self, weak: WeakRef) {
        match self.slots[weak.index as usize] {
            WeakSlot::Free { .. } => panic!("weak reference released twice"),
            _ => {
                self.slots[weak.index as usize] = WeakSlot::Free {
                    next: self.free_head,
                };
                self.free_head = Some(weak.index);
            }
        }
    }

    /// Visit every live slot; the collector updates or clears each in place.
    pub(crate) fn for_each_live<F>(&mut self, mut f: F)
    where
        F: FnMut(Value) -> Option<Value>,
    {
        for slot in &mut self.slots {
            if let WeakSlot::Live(v) = slot {
                match f(*v) {
                    Some(updated) => *slot = WeakSlot::Live(updated),
                    None => *slot = WeakSlot::Cleared,
                }
            }
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, WeakSlot::Live(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_table_insert_get() {
        let mut table = WeakTable::new();
        let w = table.insert(Value::int(5));
        assert_eq!(table.get(w), Some(Value::int(5)));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_weak_table_clearing() {
        let mut table = WeakTable::new();
        let w = table.insert(Value::int(1));
        table.for_each_live(|_| None);
        assert_eq!(table.get(w), None);
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_weak_table_free_list_reuse() {
        let mut table = WeakTable::new();
        let a = table.insert(Value::int(1));
        let b = table.insert(Value::int(2));
        table.release(a);
        let c = table.insert(Value::int(3));
        // The released slot is reused.
        assert_eq!(c.index, a.index);
        assert_eq!(table.get(b), Some(Value::int(2)));
        assert_eq!(table.get(c), Some(Value::int(3)));
    }

    #[test]
    #[should_panic(expected = "after release")]
    fn test_weak_table_use_after_release() {
        let mut table = WeakTable::new();
        let a = table.insert(Value::int(1));
        table.release(a);
        let _ = table.get(a);
    }
}
