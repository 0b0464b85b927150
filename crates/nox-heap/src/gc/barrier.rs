//! Write barrier remembered set
//!
//! A minor collection scans no old-generation memory, so every old→young
//! reference must be on record at the time of the write. The remembered set
//! is an object-level pointer log: the addresses of old cells that may hold
//! at least one young reference. The barrier itself lives on
//! [`crate::Heap`], which knows generation membership; this module is just
//! the deduplicated store.

use crate::gc::segment::CellAddr;
use rustc_hash::FxHashSet;

/// Deduplicated set of old cells possibly referencing the young generation.
#[derive(Debug, Default)]
pub(crate) struct RememberedSet {
    cells: FxHashSet<CellAddr>,
}

impl RememberedSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, cell: CellAddr) {
        self.cells.insert(cell);
    }

    pub(crate) fn contains(&self, cell: CellAddr) -> bool {
        self.cells.contains(&cell)
    }

    /// Drain into a vector for scanning; the set is rebuilt from what the
    /// collection observes.
    pub(crate) fn take(&mut self) -> Vec<CellAddr> {
        self.cells.drain().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::header::GcHeader;

    #[test]
    fn test_remembered_set_dedup() {
        let mut set = RememberedSet::new();
        let mut cell = GcHeader::new(crate::CellKind(0), 16, 0);
        let addr = CellAddr::from_ptr(&mut cell as *mut GcHeader as *mut u8);

        set.insert(addr);
        set.insert(addr);
        assert_eq!(set.len(), 1);
        assert!(set.contains(addr));

        let drained = set.take();
        assert_eq!(drained, vec![addr]);
        assert_eq!(set.len(), 0);
    }
}
