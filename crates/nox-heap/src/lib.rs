//! Nox VM managed heap
//!
//! This crate provides the memory core shared by the rest of the runtime:
//! - Tagged value representation (NaN-boxed, 8 bytes)
//! - Heap cells with per-kind trace metadata
//! - Handle scopes for rooting values across collections
//! - Generational garbage collector (copying young generation,
//!   mark-compact old generation) with a write barrier
//! - Weak references and finalization
//!
//! The heap is a single explicit context value ([`Heap`]) owned by the
//! embedding runtime. One mutator thread owns it; collections run
//! synchronously on that thread, from inside an allocation call or an
//! explicit `collect_*` request. Alternate collection strategies (concurrent,
//! incremental) are an extension point, not part of this crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod gc;
pub mod value;

pub use config::{GcConfig, OomPolicy, RuntimeConfig};
pub use gc::collector::GcStats;
pub use gc::handles::{Handle, Marker, MutHandle, SlotValue};
pub use gc::heap::{Generation, Heap};
pub use gc::metadata::{
    CellKind, FieldKind, Finalizer, Metadata, MetadataBuilder, MetadataTable,
};
pub use gc::segment::GcRef;
pub use gc::weak::WeakRef;
pub use value::{ObjectRef, StringRef, Value};

/// Heap failures that surface to the calling runtime as first-class errors.
///
/// Everything else this crate can complain about (metadata contract
/// violations, stale handle use) is a programming error and panics instead.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// The heap cannot satisfy an allocation even after a full collection.
    #[error("out of memory: requested {requested} bytes, heap maximum is {max} bytes")]
    OutOfMemory {
        /// Bytes requested, including the cell header.
        requested: usize,
        /// Configured `maxHeapSize`.
        max: usize,
    },

    /// The heap configuration is malformed or inconsistent.
    #[error("invalid gc config: {0}")]
    InvalidConfig(String),
}

/// Result alias for fallible heap operations.
pub type HeapResult<T> = Result<T, HeapError>;
