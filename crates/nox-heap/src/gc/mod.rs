//! Generational garbage collection
//!
//! # Architecture
//!
//! - **GcHeader**: 16-byte header in front of every cell (kind, flags, age,
//!   size, forwarding word)
//! - **Metadata**: per-kind trace descriptors, built once, immutable
//! - **HandleStack**: rooted slots with LIFO scope/marker discipline
//! - **Segment**: the single address reservation holding both generations,
//!   and the compressed-pointer translation layer
//! - **Heap**: the explicit context value owning everything above
//! - **Collector**: copying minor collection + mark-compact full collection
//! - **Weak**: heap-owned weak reference slots
//!
//! # Memory layout
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────┬────────────────────┐
//! │ reserved │ young from-space │ young to-space   │ old generation     │
//! └──────────┴──────────────────┴──────────────────┴────────────────────┘
//!  ← one reservation of maxHeapSize bytes →
//! ```
//!
//! Each cell is `GcHeader` followed by its payload, 8-byte aligned. The
//! collector relocates cells; native code reaches them only through
//! [`handles::Handle`]s, which are updated in place on every move.

pub mod barrier;
pub mod collector;
pub mod handles;
pub mod header;
pub mod heap;
pub mod metadata;
pub mod segment;
pub mod weak;
