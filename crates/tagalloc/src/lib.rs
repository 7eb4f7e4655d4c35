//! tagalloc: shared access to a boundary-tag heap.
//!
//! [`tagalloc_core::HeapState`] is a plain single-owner value. This crate adds
//! [`SharedHeap`], which serializes every operation behind one lock, and a
//! lazily-built process-wide instance configured from the environment.

#![deny(unsafe_code)]

mod shared;

pub use shared::{SharedHeap, global_heap};
pub use tagalloc_core::{
    BlockView, FreeListKind, HeapConfig, HeapError, HeapLogLevel, HeapLogRecord, HeapState,
    HeapStats, NULL, PlacementPolicy, ValidationMode, Violation,
};
