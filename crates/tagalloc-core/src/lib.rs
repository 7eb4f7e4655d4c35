//! # tagalloc-core
//!
//! A user-space dynamic memory allocator that manages one contiguous,
//! monotonically growable heap region. Every block carries a boundary tag
//! (size + allocated bit) at both ends, free blocks are coalesced immediately,
//! and placement is selectable between first-fit, next-fit and best-fit over
//! an implicit or explicit free list.
//!
//! ```text
//!   offset 0                                                    brk
//!   ┌─────┬──────────┬─────────────┬─────────────┬─────┬──────────┐
//!   │ pad │ prologue │  block ...  │  block ...  │ ... │ epilogue │
//!   │  4  │ hdr│ftr  │ hdr|payload|ftr           │     │   hdr    │
//!   └─────┴──────────┴─────────────┴─────────────┴─────┴──────────┘
//! ```
//!
//! Payload "pointers" are byte offsets into the region. Offset `0` is the
//! null value: it always holds alignment padding and is never a payload.
//!
//! No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod heap;

pub use config::{
    ALIGNMENT, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEAP, FreeListKind, HeapConfig, PlacementPolicy,
    ValidationMode,
};
pub use error::{HeapError, Violation};
pub use heap::{
    BlockView, GrowthSource, HeapLimit, HeapLogLevel, HeapLogRecord, HeapRegion, HeapState,
    HeapStats, NULL, to_jsonl,
};
