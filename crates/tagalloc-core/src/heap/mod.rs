//! Boundary-tag heap.
//!
//! Components, leaf first:
//! - [`region`]: the raw growable byte region and the growth primitive it consumes.
//! - [`layout`]: boundary-tag encode/decode; the only place doing address arithmetic.
//! - [`free_list`]: implicit or explicit tracking of free blocks.
//! - [`allocator`]: the [`HeapState`] context, `init` and `allocate`.
//! - [`coalesce`]: `release` and neighbor merging.
//! - [`resize`]: in-place-or-relocate resizing.
//! - [`checker`]: invariant walker used by tests and diagnostics.

pub mod allocator;
pub mod checker;
pub mod coalesce;
pub mod free_list;
pub mod layout;
pub mod log;
pub mod region;
pub mod resize;

pub use allocator::{HeapState, HeapStats};
pub use layout::{BlockView, NULL};
pub use log::{HeapLogLevel, HeapLogRecord, to_jsonl};
pub use region::{GrowthSource, HeapLimit, HeapRegion};
