//! Trace replay harness for tagalloc.
//!
//! Replays allocation traces against a heap under any placement policy and
//! free-list strategy, verifying payload contents and heap invariants along
//! the way, and reports utilization for side-by-side comparison.

pub mod replay;
pub mod trace;

pub use replay::{ReplayError, ReplayOptions, ReplayReport, replay};
pub use trace::{Trace, TraceError, TraceOp, TraceStep, parse_trace};
