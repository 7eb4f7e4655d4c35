//! Trace replay against a heap.
//!
//! Every live allocation is stamped with a byte pattern derived from its id,
//! so replay also detects payload corruption, not just tag damage.

use std::collections::HashMap;

use serde::Serialize;
use tagalloc_core::{HeapConfig, HeapError, HeapLogRecord, HeapState, HeapStats, Violation};
use thiserror::Error;

use crate::trace::{Trace, TraceOp, TraceStep};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("line {line}: id {id} is not live")]
    UnknownId { line: usize, id: u32 },
    #[error("line {line}: id {id} is already live")]
    DuplicateId { line: usize, id: u32 },
    #[error("line {line}: payload of id {id} was corrupted")]
    Corrupted { line: usize, id: u32 },
    #[error("line {line}: {violation}")]
    Invariant { line: usize, violation: Violation },
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Replay settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    pub config: HeapConfig,
    /// Run the consistency checker after every step instead of only at the end.
    pub check_each_step: bool,
}

/// Outcome of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub trace_sha256: String,
    pub policy: &'static str,
    pub free_list: &'static str,
    pub steps: usize,
    /// Requests refused with out-of-memory.
    pub failed_requests: usize,
    pub peak_heap_size: usize,
    pub stats: HeapStats,
    #[serde(skip)]
    pub logs: Vec<HeapLogRecord>,
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: usize,
    len: usize,
}

fn pattern(id: u32, i: usize) -> u8 {
    (id as u8).wrapping_mul(31).wrapping_add(i as u8)
}

fn stamp(heap: &mut HeapState, id: u32, live: Live) {
    for (i, byte) in heap.payload_mut(live.ptr)[..live.len].iter_mut().enumerate() {
        *byte = pattern(id, i);
    }
}

fn stamped(heap: &HeapState, id: u32, ptr: usize, len: usize) -> bool {
    heap.payload(ptr)[..len]
        .iter()
        .enumerate()
        .all(|(i, &byte)| byte == pattern(id, i))
}

fn take(
    live: &mut HashMap<u32, Live>,
    heap: &HeapState,
    step: TraceStep,
) -> Result<Live, ReplayError> {
    let id = step.op.id();
    let entry = live.remove(&id).ok_or(ReplayError::UnknownId {
        line: step.line,
        id,
    })?;
    if !stamped(heap, id, entry.ptr, entry.len) {
        return Err(ReplayError::Corrupted {
            line: step.line,
            id,
        });
    }
    Ok(entry)
}

fn ensure_free(live: &HashMap<u32, Live>, step: TraceStep) -> Result<(), ReplayError> {
    let id = step.op.id();
    if live.contains_key(&id) {
        return Err(ReplayError::DuplicateId {
            line: step.line,
            id,
        });
    }
    Ok(())
}

fn check(heap: &mut HeapState, line: usize) -> Result<(), ReplayError> {
    match heap.check(false).into_iter().next() {
        Some(violation) => Err(ReplayError::Invariant { line, violation }),
        None => Ok(()),
    }
}

/// Replay `trace` on a fresh heap built from `options`.
pub fn replay(trace: &Trace, options: ReplayOptions) -> Result<ReplayReport, ReplayError> {
    let mut heap = HeapState::new(options.config);
    heap.init()?;
    let mut live: HashMap<u32, Live> = HashMap::new();
    let mut failed_requests = 0;
    let mut peak_heap_size = heap.heap_size();

    for &step in &trace.steps {
        match step.op {
            TraceOp::Alloc { id, size } => {
                ensure_free(&live, step)?;
                match heap.try_allocate(size) {
                    Ok(Some(ptr)) => {
                        let entry = Live { ptr, len: size };
                        stamp(&mut heap, id, entry);
                        live.insert(id, entry);
                    }
                    Ok(None) => {}
                    Err(HeapError::OutOfMemory { .. }) => failed_requests += 1,
                    Err(err) => return Err(err.into()),
                }
            }
            TraceOp::Calloc { id, count, size } => {
                ensure_free(&live, step)?;
                match heap.calloc(count, size) {
                    Some(ptr) => {
                        let len = count.saturating_mul(size);
                        if heap.payload(ptr)[..len].iter().any(|&byte| byte != 0) {
                            return Err(ReplayError::Corrupted {
                                line: step.line,
                                id,
                            });
                        }
                        let entry = Live { ptr, len };
                        stamp(&mut heap, id, entry);
                        live.insert(id, entry);
                    }
                    None if count.checked_mul(size).is_some_and(|total| total > 0) => {
                        failed_requests += 1;
                    }
                    None => {}
                }
            }
            TraceOp::Realloc { id, size } => {
                let entry = take(&mut live, &heap, step)?;
                match heap.try_resize(entry.ptr, size) {
                    Ok(Some(ptr)) => {
                        let kept = entry.len.min(size);
                        if !stamped(&heap, id, ptr, kept) {
                            return Err(ReplayError::Corrupted {
                                line: step.line,
                                id,
                            });
                        }
                        let entry = Live { ptr, len: size };
                        stamp(&mut heap, id, entry);
                        live.insert(id, entry);
                    }
                    Ok(None) => {}
                    Err(HeapError::OutOfMemory { .. }) => {
                        failed_requests += 1;
                        live.insert(id, entry);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            TraceOp::Free { id: _ } => {
                let entry = take(&mut live, &heap, step)?;
                heap.release(entry.ptr);
            }
        }
        peak_heap_size = peak_heap_size.max(heap.heap_size());
        if options.check_each_step {
            check(&mut heap, step.line)?;
        }
    }
    let last_line = trace.steps.last().map_or(0, |step| step.line);
    check(&mut heap, last_line)?;

    Ok(ReplayReport {
        trace_sha256: trace.sha256.clone(),
        policy: options.config.policy.as_str(),
        free_list: options.config.free_list.as_str(),
        steps: trace.steps.len(),
        failed_requests,
        peak_heap_size,
        stats: heap.stats(),
        logs: heap.drain_lifecycle_logs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;
    use tagalloc_core::{FreeListKind, HeapLogLevel, PlacementPolicy};

    fn options(policy: PlacementPolicy, kind: FreeListKind) -> ReplayOptions {
        ReplayOptions {
            config: HeapConfig::default()
                .with_policy(policy)
                .with_free_list(kind)
                .with_log_level(Some(HeapLogLevel::Info)),
            check_each_step: true,
        }
    }

    #[test]
    fn replays_mixed_trace() {
        let trace = parse_trace("a 0 100\na 1 200\nf 0\nc 2 5 10\nr 1 900\nr 2 0\nf 1\n")
            .expect("parse");
        let report =
            replay(&trace, options(PlacementPolicy::BestFit, FreeListKind::Explicit)).expect("ok");
        assert_eq!(report.steps, 7);
        assert_eq!(report.failed_requests, 0);
        assert_eq!(report.stats.live_blocks, 0);
        assert_eq!(report.policy, "best-fit");
        assert!(report.logs.iter().any(|record| record.event == "init"));
    }

    #[test]
    fn out_of_memory_is_counted_not_fatal() {
        let trace = parse_trace("a 0 3000\na 1 9000\nf 0\n").expect("parse");
        let mut opts = options(PlacementPolicy::FirstFit, FreeListKind::Implicit);
        opts.config = opts.config.with_max_heap(16 + 4096);
        let report = replay(&trace, opts).expect("ok");
        assert_eq!(report.failed_requests, 1);
        assert_eq!(report.peak_heap_size, 16 + 4096);
    }

    #[test]
    fn rejects_unknown_and_duplicate_ids() {
        let opts = options(PlacementPolicy::NextFit, FreeListKind::Explicit);
        let trace = parse_trace("a 0 8\nf 1\n").expect("parse");
        assert_eq!(
            replay(&trace, opts).unwrap_err(),
            ReplayError::UnknownId { line: 2, id: 1 }
        );
        let trace = parse_trace("a 0 8\na 0 8\n").expect("parse");
        assert_eq!(
            replay(&trace, opts).unwrap_err(),
            ReplayError::DuplicateId { line: 2, id: 0 }
        );
    }
}
