//! Core allocator state.
//!
//! [`HeapState`] owns everything a heap needs (region, free-space tracker,
//! next-fit rover, accounting and lifecycle log), so independent heaps can
//! coexist. This module implements `init` and the allocation engine; release
//! lives in [`super::coalesce`], resizing in [`super::resize`] and invariant
//! checks in [`super::checker`].

use serde::Serialize;

use crate::config::{FreeListKind, HeapConfig, PlacementPolicy, ValidationMode};
use crate::error::HeapError;
use crate::heap::free_list::FreeList;
use crate::heap::layout::{
    self, BlockView, Blocks, FIRST_BLOCK, MIN_BLOCK_SIZE, SENTINEL_BYTES,
};
use crate::heap::log::{HeapLogLevel, HeapLogRecord};
use crate::heap::region::{GrowthSource, HeapLimit, HeapRegion};

/// Point-in-time heap statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub heap_size: usize,
    pub live_blocks: usize,
    pub live_payload_bytes: usize,
    pub peak_live_payload_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub grow_calls: u64,
    /// Peak live payload over heap size, in permille.
    pub utilization_permille: u16,
}

/// A single heap and all of its allocator state.
#[derive(Debug)]
pub struct HeapState {
    pub(crate) config: HeapConfig,
    pub(crate) region: HeapRegion,
    pub(crate) free: FreeList,
    /// Next-fit resume position. Position only: it is redirected whenever the
    /// block it names is unlinked or merged away.
    pub(crate) rover: Option<usize>,
    initialized: bool,
    pub(crate) live_blocks: usize,
    pub(crate) live_payload_bytes: usize,
    peak_live_payload_bytes: usize,
    next_decision_id: u64,
    lifecycle_logs: Vec<HeapLogRecord>,
}

impl HeapState {
    /// Creates an uninitialized heap whose growth is capped at `config.max_heap`.
    ///
    /// The heap initializes itself on first use; call [`HeapState::init`] to
    /// do it eagerly and observe failures.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        let source = Box::new(HeapLimit::new(config.max_heap));
        Self::with_source(config, source)
    }

    /// Creates an uninitialized heap backed by a caller-provided growth primitive.
    #[must_use]
    pub fn with_source(config: HeapConfig, source: Box<dyn GrowthSource>) -> Self {
        let config = config.normalized();
        Self {
            config,
            region: HeapRegion::new(source),
            free: FreeList::new(config.free_list),
            rover: None,
            initialized: false,
            live_blocks: 0,
            live_payload_bytes: 0,
            peak_live_payload_bytes: 0,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    /// (Re)establish an empty heap holding only the prologue and epilogue.
    ///
    /// Every previously returned payload offset becomes invalid.
    pub fn init(&mut self) -> Result<(), HeapError> {
        self.region.reset();
        self.free.reset();
        self.rover = None;
        self.initialized = false;
        self.live_blocks = 0;
        self.live_payload_bytes = 0;
        self.peak_live_payload_bytes = 0;

        if let Err(err) = self.region.grow(SENTINEL_BYTES) {
            self.record_lifecycle(
                HeapLogLevel::Error,
                "init",
                "init",
                None,
                Some(SENTINEL_BYTES),
                "oom",
                err.to_string(),
            );
            return Err(err);
        }
        layout::write_sentinels(&mut self.region);
        self.initialized = true;
        self.record_lifecycle(
            HeapLogLevel::Info,
            "init",
            "init",
            None,
            Some(SENTINEL_BYTES),
            "success",
            format!(
                "policy={} free_list={} chunk_size={}",
                self.config.policy.as_str(),
                self.config.free_list.as_str(),
                self.config.chunk_size
            ),
        );
        Ok(())
    }

    pub(crate) fn ensure_initialized(&mut self) -> Result<(), HeapError> {
        if self.initialized {
            return Ok(());
        }
        self.init()
    }

    /// Allocates a block with at least `size` payload bytes.
    ///
    /// Returns `Ok(None)` for a zero-byte request. Fails only when the heap
    /// must grow and the growth primitive refuses; existing blocks are left
    /// untouched in that case.
    pub fn try_allocate(&mut self, size: usize) -> Result<Option<usize>, HeapError> {
        if size == 0 {
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "malloc",
                "alloc_zero",
                None,
                Some(0),
                "null",
                "zero_size_request",
            );
            return Ok(None);
        }
        self.ensure_initialized()?;

        let Some(asize) = layout::adjusted_size(size) else {
            let err = HeapError::OutOfMemory {
                requested: size,
                heap_size: self.region.len(),
            };
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "malloc",
                "oom",
                None,
                Some(size),
                "denied",
                "adjusted_size_overflow",
            );
            return Err(err);
        };

        let (bp, path) = match self.find_fit(asize) {
            Some(bp) => (bp, "fit"),
            None => {
                let extend = asize.max(self.config.chunk_size);
                match self.extend_heap(extend) {
                    Ok(bp) => (bp, "extend"),
                    Err(err) => {
                        self.record_lifecycle(
                            HeapLogLevel::Warn,
                            "malloc",
                            "oom",
                            None,
                            Some(size),
                            "denied",
                            format!("asize={asize} extend={extend} error={err}"),
                        );
                        return Err(err);
                    }
                }
            }
        };

        self.place(bp, asize);
        self.note_allocated(layout::payload_size(&self.region, bp));
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "malloc",
            "alloc",
            Some(bp),
            Some(size),
            "success",
            format!("path={path} asize={asize}"),
        );
        Ok(Some(bp))
    }

    /// Allocates `size` bytes, returning null ([`None`]) on zero size or failure.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        self.try_allocate(size).ok().flatten()
    }

    /// Allocates zeroed memory for `count` objects of `size` bytes each.
    ///
    /// Returns `None` on multiplication overflow, zero total, or failure.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                "denied",
                format!("count={count} size={size}"),
            );
            return None;
        };
        let ptr = self.allocate(total)?;
        let len = layout::payload_size(&self.region, ptr);
        self.region.fill(ptr, len, 0);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "calloc",
            "calloc_result",
            Some(ptr),
            Some(total),
            "success",
            format!("count={count} elem_size={size}"),
        );
        Some(ptr)
    }

    /// Search the free-space tracker under the configured placement policy.
    fn find_fit(&mut self, asize: usize) -> Option<usize> {
        let region = &self.region;
        let fits = |bp: &usize| layout::block_size(region, *bp) >= asize;
        match self.config.policy {
            PlacementPolicy::FirstFit => self.free.iter(region).find(fits),
            PlacementPolicy::NextFit => {
                let found = match self.rover {
                    Some(rover) => self.free.scan_from(region, rover).find(fits),
                    None => self.free.iter(region).find(fits),
                };
                if found.is_some() {
                    self.rover = found;
                }
                found
            }
            PlacementPolicy::BestFit => {
                let mut best: Option<(usize, usize)> = None;
                for bp in self.free.iter(region) {
                    let size = layout::block_size(region, bp);
                    if size < asize {
                        continue;
                    }
                    let leftover = size - asize;
                    if best.is_none_or(|(_, least)| leftover < least) {
                        best = Some((bp, leftover));
                        if leftover == 0 {
                            break;
                        }
                    }
                }
                best.map(|(bp, _)| bp)
            }
        }
    }

    /// Grow the heap by `bytes` and return the (possibly coalesced) new free block.
    pub(crate) fn extend_heap(&mut self, bytes: usize) -> Result<usize, HeapError> {
        let size = layout::align_up(bytes)
            .ok_or(HeapError::OutOfMemory {
                requested: bytes,
                heap_size: self.region.len(),
            })?
            .max(MIN_BLOCK_SIZE);
        // The old epilogue header becomes the new block's header.
        let bp = self.region.grow(size)?;
        layout::write_block(&mut self.region, bp, size, false);
        let end = layout::next_block(&self.region, bp);
        layout::write_epilogue(&mut self.region, end);
        self.record_lifecycle(
            HeapLogLevel::Debug,
            "malloc",
            "extend_heap",
            Some(bp),
            Some(size),
            "success",
            format!("grow_calls={}", self.region.grow_calls()),
        );
        Ok(self.coalesce(bp))
    }

    /// Mark `asize` bytes of the free block at `bp` allocated, splitting off
    /// the remainder when it can stand as a block of its own.
    fn place(&mut self, bp: usize, asize: usize) {
        let csize = layout::block_size(&self.region, bp);
        self.unlink(bp);
        if csize - asize >= MIN_BLOCK_SIZE {
            layout::write_block(&mut self.region, bp, asize, true);
            let rest = layout::next_block(&self.region, bp);
            layout::write_block(&mut self.region, rest, csize - asize, false);
            self.free.insert(&mut self.region, rest);
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "malloc",
                "split",
                Some(rest),
                Some(csize - asize),
                "remainder_free",
                format!("from={csize} kept={asize}"),
            );
        } else {
            layout::write_block(&mut self.region, bp, csize, true);
        }
    }

    /// Remove a free block from the tracker, moving the rover off it first.
    pub(crate) fn unlink(&mut self, bp: usize) {
        if self.rover == Some(bp) && self.free.kind() == FreeListKind::Explicit {
            self.rover = self.free.successor(&self.region, bp);
        }
        self.free.remove(&mut self.region, bp);
    }

    /// Point the rover at `start` if it names a position strictly inside the
    /// block spanning `[start, end)`.
    pub(crate) fn redirect_rover(&mut self, start: usize, end: usize) {
        if let Some(rover) = self.rover {
            if rover > start && rover < end {
                self.rover = Some(start);
            }
        }
    }

    pub(crate) fn note_allocated(&mut self, payload: usize) {
        self.live_blocks += 1;
        self.live_payload_bytes += payload;
        self.peak_live_payload_bytes = self.peak_live_payload_bytes.max(self.live_payload_bytes);
    }

    pub(crate) fn note_released(&mut self, payload: usize) {
        self.live_blocks = self.live_blocks.saturating_sub(1);
        self.live_payload_bytes = self.live_payload_bytes.saturating_sub(payload);
    }

    pub(crate) fn note_resized(&mut self, old_payload: usize, new_payload: usize) {
        self.live_payload_bytes = self.live_payload_bytes.saturating_sub(old_payload) + new_payload;
        self.peak_live_payload_bytes = self.peak_live_payload_bytes.max(self.live_payload_bytes);
    }

    /// Best-effort check that `ptr` names a live block of this heap.
    #[must_use]
    pub fn is_live_payload(&self, ptr: usize) -> bool {
        if !self.initialized || ptr < FIRST_BLOCK || ptr % crate::config::ALIGNMENT != 0 {
            return false;
        }
        let Some(header) = self.region.try_read_word(layout::header_of(ptr)) else {
            return false;
        };
        let size = layout::tag_size(header);
        if !layout::tag_allocated(header) || size < MIN_BLOCK_SIZE {
            return false;
        }
        match ptr.checked_add(size) {
            Some(end) if end <= self.region.len() => {}
            _ => return false,
        }
        self.region.try_read_word(ptr + size - layout::DSIZE) == Some(header)
    }

    pub(crate) fn hardened(&self) -> bool {
        self.config.mode == ValidationMode::Hardened
    }

    /// Usable bytes of the allocated block at `ptr`.
    #[must_use]
    pub fn payload_size(&self, ptr: usize) -> usize {
        layout::payload_size(&self.region, ptr)
    }

    /// Payload bytes of the block at `ptr`.
    #[must_use]
    pub fn payload(&self, ptr: usize) -> &[u8] {
        let len = self.payload_size(ptr);
        self.region.slice(ptr, len)
    }

    /// Mutable payload bytes of the block at `ptr`.
    pub fn payload_mut(&mut self, ptr: usize) -> &mut [u8] {
        let len = self.payload_size(ptr);
        self.region.slice_mut(ptr, len)
    }

    /// Every block between the sentinels in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(&self.region)
    }

    /// Free blocks in tracker order.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<BlockView> {
        if !self.initialized {
            return Vec::new();
        }
        self.free
            .iter(&self.region)
            .map(|bp| BlockView {
                offset: bp,
                size: layout::block_size(&self.region, bp),
                allocated: false,
            })
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let (free_blocks, free_bytes) = self
            .blocks()
            .filter(|block| !block.allocated)
            .fold((0, 0), |(count, bytes), block| (count + 1, bytes + block.size));
        let heap_size = self.region.len();
        let utilization_permille = if heap_size == 0 {
            0
        } else {
            (self.peak_live_payload_bytes.saturating_mul(1000) / heap_size).min(1000) as u16
        };
        HeapStats {
            heap_size,
            live_blocks: self.live_blocks,
            live_payload_bytes: self.live_payload_bytes,
            peak_live_payload_bytes: self.peak_live_payload_bytes,
            free_blocks,
            free_bytes,
            grow_calls: self.region.grow_calls(),
            utilization_permille,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.region.len()
    }

    /// Current next-fit resume position.
    #[must_use]
    pub fn rover(&self) -> Option<usize> {
        self.rover
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    fn log_enabled(&self, level: HeapLogLevel) -> bool {
        self.config.log_level.is_some_and(|min| level >= min)
    }

    pub(crate) fn record_lifecycle(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if !self.log_enabled(level) {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("core::heap::{}::{:016x}", symbol, decision_id);
        self.lifecycle_logs.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            outcome,
            details: details.into(),
            heap_size: self.region.len(),
            live_blocks: self.live_blocks,
            live_payload_bytes: self.live_payload_bytes,
        });
    }

    /// Returns a view of heap lifecycle log records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle_logs
    }

    /// Drains heap lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}

impl Default for HeapState {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}
