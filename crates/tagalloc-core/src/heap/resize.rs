//! Resize: shrink or grow in place when the layout allows, relocate otherwise.
//!
//! Whatever path is taken, the first `min(old payload, new size)` bytes of the
//! block survive. A failed relocation leaves the original block untouched.

use crate::error::HeapError;
use crate::heap::allocator::HeapState;
use crate::heap::layout::{self, MIN_BLOCK_SIZE, NULL, OVERHEAD};
use crate::heap::log::HeapLogLevel;

impl HeapState {
    /// Resize the block at `ptr` to hold at least `size` payload bytes.
    ///
    /// - `ptr == NULL` behaves as [`HeapState::try_allocate`].
    /// - `size == 0` releases `ptr` and returns `Ok(None)`.
    /// - Otherwise returns the (possibly moved) payload offset.
    pub fn try_resize(&mut self, ptr: usize, size: usize) -> Result<Option<usize>, HeapError> {
        if ptr == NULL {
            return self.try_allocate(size);
        }
        if size == 0 {
            self.release(ptr);
            return Ok(None);
        }
        if !self.is_initialized() || (self.hardened() && !self.is_live_payload(ptr)) {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "realloc",
                "invalid_realloc_ignored",
                Some(ptr),
                Some(size),
                "allocate_fresh",
                "pointer_not_live",
            );
            return self.try_allocate(size);
        }

        let Some(asize) = layout::adjusted_size(size) else {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "realloc",
                "oom",
                Some(ptr),
                Some(size),
                "denied",
                "adjusted_size_overflow",
            );
            return Err(HeapError::OutOfMemory {
                requested: size,
                heap_size: self.heap_size(),
            });
        };

        let old = layout::block_size(&self.region, ptr);
        if asize <= old {
            self.shrink_in_place(ptr, old, asize);
            return Ok(Some(ptr));
        }
        if self.grow_in_place(ptr, old, asize) {
            return Ok(Some(ptr));
        }
        self.relocate(ptr, old, size).map(Some)
    }

    /// Resize, returning null ([`None`]) on release or failure.
    pub fn resize(&mut self, ptr: usize, size: usize) -> Option<usize> {
        self.try_resize(ptr, size).ok().flatten()
    }

    fn shrink_in_place(&mut self, ptr: usize, old: usize, asize: usize) {
        if old - asize < MIN_BLOCK_SIZE {
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "realloc",
                "realloc_in_place",
                Some(ptr),
                Some(asize),
                "unchanged",
                format!("block={old}"),
            );
            return;
        }
        layout::write_block(&mut self.region, ptr, asize, true);
        let rest = layout::next_block(&self.region, ptr);
        layout::write_block(&mut self.region, rest, old - asize, false);
        self.note_resized(old - OVERHEAD, asize - OVERHEAD);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "realloc",
            "realloc_in_place",
            Some(ptr),
            Some(asize),
            "shrunk",
            format!("from={old} released={}", old - asize),
        );
        self.coalesce(rest);
    }

    /// Absorb the following free block, extending the heap first when `ptr`
    /// is the last block. Returns `false` if the caller must relocate.
    fn grow_in_place(&mut self, ptr: usize, old: usize, asize: usize) -> bool {
        let next = layout::next_block(&self.region, ptr);
        let mut extended = false;
        if layout::is_epilogue(&self.region, next) {
            let want = (asize - old).max(self.config.chunk_size);
            // Refusal is not fatal here: relocation may still find room.
            extended = self.extend_heap(want).is_ok();
        }
        if layout::is_allocated(&self.region, next) {
            return false;
        }
        let total = old + layout::block_size(&self.region, next);
        if total < asize {
            return false;
        }

        self.unlink(next);
        let kept = if total - asize >= MIN_BLOCK_SIZE {
            layout::write_block(&mut self.region, ptr, asize, true);
            let rest = layout::next_block(&self.region, ptr);
            layout::write_block(&mut self.region, rest, total - asize, false);
            self.free.insert(&mut self.region, rest);
            asize
        } else {
            layout::write_block(&mut self.region, ptr, total, true);
            total
        };
        self.redirect_rover(ptr, ptr + kept);
        self.note_resized(old - OVERHEAD, kept - OVERHEAD);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "realloc",
            "realloc_grow_in_place",
            Some(ptr),
            Some(asize),
            if extended { "extended" } else { "absorbed" },
            format!("from={old} to={kept}"),
        );
        true
    }

    fn relocate(&mut self, ptr: usize, old: usize, size: usize) -> Result<usize, HeapError> {
        let moved = match self.try_allocate(size) {
            Ok(Some(moved)) => moved,
            outcome => {
                let err = outcome.err().unwrap_or(HeapError::OutOfMemory {
                    requested: size,
                    heap_size: self.heap_size(),
                });
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "realloc",
                    "oom",
                    Some(ptr),
                    Some(size),
                    "denied",
                    "original_block_kept",
                );
                return Err(err);
            }
        };
        let copied = (old - OVERHEAD).min(size);
        self.region.copy_within(ptr, moved, copied);
        self.release(ptr);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "realloc",
            "realloc_move",
            Some(moved),
            Some(size),
            "relocated",
            format!("from={ptr} copied={copied}"),
        );
        Ok(moved)
    }
}
