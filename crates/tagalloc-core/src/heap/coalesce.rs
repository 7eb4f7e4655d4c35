//! Release and immediate boundary-tag coalescing.

use crate::heap::allocator::HeapState;
use crate::heap::layout::{self, NULL};
use crate::heap::log::HeapLogLevel;

impl HeapState {
    /// Return a block to the heap.
    ///
    /// Freeing null is a no-op. In hardened mode a pointer that does not name
    /// a live block is ignored and logged; in strict mode it is a contract
    /// violation whose effect on the heap is unspecified.
    pub fn release(&mut self, ptr: usize) {
        if ptr == NULL {
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "free",
                "free_null",
                None,
                None,
                "noop",
                "null_pointer",
            );
            return;
        }
        if !self.is_initialized() || (self.hardened() && !self.is_live_payload(ptr)) {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "free",
                "invalid_free_ignored",
                Some(ptr),
                None,
                "ignored",
                "pointer_not_live",
            );
            return;
        }

        let size = layout::block_size(&self.region, ptr);
        self.note_released(size.saturating_sub(layout::OVERHEAD));
        layout::write_block(&mut self.region, ptr, size, false);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "free",
            "free",
            Some(ptr),
            Some(size),
            "success",
            String::new(),
        );
        self.coalesce(ptr);
    }

    /// Merge the free block at `bp` with any free physical neighbors, insert
    /// the result into the tracker and return its payload offset.
    ///
    /// `bp` must be tagged free and must not be tracked yet.
    pub(crate) fn coalesce(&mut self, bp: usize) -> usize {
        let prev_alloc = layout::prev_allocated(&self.region, bp);
        let next = layout::next_block(&self.region, bp);
        let next_alloc = layout::is_allocated(&self.region, next);
        let mut size = layout::block_size(&self.region, bp);

        let (start, case) = match (prev_alloc, next_alloc) {
            (true, true) => (bp, "isolated"),
            (true, false) => {
                size += layout::block_size(&self.region, next);
                self.unlink(next);
                (bp, "merge_next")
            }
            (false, true) => {
                let prev = layout::prev_block(&self.region, bp);
                size += layout::block_size(&self.region, prev);
                self.unlink(prev);
                (prev, "merge_prev")
            }
            (false, false) => {
                let prev = layout::prev_block(&self.region, bp);
                size += layout::block_size(&self.region, prev)
                    + layout::block_size(&self.region, next);
                self.unlink(prev);
                self.unlink(next);
                (prev, "merge_both")
            }
        };

        layout::write_block(&mut self.region, start, size, false);
        self.free.insert(&mut self.region, start);
        self.redirect_rover(start, start + size);
        self.record_lifecycle(
            HeapLogLevel::Debug,
            "free",
            "coalesce",
            Some(start),
            Some(size),
            case,
            format!("released={bp}"),
        );
        start
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{FreeListKind, HeapConfig, PlacementPolicy, ValidationMode};
    use crate::heap::allocator::HeapState;
    use crate::heap::layout::{BlockView, FIRST_BLOCK, NULL};
    use crate::heap::log::HeapLogLevel;

    fn heap(free_list: FreeListKind) -> HeapState {
        HeapState::new(
            HeapConfig::default()
                .with_free_list(free_list)
                .with_log_level(Some(HeapLogLevel::Debug)),
        )
    }

    /// Four adjacent blocks followed by the free tail.
    fn four_blocks(state: &mut HeapState) -> [usize; 4] {
        [
            state.allocate(24).expect("a"),
            state.allocate(40).expect("b"),
            state.allocate(8).expect("c"),
            state.allocate(16).expect("d"),
        ]
    }

    fn coalesce_cases(state: &mut HeapState) -> Vec<&'static str> {
        state
            .drain_lifecycle_logs()
            .into_iter()
            .filter(|entry| entry.event == "coalesce")
            .map(|entry| entry.outcome)
            .collect()
    }

    #[test]
    fn free_null_is_noop() {
        let mut state = heap(FreeListKind::Explicit);
        let ptr = state.allocate(32).expect("alloc");
        let before: Vec<BlockView> = state.blocks().collect();
        state.release(NULL);
        assert_eq!(state.blocks().collect::<Vec<_>>(), before);
        assert!(state.is_live_payload(ptr));
    }

    #[test]
    fn all_four_cases_for_both_trackers() {
        for kind in FreeListKind::ALL {
            let mut state = heap(kind);
            let [a, b, c, d] = four_blocks(&mut state);
            let size = |s: &HeapState, p: usize| {
                s.blocks().find(|v| v.offset == p).map(|v| v.size)
            };
            let (sa, sb, sc) = (
                size(&state, a).expect("a"),
                size(&state, b).expect("b"),
                size(&state, c).expect("c"),
            );
            state.drain_lifecycle_logs();

            state.release(a);
            assert_eq!(coalesce_cases(&mut state), vec!["isolated"], "{kind:?}");
            state.release(c);
            assert_eq!(coalesce_cases(&mut state), vec!["isolated"], "{kind:?}");
            state.release(b);
            assert_eq!(coalesce_cases(&mut state), vec!["merge_both"], "{kind:?}");

            let merged = state.blocks().find(|v| v.offset == a).expect("merged");
            assert!(!merged.allocated);
            assert_eq!(merged.size, sa + sb + sc);
            assert_eq!(merged.end(), d);

            state.release(d);
            assert_eq!(coalesce_cases(&mut state), vec!["merge_both"], "{kind:?}");
            let blocks: Vec<BlockView> = state.blocks().collect();
            assert_eq!(blocks.len(), 1, "{kind:?}");
            assert_eq!(blocks[0].offset, FIRST_BLOCK);
            assert!(state.check(false).is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn merge_prev_and_merge_next() {
        let mut state = heap(FreeListKind::Explicit);
        let [a, b, c, _d] = four_blocks(&mut state);
        state.drain_lifecycle_logs();

        state.release(a);
        state.release(b);
        assert_eq!(coalesce_cases(&mut state), vec!["isolated", "merge_prev"]);

        let mut state = heap(FreeListKind::Explicit);
        let [_a, b, c2, _d] = four_blocks(&mut state);
        assert_eq!(c, c2);
        state.drain_lifecycle_logs();
        state.release(c2);
        state.release(b);
        assert_eq!(coalesce_cases(&mut state), vec!["isolated", "merge_next"]);
        assert_eq!(state.free_blocks()[0].offset, b);
    }

    #[test]
    fn no_adjacent_free_blocks_after_release() {
        let mut state = heap(FreeListKind::Implicit);
        let ptrs: Vec<usize> = (1..=12)
            .map(|i| state.allocate(i * 8).expect("alloc"))
            .collect();
        for ptr in ptrs.iter().step_by(2) {
            state.release(*ptr);
        }
        for ptr in ptrs.iter().skip(1).step_by(2) {
            state.release(*ptr);
        }
        let blocks: Vec<BlockView> = state.blocks().collect();
        assert!(
            blocks
                .windows(2)
                .all(|pair| pair[0].allocated || pair[1].allocated)
        );
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn released_block_is_reused_lifo() {
        let mut state = heap(FreeListKind::Explicit);
        let a = state.allocate(64).expect("a");
        let _guard = state.allocate(8).expect("guard");
        state.release(a);
        assert_eq!(state.free_blocks()[0].offset, a);
        assert_eq!(state.allocate(64), Some(a));
    }

    #[test]
    fn rover_redirected_to_merged_start() {
        let mut state = HeapState::new(
            HeapConfig::default()
                .with_policy(PlacementPolicy::NextFit)
                .with_free_list(FreeListKind::Implicit),
        );
        let _a = state.allocate(16).expect("a");
        let b = state.allocate(16).expect("b");
        let c = state.allocate(16).expect("c");
        assert_eq!(state.rover(), Some(c));
        state.release(c);
        assert_eq!(state.rover(), Some(c));
        // Merging into `b` swallows the block the rover points at.
        state.release(b);
        assert_eq!(state.rover(), Some(b));
        assert!(state.check(false).is_empty());
    }

    #[test]
    fn hardened_mode_ignores_bad_free() {
        let mut state = HeapState::new(
            HeapConfig::default()
                .with_mode(ValidationMode::Hardened)
                .with_log_level(Some(HeapLogLevel::Warn)),
        );
        let ptr = state.allocate(48).expect("alloc");
        state.release(ptr + 8);
        state.release(1 << 20);
        assert!(state.is_live_payload(ptr));

        state.release(ptr);
        state.release(ptr);
        assert!(state.check(false).is_empty());
        let ignored = state
            .lifecycle_logs()
            .iter()
            .filter(|entry| entry.event == "invalid_free_ignored")
            .count();
        assert_eq!(ignored, 3);
        assert_eq!(state.stats().live_blocks, 0);
    }

    #[test]
    fn free_before_init_is_ignored() {
        let mut state = heap(FreeListKind::Explicit);
        state.release(64);
        assert!(!state.is_initialized());
        assert_eq!(state.heap_size(), 0);
    }
}
