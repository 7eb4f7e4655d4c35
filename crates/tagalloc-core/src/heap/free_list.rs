//! Free space tracking.
//!
//! Two interchangeable strategies:
//! - implicit: no state; free blocks are found by walking every block.
//! - explicit: LIFO doubly-linked list threaded through free payloads, so
//!   insert/remove are O(1) and searches only visit free blocks.
//!
//! Callers must flip a block's allocated bit and update the tracker together;
//! `insert` expects a block already tagged free and `remove` expects one that
//! is still tagged free.

use crate::config::FreeListKind;
use crate::heap::layout::{self, FIRST_BLOCK};
use crate::heap::region::HeapRegion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeList {
    kind: FreeListKind,
    head: Option<usize>,
}

impl FreeList {
    #[must_use]
    pub fn new(kind: FreeListKind) -> Self {
        Self { kind, head: None }
    }

    #[must_use]
    pub fn kind(&self) -> FreeListKind {
        self.kind
    }

    /// First entry of the explicit list.
    #[must_use]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn reset(&mut self) {
        self.head = None;
    }

    /// Splice a free block in at the head.
    pub fn insert(&mut self, region: &mut HeapRegion, bp: usize) {
        debug_assert!(
            !layout::is_allocated(region, bp),
            "inserting allocated block {bp}"
        );
        if self.kind == FreeListKind::Implicit {
            return;
        }
        layout::set_next_link(region, bp, self.head);
        layout::set_prev_link(region, bp, None);
        if let Some(head) = self.head {
            layout::set_prev_link(region, head, Some(bp));
        }
        self.head = Some(bp);
    }

    /// Splice a free block out using its own links.
    pub fn remove(&mut self, region: &mut HeapRegion, bp: usize) {
        debug_assert!(
            !layout::is_allocated(region, bp),
            "removing allocated block {bp}"
        );
        if self.kind == FreeListKind::Implicit {
            return;
        }
        let prev = layout::prev_link(region, bp);
        let next = layout::next_link(region, bp);
        match prev {
            Some(prev) => layout::set_next_link(region, prev, next),
            None => {
                debug_assert_eq!(self.head, Some(bp), "block {bp} has no prev but is not head");
                self.head = next;
            }
        }
        if let Some(next) = next {
            layout::set_prev_link(region, next, prev);
        }
    }

    /// Entry following `bp` in tracker order, if the list records one.
    #[must_use]
    pub fn successor(&self, region: &HeapRegion, bp: usize) -> Option<usize> {
        match self.kind {
            FreeListKind::Implicit => None,
            FreeListKind::Explicit => layout::next_link(region, bp),
        }
    }

    /// Every free block, from the start of the tracker order.
    #[must_use]
    pub fn iter<'a>(&self, region: &'a HeapRegion) -> FreeBlocks<'a> {
        FreeBlocks {
            region,
            kind: self.kind,
            cursor: self.first(region),
            restart: None,
            stop: None,
            wrapped: false,
        }
    }

    /// Every free block in one cyclic pass beginning at `start`.
    ///
    /// For the explicit list `start` must be a list entry. For the implicit
    /// walk it may be any block, free or allocated.
    #[must_use]
    pub fn scan_from<'a>(&self, region: &'a HeapRegion, start: usize) -> FreeBlocks<'a> {
        FreeBlocks {
            region,
            kind: self.kind,
            cursor: Some(start),
            restart: self.first(region),
            stop: Some(start),
            wrapped: false,
        }
    }

    fn first(&self, region: &HeapRegion) -> Option<usize> {
        match self.kind {
            FreeListKind::Implicit => {
                (region.len() >= layout::SENTINEL_BYTES).then_some(FIRST_BLOCK)
            }
            FreeListKind::Explicit => self.head,
        }
    }
}

/// Iterator over free block payload offsets.
#[derive(Debug, Clone)]
pub struct FreeBlocks<'a> {
    region: &'a HeapRegion,
    kind: FreeListKind,
    cursor: Option<usize>,
    /// Where a cyclic scan continues after running off the end.
    restart: Option<usize>,
    /// Where a cyclic scan began; `None` for a plain pass.
    stop: Option<usize>,
    wrapped: bool,
}

impl FreeBlocks<'_> {
    fn wrap(&mut self) -> Option<usize> {
        if self.wrapped || self.stop.is_none() {
            return None;
        }
        self.wrapped = true;
        self.restart
    }

    fn reached_stop(&self, bp: usize) -> bool {
        match self.stop {
            Some(stop) if self.wrapped => match self.kind {
                // Address order: anything at or past the start was already seen.
                FreeListKind::Implicit => bp >= stop,
                FreeListKind::Explicit => bp == stop,
            },
            _ => false,
        }
    }
}

impl Iterator for FreeBlocks<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let bp = self.cursor?;
            if self.reached_stop(bp) {
                self.cursor = None;
                return None;
            }
            match self.kind {
                FreeListKind::Explicit => {
                    self.cursor = match layout::next_link(self.region, bp) {
                        Some(next) => Some(next),
                        None => self.wrap(),
                    };
                    return Some(bp);
                }
                FreeListKind::Implicit => {
                    if layout::is_epilogue(self.region, bp) {
                        self.cursor = self.wrap();
                        continue;
                    }
                    self.cursor = Some(layout::next_block(self.region, bp));
                    if !layout::is_allocated(self.region, bp) {
                        return Some(bp);
                    }
                }
            }
        }
    }
}
