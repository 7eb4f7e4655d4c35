//! Heap consistency checker.
//!
//! Walks the heap without trusting it: every read is bounds-checked, and the
//! walk stops at the first tag it cannot follow. All violations found on the
//! way are reported, not just the first.

use crate::config::{ALIGNMENT, FreeListKind};
use crate::error::{HeapError, Violation};
use crate::heap::allocator::HeapState;
use crate::heap::layout::{
    self, DSIZE, FIRST_BLOCK, MIN_BLOCK_SIZE, PROLOGUE, PROLOGUE_SIZE, SENTINEL_BYTES, WSIZE,
};
use crate::heap::log::HeapLogLevel;

/// What a single walk over the heap learned.
#[derive(Debug, Default)]
struct Walk {
    /// Every block start, in address order.
    starts: Vec<usize>,
    /// Free block starts, in address order.
    free: Vec<usize>,
    covered: usize,
    dumps: Vec<(usize, usize, String)>,
}

fn describe(tag: u32) -> String {
    let state = if layout::tag_allocated(tag) { 'a' } else { 'f' };
    format!("[{}:{}]", layout::tag_size(tag), state)
}

impl HeapState {
    /// Verify every heap invariant and return what is broken.
    ///
    /// An uninitialized heap is trivially consistent. With `verbose` set, one
    /// `block_dump` record per block is logged at debug level along with the
    /// free-list order.
    pub fn check(&mut self, verbose: bool) -> Vec<Violation> {
        if !self.is_initialized() {
            return Vec::new();
        }
        let mut violations = Vec::new();
        self.check_prologue(&mut violations);
        let walk = self.walk_blocks(verbose, &mut violations);
        let heap_size = self.heap_size();
        if walk.covered + SENTINEL_BYTES != heap_size {
            violations.push(Violation::TilingMismatch {
                covered: walk.covered + SENTINEL_BYTES,
                heap_size,
            });
        }
        let listed = self.check_free_list(&walk, &mut violations);
        self.check_rover(&walk, &listed, &mut violations);

        if verbose {
            for (bp, size, details) in walk.dumps {
                self.record_lifecycle(
                    HeapLogLevel::Debug,
                    "check",
                    "block_dump",
                    Some(bp),
                    Some(size),
                    "ok",
                    details,
                );
            }
            let order: Vec<String> = listed.iter().map(ToString::to_string).collect();
            self.record_lifecycle(
                HeapLogLevel::Debug,
                "check",
                "block_dump",
                None,
                Some(order.len()),
                "free_list",
                format!("order=[{}]", order.join(",")),
            );
        }
        for violation in &violations {
            self.record_lifecycle(
                HeapLogLevel::Error,
                "check",
                "check_violation",
                None,
                None,
                "violation",
                violation.to_string(),
            );
        }
        violations
    }

    /// Like [`HeapState::check`], surfacing the first violation as an error.
    pub fn validate(&mut self) -> Result<(), HeapError> {
        match self.check(false).into_iter().next() {
            Some(violation) => Err(HeapError::InvariantViolation(violation)),
            None => Ok(()),
        }
    }

    fn check_prologue(&self, violations: &mut Vec<Violation>) {
        let expected = layout::pack(PROLOGUE_SIZE, true);
        let header = self.region.try_read_word(layout::header_of(PROLOGUE));
        let footer = self.region.try_read_word(PROLOGUE);
        if header != Some(expected) || footer != Some(expected) {
            violations.push(Violation::BadPrologue {
                header: header.unwrap_or(0),
                footer: footer.unwrap_or(0),
            });
        }
    }

    fn walk_blocks(&self, verbose: bool, violations: &mut Vec<Violation>) -> Walk {
        let heap_size = self.region.len();
        let mut walk = Walk::default();
        let mut prev_free: Option<usize> = None;
        let mut bp = FIRST_BLOCK;
        loop {
            let Some(header) = self.region.try_read_word(layout::header_of(bp)) else {
                break;
            };
            let size = layout::tag_size(header);
            if header & 0x6 != 0 {
                violations.push(Violation::BadSize {
                    bp,
                    size: (header & !0x1) as usize,
                });
                break;
            }
            if size == 0 {
                if !layout::tag_allocated(header) || bp != heap_size {
                    violations.push(Violation::BadEpilogue {
                        offset: layout::header_of(bp),
                        header,
                    });
                }
                break;
            }
            if size < MIN_BLOCK_SIZE {
                violations.push(Violation::BadSize { bp, size });
                break;
            }
            if bp.checked_add(size).is_none_or(|end| end > heap_size) {
                violations.push(Violation::OutOfBounds {
                    bp,
                    size,
                    heap_size,
                });
                break;
            }
            let footer = self.region.read_word(bp + size - DSIZE);
            if footer != header {
                violations.push(Violation::TagMismatch { bp, header, footer });
            }
            if layout::tag_allocated(header) {
                prev_free = None;
            } else {
                if let Some(prev) = prev_free {
                    violations.push(Violation::AdjacentFree { bp: prev, next: bp });
                }
                prev_free = Some(bp);
                walk.free.push(bp);
            }
            if verbose {
                walk.dumps.push((
                    bp,
                    size,
                    format!("header={} footer={}", describe(header), describe(footer)),
                ));
            }
            walk.starts.push(bp);
            walk.covered += size;
            bp += size;
        }
        walk
    }

    /// Walk the explicit list and return its entries in list order.
    fn check_free_list(&self, walk: &Walk, violations: &mut Vec<Violation>) -> Vec<usize> {
        if self.free.kind() == FreeListKind::Implicit {
            return walk.free.clone();
        }
        let mut listed = Vec::new();
        let mut expected_prev = None;
        let mut cursor = self.free.head();
        let limit = walk.starts.len() + 1;
        while let Some(bp) = cursor {
            if listed.len() >= limit {
                violations.push(Violation::ListCycle {
                    steps: listed.len(),
                });
                break;
            }
            if bp % ALIGNMENT != 0 {
                violations.push(Violation::Misaligned { bp });
                break;
            }
            if walk.free.binary_search(&bp).is_err() {
                violations.push(Violation::TrackedNotFree { bp });
                // Links of something that is not a known free block cannot be followed.
                if walk.starts.binary_search(&bp).is_err() {
                    break;
                }
            }
            let found = self
                .region
                .try_read_word(bp + WSIZE)
                .and_then(|word| (word != 0).then_some(word as usize));
            if found != expected_prev {
                violations.push(Violation::BrokenLink {
                    bp,
                    expected: expected_prev,
                    found,
                });
            }
            listed.push(bp);
            expected_prev = Some(bp);
            cursor = layout::next_link(&self.region, bp);
        }
        let mut sorted = listed.clone();
        sorted.sort_unstable();
        for &bp in &walk.free {
            if sorted.binary_search(&bp).is_err() {
                violations.push(Violation::Untracked { bp });
            }
        }
        listed
    }

    fn check_rover(&self, walk: &Walk, listed: &[usize], violations: &mut Vec<Violation>) {
        let Some(rover) = self.rover else {
            return;
        };
        let valid = match self.free.kind() {
            FreeListKind::Implicit => walk.starts.binary_search(&rover).is_ok(),
            FreeListKind::Explicit => listed.contains(&rover),
        };
        if !valid {
            violations.push(Violation::DanglingRover { rover });
        }
    }
}
