//! Allocator error types.

use thiserror::Error;

/// Errors surfaced by heap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The growth primitive refused to extend the heap, or the request cannot
    /// be represented in a 32-bit boundary tag.
    #[error("out of memory: cannot grow heap of {heap_size} bytes by {requested} bytes")]
    OutOfMemory { requested: usize, heap_size: usize },
    /// Reported by the consistency checker only.
    #[error("heap invariant violated: {0}")]
    InvariantViolation(Violation),
}

/// A single broken heap invariant found by the consistency checker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("bad prologue block (header {header:#x}, footer {footer:#x})")]
    BadPrologue { header: u32, footer: u32 },
    #[error("bad epilogue header {header:#x} at {offset}")]
    BadEpilogue { offset: usize, header: u32 },
    #[error("block offset {bp} is not 8-byte aligned")]
    Misaligned { bp: usize },
    #[error("block {bp}: size {size} has stray low bits or is below the minimum block size")]
    BadSize { bp: usize, size: usize },
    #[error("block {bp}: size {size} runs past the heap end at {heap_size}")]
    OutOfBounds {
        bp: usize,
        size: usize,
        heap_size: usize,
    },
    #[error("block {bp}: header {header:#x} does not match footer {footer:#x}")]
    TagMismatch { bp: usize, header: u32, footer: u32 },
    #[error("blocks {bp} and {next} are physically adjacent and both free")]
    AdjacentFree { bp: usize, next: usize },
    #[error("free block {bp} is not reachable from the free list")]
    Untracked { bp: usize },
    #[error("free list entry {bp} is not a free block")]
    TrackedNotFree { bp: usize },
    #[error("free list entry {bp} has back-link {found:?}, expected {expected:?}")]
    BrokenLink {
        bp: usize,
        expected: Option<usize>,
        found: Option<usize>,
    },
    #[error("free list does not terminate within {steps} entries")]
    ListCycle { steps: usize },
    #[error("blocks cover {covered} bytes but the heap spans {heap_size}")]
    TilingMismatch { covered: usize, heap_size: usize },
    #[error("next-fit rover {rover} does not point at a valid block")]
    DanglingRover { rover: usize },
}
