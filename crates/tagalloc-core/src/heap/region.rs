//! Raw heap region.
//!
//! Owns the single growable byte buffer. [`HeapRegion::grow`] is the only path
//! that consults the external growth primitive ([`GrowthSource`]); the region
//! never shrinks except through [`HeapRegion::reset`].

use std::fmt;

use crate::error::HeapError;
use crate::heap::layout::WSIZE;

/// Largest heap size whose offsets and block sizes fit in a 32-bit tag.
pub const MAX_REGION_BYTES: usize = u32::MAX as usize & !(crate::config::ALIGNMENT - 1);

/// The growth primitive consumed by the heap (an `sbrk` analogue).
///
/// Called before the break moves from `current` to `current + increment`.
/// Returning an error leaves the region untouched.
pub trait GrowthSource: Send {
    fn request_more_memory(&mut self, current: usize, increment: usize) -> Result<(), HeapError>;
}

/// Growth source that grants memory up to a fixed ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLimit {
    max_bytes: usize,
}

impl HeapLimit {
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    #[must_use]
    pub const fn max_bytes(self) -> usize {
        self.max_bytes
    }
}

impl GrowthSource for HeapLimit {
    fn request_more_memory(&mut self, current: usize, increment: usize) -> Result<(), HeapError> {
        match current.checked_add(increment) {
            Some(end) if end <= self.max_bytes => Ok(()),
            _ => Err(HeapError::OutOfMemory {
                requested: increment,
                heap_size: current,
            }),
        }
    }
}

/// A single contiguous, monotonically growable byte buffer.
pub struct HeapRegion {
    bytes: Vec<u8>,
    source: Box<dyn GrowthSource>,
    grow_calls: u64,
}

impl HeapRegion {
    #[must_use]
    pub fn new(source: Box<dyn GrowthSource>) -> Self {
        Self {
            bytes: Vec::new(),
            source,
            grow_calls: 0,
        }
    }

    /// Region backed by a [`HeapLimit`] ceiling.
    #[must_use]
    pub fn with_limit(max_bytes: usize) -> Self {
        Self::new(Box::new(HeapLimit::new(max_bytes)))
    }

    /// Drop all contents so the region can be re-initialized.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.grow_calls = 0;
    }

    /// Extend the region by `increment` bytes.
    ///
    /// Returns the offset of the first new byte, which is always the previous
    /// end of the region.
    pub fn grow(&mut self, increment: usize) -> Result<usize, HeapError> {
        let brk = self.bytes.len();
        let refused = HeapError::OutOfMemory {
            requested: increment,
            heap_size: brk,
        };
        let Some(end) = brk
            .checked_add(increment)
            .filter(|&end| end <= MAX_REGION_BYTES)
        else {
            return Err(refused);
        };
        self.source.request_more_memory(brk, increment)?;
        self.bytes.resize(end, 0);
        self.grow_calls += 1;
        Ok(brk)
    }

    /// Current size of the region (the break).
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of successful `grow` calls since the last reset.
    #[must_use]
    pub fn grow_calls(&self) -> u64 {
        self.grow_calls
    }

    /// Read a 32-bit little-endian word. Panics if out of range.
    #[must_use]
    pub fn read_word(&self, at: usize) -> u32 {
        let mut word = [0_u8; WSIZE];
        word.copy_from_slice(&self.bytes[at..at + WSIZE]);
        u32::from_le_bytes(word)
    }

    /// Read a word, or `None` if it lies outside the region.
    #[must_use]
    pub fn try_read_word(&self, at: usize) -> Option<u32> {
        let end = at.checked_add(WSIZE)?;
        let slice = self.bytes.get(at..end)?;
        let mut word = [0_u8; WSIZE];
        word.copy_from_slice(slice);
        Some(u32::from_le_bytes(word))
    }

    pub fn write_word(&mut self, at: usize, value: u32) {
        self.bytes[at..at + WSIZE].copy_from_slice(&value.to_le_bytes());
    }

    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> &[u8] {
        &self.bytes[start..start + len]
    }

    pub fn slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[start..start + len]
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dst);
    }

    pub fn fill(&mut self, start: usize, len: usize, value: u8) {
        self.bytes[start..start + len].fill(value);
    }
}

impl fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapRegion")
            .field("len", &self.bytes.len())
            .field("grow_calls", &self.grow_calls)
            .finish_non_exhaustive()
    }
}
