//! Block layout: boundary-tag encode/decode over heap offsets.
//!
//! Every block is addressed by its payload offset `bp`:
//!
//! ```text
//!        bp - 4      bp                                 bp + size - 8
//!   ┌────────────┬────────────────────────────────────┬────────────┐
//!   │ header tag │ payload (free: next link|prev link)│ footer tag │
//!   └────────────┴────────────────────────────────────┴────────────┘
//!   tag = size | allocated            size counts header through footer
//! ```
//!
//! This module is the only place allowed to do address arithmetic; the rest
//! of the heap works on payload offsets as opaque block handles.

use serde::Serialize;

use crate::config::ALIGNMENT;
use crate::heap::region::{HeapRegion, MAX_REGION_BYTES};

/// Word size of a boundary tag or free-list link.
pub const WSIZE: usize = 4;
/// Double word: header + footer overhead of every block.
pub const DSIZE: usize = 8;
/// Bytes of metadata carried by an allocated block.
pub const OVERHEAD: usize = DSIZE;
/// Tags plus both free-list links, rounded to the alignment unit.
pub const MIN_BLOCK_SIZE: usize = 16;

/// The null payload offset.
pub const NULL: usize = 0;

/// Payload offset of the prologue sentinel.
pub const PROLOGUE: usize = DSIZE;
/// Total size of the prologue sentinel (header + footer, no payload).
pub const PROLOGUE_SIZE: usize = DSIZE;
/// Payload offset of the first real block.
pub const FIRST_BLOCK: usize = PROLOGUE + PROLOGUE_SIZE;
/// Padding word, prologue and epilogue header: the size of an empty heap.
pub const SENTINEL_BYTES: usize = WSIZE + PROLOGUE_SIZE + WSIZE;

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

#[must_use]
pub const fn pack(size: usize, allocated: bool) -> u32 {
    (size as u32) | (allocated as u32)
}

#[must_use]
pub const fn tag_size(tag: u32) -> usize {
    (tag & SIZE_MASK) as usize
}

#[must_use]
pub const fn tag_allocated(tag: u32) -> bool {
    tag & ALLOC_BIT != 0
}

/// Round `value` up to the alignment unit.
#[must_use]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Block size needed to serve a `requested`-byte payload.
///
/// Adds header/footer overhead, rounds to the alignment unit and clamps to
/// [`MIN_BLOCK_SIZE`] so the block can hold free-list links once released.
#[must_use]
pub fn adjusted_size(requested: usize) -> Option<usize> {
    let size = align_up(requested.checked_add(OVERHEAD)?)?.max(MIN_BLOCK_SIZE);
    (size <= MAX_REGION_BYTES).then_some(size)
}

pub fn write_tag(region: &mut HeapRegion, addr: usize, size: usize, allocated: bool) {
    debug_assert!(size % ALIGNMENT == 0, "unaligned block size {size}");
    debug_assert!(size <= MAX_REGION_BYTES, "block size {size} overflows tag");
    region.write_word(addr, pack(size, allocated));
}

#[must_use]
pub fn read_size(region: &HeapRegion, addr: usize) -> usize {
    tag_size(region.read_word(addr))
}

#[must_use]
pub fn read_allocated(region: &HeapRegion, addr: usize) -> bool {
    tag_allocated(region.read_word(addr))
}

#[must_use]
pub const fn header_of(bp: usize) -> usize {
    bp - WSIZE
}

#[must_use]
pub fn footer_of(region: &HeapRegion, bp: usize) -> usize {
    bp + block_size(region, bp) - DSIZE
}

#[must_use]
pub fn block_size(region: &HeapRegion, bp: usize) -> usize {
    read_size(region, header_of(bp))
}

#[must_use]
pub fn is_allocated(region: &HeapRegion, bp: usize) -> bool {
    read_allocated(region, header_of(bp))
}

/// Usable bytes of the block at `bp`.
#[must_use]
pub fn payload_size(region: &HeapRegion, bp: usize) -> usize {
    block_size(region, bp).saturating_sub(OVERHEAD)
}

/// Payload offset of the physically following block.
#[must_use]
pub fn next_block(region: &HeapRegion, bp: usize) -> usize {
    bp + block_size(region, bp)
}

/// Payload offset of the physically preceding block, found through its footer.
#[must_use]
pub fn prev_block(region: &HeapRegion, bp: usize) -> usize {
    bp - read_size(region, bp - DSIZE)
}

/// Allocated bit of the preceding block, read from its footer.
#[must_use]
pub fn prev_allocated(region: &HeapRegion, bp: usize) -> bool {
    read_allocated(region, bp - DSIZE)
}

/// Write matching header and footer tags for a block of `size` bytes.
pub fn write_block(region: &mut HeapRegion, bp: usize, size: usize, allocated: bool) {
    write_tag(region, header_of(bp), size, allocated);
    write_tag(region, bp + size - DSIZE, size, allocated);
}

/// Lay down the padding word, the prologue and an epilogue at [`FIRST_BLOCK`].
pub fn write_sentinels(region: &mut HeapRegion) {
    region.write_word(0, 0);
    write_block(region, PROLOGUE, PROLOGUE_SIZE, true);
    write_epilogue(region, FIRST_BLOCK);
}

/// Write the zero-size allocated epilogue header for the block slot at `bp`.
pub fn write_epilogue(region: &mut HeapRegion, bp: usize) {
    write_tag(region, header_of(bp), 0, true);
}

#[must_use]
pub fn is_epilogue(region: &HeapRegion, bp: usize) -> bool {
    block_size(region, bp) == 0
}

#[must_use]
pub fn next_link(region: &HeapRegion, bp: usize) -> Option<usize> {
    decode_link(region.read_word(bp))
}

#[must_use]
pub fn prev_link(region: &HeapRegion, bp: usize) -> Option<usize> {
    decode_link(region.read_word(bp + WSIZE))
}

pub fn set_next_link(region: &mut HeapRegion, bp: usize, link: Option<usize>) {
    region.write_word(bp, encode_link(link));
}

pub fn set_prev_link(region: &mut HeapRegion, bp: usize, link: Option<usize>) {
    region.write_word(bp + WSIZE, encode_link(link));
}

// Offset 0 is padding, so it doubles as the end-of-list marker.
fn encode_link(link: Option<usize>) -> u32 {
    link.map_or(0, |bp| bp as u32)
}

fn decode_link(word: u32) -> Option<usize> {
    (word != 0).then_some(word as usize)
}

/// Snapshot of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockView {
    /// Payload offset.
    pub offset: usize,
    /// Total block size including tags.
    pub size: usize,
    pub allocated: bool,
}

impl BlockView {
    #[must_use]
    pub fn payload_size(self) -> usize {
        self.size.saturating_sub(OVERHEAD)
    }

    /// Payload offset of the following block.
    #[must_use]
    pub fn end(self) -> usize {
        self.offset + self.size
    }
}

/// Address-ordered walk over every block between the sentinels.
///
/// Stops early instead of panicking if a tag points outside the region.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    region: &'a HeapRegion,
    cursor: Option<usize>,
}

impl<'a> Blocks<'a> {
    #[must_use]
    pub fn new(region: &'a HeapRegion) -> Self {
        let cursor = (region.len() >= SENTINEL_BYTES).then_some(FIRST_BLOCK);
        Self { region, cursor }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockView;

    fn next(&mut self) -> Option<BlockView> {
        let bp = self.cursor.take()?;
        let tag = self.region.try_read_word(header_of(bp))?;
        let size = tag_size(tag);
        if size == 0 {
            return None;
        }
        let end = bp.checked_add(size).filter(|&end| end <= self.region.len())?;
        self.cursor = Some(end);
        Some(BlockView {
            offset: bp,
            size,
            allocated: tag_allocated(tag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_heap() -> HeapRegion {
        let mut region = HeapRegion::with_limit(1 << 16);
        region.grow(SENTINEL_BYTES).expect("grow");
        write_sentinels(&mut region);
        region
    }

    #[test]
    fn pack_and_unpack_tags() {
        let tag = pack(48, true);
        assert_eq!(tag, 49);
        assert_eq!(tag_size(tag), 48);
        assert!(tag_allocated(tag));
        assert!(!tag_allocated(pack(48, false)));
    }

    #[test]
    fn adjusted_sizes_include_overhead_and_minimum() {
        assert_eq!(adjusted_size(1), Some(16));
        assert_eq!(adjusted_size(8), Some(16));
        assert_eq!(adjusted_size(9), Some(24));
        assert_eq!(adjusted_size(30), Some(40));
        assert_eq!(adjusted_size(100), Some(112));
        assert_eq!(adjusted_size(usize::MAX), None);
        assert_eq!(adjusted_size(MAX_REGION_BYTES), None);
    }

    #[test]
    fn sentinels_bracket_an_empty_heap() {
        let region = empty_heap();
        assert_eq!(block_size(&region, PROLOGUE), PROLOGUE_SIZE);
        assert!(is_allocated(&region, PROLOGUE));
        assert_eq!(footer_of(&region, PROLOGUE), 8);
        assert_eq!(next_block(&region, PROLOGUE), FIRST_BLOCK);
        assert!(is_epilogue(&region, FIRST_BLOCK));
        assert!(is_allocated(&region, FIRST_BLOCK));
        assert!(prev_allocated(&region, FIRST_BLOCK));
        assert_eq!(Blocks::new(&region).count(), 0);
    }

    #[test]
    fn neighbors_follow_sizes_and_footers() {
        let mut region = empty_heap();
        let bp = region.grow(64).expect("grow");
        assert_eq!(bp, FIRST_BLOCK);
        write_block(&mut region, bp, 24, true);
        let second = next_block(&region, bp);
        write_block(&mut region, second, 40, false);
        let end = next_block(&region, second);
        write_epilogue(&mut region, end);

        assert_eq!(second, bp + 24);
        assert_eq!(prev_block(&region, second), bp);
        assert!(prev_allocated(&region, second));
        assert!(!is_allocated(&region, second));
        assert_eq!(payload_size(&region, bp), 16);
        assert_eq!(
            region.read_word(header_of(second)),
            region.read_word(footer_of(&region, second))
        );

        let blocks: Vec<BlockView> = Blocks::new(&region).collect();
        assert_eq!(
            blocks,
            vec![
                BlockView {
                    offset: 16,
                    size: 24,
                    allocated: true
                },
                BlockView {
                    offset: 40,
                    size: 40,
                    allocated: false
                },
            ]
        );
        assert_eq!(blocks[1].end(), region.len());
    }

    #[test]
    fn links_encode_none_as_zero() {
        let mut region = empty_heap();
        let bp = region.grow(32).expect("grow");
        set_next_link(&mut region, bp, Some(200));
        set_prev_link(&mut region, bp, None);
        assert_eq!(next_link(&region, bp), Some(200));
        assert_eq!(prev_link(&region, bp), None);
        assert_eq!(region.read_word(bp + WSIZE), 0);
    }

    #[test]
    fn blocks_walk_stops_on_corrupt_size() {
        let mut region = empty_heap();
        let bp = region.grow(32).expect("grow");
        write_tag(&mut region, header_of(bp), 4096, false);
        assert_eq!(Blocks::new(&region).count(), 0);
    }
}
