#![no_main]
use libfuzzer_sys::fuzz_target;
use tagalloc_core::{FreeListKind, HeapConfig, HeapState, PlacementPolicy, ValidationMode};

fuzz_target!(|data: &[u8]| {
    // Header byte picks the configuration, then 4-byte op records follow.
    let Some((&header, ops)) = data.split_first() else {
        return;
    };
    let policy = PlacementPolicy::ALL[usize::from(header % 3)];
    let kind = FreeListKind::ALL[usize::from((header >> 2) % 2)];
    let mode = if header & 0x80 != 0 {
        ValidationMode::Hardened
    } else {
        ValidationMode::Strict
    };
    let mut heap = HeapState::new(
        HeapConfig::default()
            .with_policy(policy)
            .with_free_list(kind)
            .with_mode(mode)
            .with_max_heap(1 << 20)
            .with_log_level(None),
    );
    let mut live: Vec<(usize, usize, u8)> = Vec::new();

    for chunk in ops.chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let fill = chunk[3];
        match chunk[0] % 4 {
            0 => {
                if let Some(ptr) = heap.allocate(size) {
                    heap.payload_mut(ptr)[..size].fill(fill);
                    live.push((ptr, size, fill));
                }
            }
            1 => {
                if !live.is_empty() {
                    let (ptr, len, byte) = live.swap_remove(size % live.len());
                    assert!(heap.payload(ptr)[..len].iter().all(|&b| b == byte));
                    heap.release(ptr);
                }
            }
            2 => {
                if !live.is_empty() {
                    let idx = size % live.len();
                    let (ptr, len, byte) = live[idx];
                    match heap.resize(ptr, size) {
                        Some(moved) => {
                            let kept = len.min(size);
                            assert!(heap.payload(moved)[..kept].iter().all(|&b| b == byte));
                            heap.payload_mut(moved)[..size].fill(fill);
                            live[idx] = (moved, size, fill);
                        }
                        // size 0 released the block
                        None if size == 0 => {
                            live.swap_remove(idx);
                        }
                        None => {}
                    }
                }
            }
            _ => {
                if mode == ValidationMode::Hardened {
                    // Offsets past the break or off the alignment grid are
                    // never live and must be ignored without damage.
                    heap.release(heap.heap_size() + size * 8);
                    if let Some(&(ptr, _, _)) = live.get(size % live.len().max(1)) {
                        heap.release(ptr + 4);
                    }
                    assert_eq!(heap.stats().live_blocks, live.len());
                }
            }
        }
        assert!(heap.check(false).is_empty());
    }

    for (ptr, _, _) in live {
        heap.release(ptr);
    }
    assert_eq!(heap.stats().live_blocks, 0);
    assert!(heap.check(false).is_empty());
});
