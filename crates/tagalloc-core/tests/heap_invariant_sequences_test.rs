use tagalloc_core::{BlockView, FreeListKind, HeapConfig, HeapState, PlacementPolicy};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    ptr: usize,
    len: usize,
    seed: u8,
}

fn fill(state: &mut HeapState, slot: Slot) {
    for (i, byte) in state.payload_mut(slot.ptr)[..slot.len]
        .iter_mut()
        .enumerate()
    {
        *byte = slot.seed.wrapping_add((i % 251) as u8);
    }
}

fn intact(state: &HeapState, slot: Slot) -> bool {
    state.payload(slot.ptr)[..slot.len]
        .iter()
        .enumerate()
        .all(|(i, &byte)| byte == slot.seed.wrapping_add((i % 251) as u8))
}

fn assert_layout(state: &HeapState, live: &[Option<Slot>], ctx: &str) {
    let blocks: Vec<BlockView> = state.blocks().collect();
    let covered: usize = blocks.iter().map(|block| block.size).sum();
    assert_eq!(covered + 16, state.heap_size(), "{ctx}: tiling");
    assert!(
        blocks
            .windows(2)
            .all(|pair| pair[0].allocated || pair[1].allocated),
        "{ctx}: adjacent free blocks"
    );

    let mut spans: Vec<(usize, usize)> = live
        .iter()
        .flatten()
        .map(|slot| (slot.ptr, slot.ptr + state.payload_size(slot.ptr)))
        .collect();
    spans.sort_unstable();
    assert!(
        spans.windows(2).all(|pair| pair[0].1 <= pair[1].0),
        "{ctx}: overlapping live payloads"
    );
    for slot in live.iter().flatten() {
        assert_eq!(slot.ptr % 8, 0, "{ctx}: misaligned payload");
        assert!(state.is_live_payload(slot.ptr), "{ctx}: slot not live");
    }
}

#[test]
fn deterministic_heap_sequences_hold_invariants() {
    // Bounded invariant pressure; the fuzz target covers the long tail.
    const SEEDS: [u64; 3] = [0x9E37_79B9, 7, 0xDEAD_BEEF];
    const STEPS: usize = 1_200;
    const SLOTS: usize = 24;

    for policy in PlacementPolicy::ALL {
        for kind in FreeListKind::ALL {
            for seed in SEEDS {
                let mut state = HeapState::new(
                    HeapConfig::default()
                        .with_policy(policy)
                        .with_free_list(kind)
                        .with_log_level(None),
                );
                let mut rng = XorShift64::new(seed);
                let mut live: [Option<Slot>; SLOTS] = [None; SLOTS];
                let mut next_seed: u8 = 1;

                for step in 0..STEPS {
                    let ctx = format!("{policy:?}/{kind:?} seed={seed} step={step}");
                    let op = rng.gen_range_usize(0, 99);
                    let idx = rng.gen_range_usize(0, SLOTS - 1);
                    // Mostly small requests with an occasional multi-chunk one.
                    let size = if rng.gen_range_usize(0, 19) == 0 {
                        rng.gen_range_usize(4_096, 12_000)
                    } else {
                        rng.gen_range_usize(1, 512)
                    };

                    match (op, live[idx]) {
                        (0..=44, None) => {
                            let ptr = state.allocate(size).expect("allocate");
                            let slot = Slot {
                                ptr,
                                len: size,
                                seed: next_seed,
                            };
                            next_seed = next_seed.wrapping_add(1);
                            fill(&mut state, slot);
                            live[idx] = Some(slot);
                        }
                        (0..=74, Some(slot)) => {
                            assert!(intact(&state, slot), "{ctx}: payload clobbered");
                            state.release(slot.ptr);
                            live[idx] = None;
                        }
                        (75..=99, Some(slot)) => {
                            let moved = state.resize(slot.ptr, size).expect("resize");
                            let kept = Slot {
                                ptr: moved,
                                len: slot.len.min(size),
                                seed: slot.seed,
                            };
                            assert!(intact(&state, kept), "{ctx}: resize lost content");
                            let grown = Slot { len: size, ..kept };
                            fill(&mut state, grown);
                            live[idx] = Some(grown);
                        }
                        _ => continue,
                    }

                    let violations = state.check(false);
                    assert!(violations.is_empty(), "{ctx}: {violations:?}");
                    assert_layout(&state, &live, &ctx);
                }

                for slot in live.iter().flatten() {
                    assert!(intact(&state, *slot));
                    state.release(slot.ptr);
                }
                let stats = state.stats();
                assert_eq!(stats.live_blocks, 0);
                assert_eq!(stats.live_payload_bytes, 0);
                assert_eq!(stats.free_blocks, 1, "{policy:?}/{kind:?} seed={seed}");
                assert!(state.check(false).is_empty());
            }
        }
    }
}

#[test]
fn interleaved_heaps_stay_isolated() {
    let mut rng = XorShift64::new(42);
    let mut heaps: Vec<HeapState> = PlacementPolicy::ALL
        .into_iter()
        .map(|policy| HeapState::new(HeapConfig::default().with_policy(policy)))
        .collect();
    let mut owned: Vec<Vec<Slot>> = vec![Vec::new(); heaps.len()];

    for step in 0..600 {
        let which = rng.gen_range_usize(0, heaps.len() - 1);
        let state = &mut heaps[which];
        if owned[which].len() < 16 && rng.gen_range_usize(0, 2) != 0 {
            let len = rng.gen_range_usize(1, 300);
            let ptr = state.allocate(len).expect("allocate");
            let slot = Slot {
                ptr,
                len,
                seed: (step % 256) as u8,
            };
            fill(state, slot);
            owned[which].push(slot);
        } else if !owned[which].is_empty() {
            let pick = rng.gen_range_usize(0, owned[which].len() - 1);
            let slot = owned[which].swap_remove(pick);
            assert!(intact(state, slot));
            state.release(slot.ptr);
        }
    }

    for (state, slots) in heaps.iter_mut().zip(&owned) {
        for slot in slots {
            assert!(intact(state, *slot));
        }
        assert!(state.check(false).is_empty());
    }
}
