use std::sync::Arc;
use std::thread;

use tagalloc::{FreeListKind, HeapConfig, HeapLogLevel, PlacementPolicy, SharedHeap};

#[test]
fn concurrent_threads_keep_heap_consistent() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 300;

    for kind in FreeListKind::ALL {
        let heap = Arc::new(SharedHeap::new(
            HeapConfig::default()
                .with_policy(PlacementPolicy::NextFit)
                .with_free_list(kind)
                .with_log_level(None),
        ));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let heap = Arc::clone(&heap);
                thread::spawn(move || {
                    let tag = t as u8 + 1;
                    let mut mine = Vec::new();
                    for round in 0..ROUNDS {
                        let len = 1 + (round * 37 + t * 11) % 300;
                        let ptr = heap.allocate(len).expect("allocate");
                        heap.write_payload(ptr, &vec![tag; len]);
                        mine.push((ptr, len));
                        if round % 3 == 2 {
                            let (old, old_len) = mine.remove(0);
                            let data = heap.read_payload(old);
                            assert!(data[..old_len].iter().all(|&b| b == tag));
                            heap.release(old);
                        }
                        if round % 7 == 0 {
                            if let Some(&(ptr, len)) = mine.last() {
                                let grown = heap.resize(ptr, len * 2).expect("resize");
                                let data = heap.read_payload(grown);
                                assert!(data[..len].iter().all(|&b| b == tag));
                                heap.write_payload(grown, &vec![tag; len * 2]);
                                *mine.last_mut().expect("last") = (grown, len * 2);
                            }
                        }
                    }
                    mine
                })
            })
            .collect();

        let mut survivors = Vec::new();
        for (t, handle) in handles.into_iter().enumerate() {
            let tag = t as u8 + 1;
            for (ptr, len) in handle.join().expect("thread") {
                survivors.push((ptr, len, tag));
            }
        }

        assert!(heap.check(false).is_empty(), "{kind:?}");
        for &(ptr, len, tag) in &survivors {
            assert!(heap.read_payload(ptr)[..len].iter().all(|&b| b == tag));
        }
        assert_eq!(heap.stats().live_blocks, survivors.len());
        for (ptr, _, _) in survivors {
            heap.release(ptr);
        }
        assert_eq!(heap.stats().live_blocks, 0);
        assert_eq!(heap.validate(), Ok(()));
    }
}

#[test]
fn with_state_allows_compound_operations() {
    let heap = SharedHeap::new(HeapConfig::default().with_log_level(Some(HeapLogLevel::Trace)));
    let (a, b) = heap.with_state(|state| {
        let a = state.allocate(40).expect("a");
        let b = state.calloc(4, 10).expect("b");
        (a, b)
    });
    assert_ne!(a, b);
    assert!(heap.read_payload(b).iter().all(|&byte| byte == 0));

    let logs = heap.drain_lifecycle_logs();
    let lines: Vec<String> = logs
        .iter()
        .map(|record| serde_json::to_string(record).expect("json"))
        .collect();
    assert!(lines.iter().any(|line| line.contains("\"event\":\"alloc\"")));
    assert!(heap.drain_lifecycle_logs().is_empty());

    let state = Arc::new(heap);
    let state = Arc::try_unwrap(state).expect("sole owner").into_inner();
    assert_eq!(state.stats().live_blocks, 2);
}
