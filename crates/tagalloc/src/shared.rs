//! Lock-guarded heap handle.

use std::sync::OnceLock;

use parking_lot::Mutex;
use tagalloc_core::{
    GrowthSource, HeapConfig, HeapError, HeapLogRecord, HeapState, HeapStats, Violation,
};

/// A heap shared between threads.
///
/// Operations take the lock for their whole duration, so each one observes
/// and leaves the heap in a consistent state.
#[derive(Debug, Default)]
pub struct SharedHeap {
    state: Mutex<HeapState>,
}

impl SharedHeap {
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self {
            state: Mutex::new(HeapState::new(config)),
        }
    }

    #[must_use]
    pub fn with_source(config: HeapConfig, source: Box<dyn GrowthSource>) -> Self {
        Self {
            state: Mutex::new(HeapState::with_source(config, source)),
        }
    }

    /// Heap configured from `TAGALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(HeapConfig::from_env())
    }

    pub fn init(&self) -> Result<(), HeapError> {
        self.state.lock().init()
    }

    pub fn try_allocate(&self, size: usize) -> Result<Option<usize>, HeapError> {
        self.state.lock().try_allocate(size)
    }

    pub fn allocate(&self, size: usize) -> Option<usize> {
        self.state.lock().allocate(size)
    }

    pub fn calloc(&self, count: usize, size: usize) -> Option<usize> {
        self.state.lock().calloc(count, size)
    }

    pub fn release(&self, ptr: usize) {
        self.state.lock().release(ptr);
    }

    pub fn try_resize(&self, ptr: usize, size: usize) -> Result<Option<usize>, HeapError> {
        self.state.lock().try_resize(ptr, size)
    }

    pub fn resize(&self, ptr: usize, size: usize) -> Option<usize> {
        self.state.lock().resize(ptr, size)
    }

    /// Copy `bytes` into the payload at `ptr`, truncated to the payload size.
    /// Returns the number of bytes written.
    pub fn write_payload(&self, ptr: usize, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        let payload = state.payload_mut(ptr);
        let len = payload.len().min(bytes.len());
        payload[..len].copy_from_slice(&bytes[..len]);
        len
    }

    /// Snapshot of the payload at `ptr`.
    #[must_use]
    pub fn read_payload(&self, ptr: usize) -> Vec<u8> {
        self.state.lock().payload(ptr).to_vec()
    }

    pub fn check(&self, verbose: bool) -> Vec<Violation> {
        self.state.lock().check(verbose)
    }

    pub fn validate(&self) -> Result<(), HeapError> {
        self.state.lock().validate()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.state.lock().stats()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        self.state.lock().drain_lifecycle_logs()
    }

    /// Run `f` with exclusive access to the underlying heap.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut HeapState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn into_inner(self) -> HeapState {
        self.state.into_inner()
    }
}

static GLOBAL_HEAP: OnceLock<SharedHeap> = OnceLock::new();

/// Process-wide heap, built from the environment on first use.
#[must_use]
pub fn global_heap() -> &'static SharedHeap {
    GLOBAL_HEAP.get_or_init(SharedHeap::from_env)
}
