//! Heap configuration.
//!
//! A configuration can be built in code or resolved from the environment:
//! - `TAGALLOC_POLICY`: `first-fit` (default), `next-fit`, `best-fit`.
//! - `TAGALLOC_FREE_LIST`: `explicit` (default) or `implicit`.
//! - `TAGALLOC_CHUNK_SIZE`: heap growth amortization in bytes (default 4096).
//! - `TAGALLOC_MAX_HEAP`: ceiling enforced by the default growth source.
//! - `TAGALLOC_MODE`: `strict` (default) or `hardened`.
//! - `TAGALLOC_LOG`: minimum lifecycle log level, or `off`.
//!
//! Unknown or malformed values fall back to the defaults.

use serde::{Deserialize, Serialize};

use crate::heap::HeapLogLevel;
use crate::heap::layout::{MIN_BLOCK_SIZE, align_up};

/// Payload alignment unit. Fixed; every block size is a multiple of it.
pub const ALIGNMENT: usize = 8;

/// Default amount the heap grows by when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Default heap ceiling (20 MiB).
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Strategy used to choose which free block satisfies a request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    /// First free block that is large enough, scanning from the start.
    #[default]
    FirstFit,
    /// Like first-fit, but resumes where the previous search stopped.
    NextFit,
    /// Free block leaving the smallest leftover.
    BestFit,
}

impl PlacementPolicy {
    pub const ALL: [PlacementPolicy; 3] = [Self::FirstFit, Self::NextFit, Self::BestFit];

    /// Parse from string (case-insensitive). Unknown input yields first-fit.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" | "next-fit" | "next_fit" | "nextfit" => Self::NextFit,
            "best" | "best-fit" | "best_fit" | "bestfit" => Self::BestFit,
            _ => Self::FirstFit,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstFit => "first-fit",
            Self::NextFit => "next-fit",
            Self::BestFit => "best-fit",
        }
    }
}

/// How free blocks are tracked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreeListKind {
    /// No extra state; searches walk every block in the heap.
    Implicit,
    /// Intrusive doubly-linked list threaded through free blocks.
    #[default]
    Explicit,
}

impl FreeListKind {
    pub const ALL: [FreeListKind; 2] = [Self::Implicit, Self::Explicit];

    /// Parse from string (case-insensitive). Unknown input yields explicit.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "scan" | "none" => Self::Implicit,
            _ => Self::Explicit,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }
}

/// Pointer validation applied by `release`/`resize`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// Pointers are trusted. Freeing a block twice or passing a foreign
    /// offset is a precondition violation and may corrupt heap metadata.
    #[default]
    Strict,
    /// Pointers are checked against their boundary tags first; invalid and
    /// double frees are ignored and logged.
    Hardened,
}

impl ValidationMode {
    /// Parse from string (case-insensitive). Unknown input yields strict.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "checked" | "safe" => Self::Hardened,
            _ => Self::Strict,
        }
    }
}

/// Full allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    pub policy: PlacementPolicy,
    pub free_list: FreeListKind,
    /// Minimum number of bytes requested from the growth source per miss.
    pub chunk_size: usize,
    /// Ceiling applied by [`crate::heap::HeapLimit`] when no custom source is given.
    pub max_heap: usize,
    pub mode: ValidationMode,
    /// Minimum lifecycle log level, `None` disables recording.
    pub log_level: Option<HeapLogLevel>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            policy: PlacementPolicy::default(),
            free_list: FreeListKind::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap: DEFAULT_MAX_HEAP,
            mode: ValidationMode::default(),
            log_level: Some(HeapLogLevel::Info),
        }
    }
}

impl HeapConfig {
    /// Resolve from `TAGALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup("TAGALLOC_POLICY") {
            config.policy = PlacementPolicy::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("TAGALLOC_FREE_LIST") {
            config.free_list = FreeListKind::from_str_loose(&raw);
        }
        if let Some(size) = lookup("TAGALLOC_CHUNK_SIZE").and_then(|raw| parse_bytes(&raw)) {
            config.chunk_size = size;
        }
        if let Some(size) = lookup("TAGALLOC_MAX_HEAP").and_then(|raw| parse_bytes(&raw)) {
            config.max_heap = size;
        }
        if let Some(raw) = lookup("TAGALLOC_MODE") {
            config.mode = ValidationMode::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("TAGALLOC_LOG") {
            config.log_level = HeapLogLevel::from_str_loose(&raw);
        }
        config.normalized()
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PlacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_free_list(mut self, free_list: FreeListKind) -> Self {
        self.free_list = free_list;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    #[must_use]
    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: Option<HeapLogLevel>) -> Self {
        self.log_level = log_level;
        self
    }

    /// Round `chunk_size` up to the alignment unit and the minimum block size.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.chunk_size = align_up(self.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE)
            .max(MIN_BLOCK_SIZE);
        self
    }
}

/// Accepts plain byte counts plus `k`/`m` suffixes (`4096`, `64k`, `20M`).
fn parse_bytes(raw: &str) -> Option<usize> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, scale) = match raw.strip_suffix('k') {
        Some(rest) => (rest, 1 << 10),
        None => match raw.strip_suffix('m') {
            Some(rest) => (rest, 1 << 20),
            None => (raw.as_str(), 1),
        },
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(scale)
}
