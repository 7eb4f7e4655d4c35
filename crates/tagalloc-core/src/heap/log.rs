//! Structured heap lifecycle records.

use serde::{Deserialize, Serialize};

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    /// Parse a minimum level (case-insensitive). `off`/`none` disable logging;
    /// unknown input yields `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" => None,
            "trace" | "all" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => Some(Self::Info),
        }
    }
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// API symbol (`init`, `malloc`, `free`, `realloc`, `calloc`, `check`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `coalesce`, `extend_heap`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: heap size in bytes.
    pub heap_size: usize,
    /// Snapshot: allocated block count.
    pub live_blocks: usize,
    /// Snapshot: payload bytes held by allocated blocks.
    pub live_payload_bytes: usize,
}

/// Render records as JSON lines.
pub fn to_jsonl(records: &[HeapLogRecord]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
