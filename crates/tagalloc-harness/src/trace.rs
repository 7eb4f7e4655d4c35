//! Allocation trace format.
//!
//! One operation per line; ids name allocations within the trace:
//!
//! ```text
//! # comment
//! a <id> <size>           allocate
//! c <id> <count> <size>   zeroed allocate
//! r <id> <size>           resize
//! f <id>                  release
//! ```

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TraceOp {
    Alloc { id: u32, size: usize },
    Calloc { id: u32, count: usize, size: usize },
    Realloc { id: u32, size: usize },
    Free { id: u32 },
}

impl TraceOp {
    #[must_use]
    pub fn id(self) -> u32 {
        match self {
            Self::Alloc { id, .. }
            | Self::Calloc { id, .. }
            | Self::Realloc { id, .. }
            | Self::Free { id } => id,
        }
    }
}

/// A parsed operation with its 1-based source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub line: usize,
    #[serde(flatten)]
    pub op: TraceOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub steps: Vec<TraceStep>,
    /// SHA-256 of the trace text, lowercase hex.
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("line {line}: unknown operation '{op}'")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: expected {expected} operands, found {found}")]
    Arity {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid number '{value}'")]
    BadNumber { line: usize, value: String },
}

fn number<T: std::str::FromStr>(line: usize, value: &str) -> Result<T, TraceError> {
    value.parse().map_err(|_| TraceError::BadNumber {
        line,
        value: value.to_string(),
    })
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // Writing into a String cannot fail.
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Parse trace text.
pub fn parse_trace(text: &str) -> Result<Trace, TraceError> {
    use sha2::Digest;

    let mut steps = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let fields: Vec<&str> = content.split_whitespace().collect();
        let (kind, args) = (fields[0], &fields[1..]);
        let expected = match kind {
            "a" | "r" => 2,
            "c" => 3,
            "f" => 1,
            other => {
                return Err(TraceError::UnknownOp {
                    line,
                    op: other.to_string(),
                });
            }
        };
        if args.len() != expected {
            return Err(TraceError::Arity {
                line,
                expected,
                found: args.len(),
            });
        }
        let id = number(line, args[0])?;
        let op = match kind {
            "a" => TraceOp::Alloc {
                id,
                size: number(line, args[1])?,
            },
            "r" => TraceOp::Realloc {
                id,
                size: number(line, args[1])?,
            },
            "c" => TraceOp::Calloc {
                id,
                count: number(line, args[1])?,
                size: number(line, args[2])?,
            },
            _ => TraceOp::Free { id },
        };
        steps.push(TraceStep { line, op });
    }
    Ok(Trace {
        steps,
        sha256: hex_lower(&sha2::Sha256::digest(text.as_bytes())),
    })
}
