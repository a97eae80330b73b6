//! Structured error types for spanprobe
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Startup failures surface through `anyhow` in `main`; per-event variants are
//! logged where they occur and never leave the consumer loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracerError {
    /// Binary, symbol table or eBPF object could not be loaded (fatal)
    #[error("Failed to load {target}: {reason}")]
    Load { target: String, reason: String },

    /// Locked-memory limit could not be lifted (fatal)
    #[error("Permission denied: {0}")]
    Privilege(String),

    /// A probe could not be bound (fatal for dispatch probes only)
    #[error("Failed to attach {probe} to {symbol}: {error}")]
    Attach { probe: String, symbol: String, error: String },

    /// Transient failure while waiting on the event stream
    #[error("Error reading event stream: {0}")]
    Read(#[source] std::io::Error),

    /// Event source closed; the consumer stops cleanly
    #[error("Event stream closed")]
    StreamClosed,

    /// Record length matched no known record kind
    #[error("Malformed record: {len} bytes")]
    MalformedRecord { len: usize },

    /// A completed span could not be written
    #[error("Failed to emit span {span_id}: {reason}")]
    Emit { span_id: String, reason: String },
}

impl TracerError {
    pub fn load(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load { target: target.into(), reason: reason.to_string() }
    }

    /// Fatal conditions abort startup; the rest are absorbed per event
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Privilege(_) | Self::Attach { .. })
    }
}
