//! # Shared Wire Format (eBPF ↔ Userspace)
//!
//! Records written to the `EVENTS` ring buffer and the value type of the
//! `REQUEST_DESCRIPTORS` side-channel map.
//!
//! The ring buffer protocol has no tag field: the record kind is implied by
//! its byte length. Every record type is therefore `#[repr(C, packed)]` so the
//! kernel side produces exactly [`SPAN_START_LEN`], [`FUNC_EVENT_LEN`] or
//! [`SPAN_END_LEN`] bytes. Two kinds must never share a length.
//!
//! All integers are little-endian (the only byte order `bpfel` produces).

#![no_std]

// ============================================================================
// Record Lengths
// ============================================================================

/// `tid:u32, timestamp:u64`
pub const SPAN_START_LEN: usize = 12;

/// `tid:u32, start_ts:u64, end_ts:u64, func_addr:u64` + 4 reserved bytes
pub const FUNC_EVENT_LEN: usize = 32;

/// `tid:u32`
pub const SPAN_END_LEN: usize = 4;

/// Capacity of a side-channel descriptor, including the NUL terminator.
pub const DESCRIPTOR_LEN: usize = 256;

// ============================================================================
// CONFIG map keys
// ============================================================================

/// Thread-group id the probes should fire for (0 = every process).
pub const CONFIG_TARGET_TGID: u32 = 0;

/// Index + 1 of the pointer argument copied into the descriptor map on
/// dispatch entry (0 = descriptor capture disabled).
pub const CONFIG_DESCRIPTOR_ARG: u32 = 1;

// ============================================================================
// Records
// ============================================================================

/// Emitted by `dispatch_entry` when a request starts on a thread.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SpanStartRecord {
    pub tid: u32,
    /// `bpf_ktime_get_ns()` at dispatch entry
    pub timestamp_ns: u64,
}

/// Emitted by `func_exit` once an instrumented function returns.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FuncEventRecord {
    pub tid: u32,
    pub start_ns: u64,
    pub end_ns: u64,
    /// Runtime address the entry uprobe fired at (the function's first byte)
    pub func_addr: u64,
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved: [u8; 4],
}

/// Emitted by `dispatch_exit` when the dispatch function returns.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SpanEndRecord {
    pub tid: u32,
}

/// Per-thread entry bookkeeping kept in `FUNC_STARTS` between entry and exit.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PendingCall {
    pub start_ns: u64,
    pub func_addr: u64,
}

/// NUL-terminated request descriptor (e.g. the request path)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RequestDescriptor {
    pub bytes: [u8; DESCRIPTOR_LEN],
}

impl RequestDescriptor {
    pub const fn empty() -> Self {
        Self { bytes: [0u8; DESCRIPTOR_LEN] }
    }

    /// Bytes before the first NUL (the whole buffer if none)
    pub fn text(&self) -> &[u8] {
        let end = self.bytes.iter().position(|&b| b == 0).unwrap_or(DESCRIPTOR_LEN);
        &self.bytes[..end]
    }
}

// Compile-time guard: the length discriminator depends on these sizes.
const _: () = assert!(core::mem::size_of::<SpanStartRecord>() == SPAN_START_LEN);
const _: () = assert!(core::mem::size_of::<FuncEventRecord>() == FUNC_EVENT_LEN);
const _: () = assert!(core::mem::size_of::<SpanEndRecord>() == SPAN_END_LEN);

#[cfg(feature = "user")]
use aya::Pod;

// Pod lets the user side read and write these through aya maps.
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for PendingCall {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for RequestDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_text_stops_at_nul() {
        let mut d = RequestDescriptor::empty();
        d.bytes[..5].copy_from_slice(b"/user");
        assert_eq!(d.text(), b"/user");
    }

    #[test]
    fn test_descriptor_text_without_nul() {
        let d = RequestDescriptor { bytes: [b'a'; DESCRIPTOR_LEN] };
        assert_eq!(d.text().len(), DESCRIPTOR_LEN);
    }
}
