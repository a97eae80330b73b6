//! # Ring Buffer Record Decoding
//!
//! The kernel side writes three packed record kinds into one ring buffer and
//! the kind is implied by the byte length alone:
//!
//! | Kind      | Length | Layout (little-endian)                                     |
//! |-----------|--------|------------------------------------------------------------|
//! | SpanStart | 12     | `tid:u32 @0, timestamp:u64 @4`                             |
//! | FuncEvent | 32     | `tid:u32 @0, start:u64 @4, end:u64 @12, addr:u64 @20`, pad |
//! | SpanEnd   | 4      | `tid:u32 @0`                                               |
//!
//! Fields are read at fixed offsets through bounds-checked slices; a record is
//! never reinterpreted as a struct. Any other length is
//! [`TracerError::MalformedRecord`].

use spanprobe_common::{FUNC_EVENT_LEN, SPAN_END_LEN, SPAN_START_LEN};

use crate::domain::{Address, KernelTime, Tid, TracerError};

/// A decoded ring buffer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    SpanStart { tid: Tid, timestamp: KernelTime },
    FuncEvent { tid: Tid, start: KernelTime, end: KernelTime, func_addr: Address },
    SpanEnd { tid: Tid },
}

impl RawEvent {
    #[must_use]
    pub fn tid(&self) -> Tid {
        match *self {
            Self::SpanStart { tid, .. } | Self::FuncEvent { tid, .. } | Self::SpanEnd { tid } => tid,
        }
    }
}

/// Decode one record.
///
/// # Errors
/// Returns [`TracerError::MalformedRecord`] when the length is not 4, 12 or 32
pub fn decode(bytes: &[u8]) -> Result<RawEvent, TracerError> {
    match bytes.len() {
        SPAN_START_LEN => Ok(RawEvent::SpanStart {
            tid: Tid(read_u32(bytes, 0)?),
            timestamp: KernelTime(read_u64(bytes, 4)?),
        }),
        FUNC_EVENT_LEN => Ok(RawEvent::FuncEvent {
            tid: Tid(read_u32(bytes, 0)?),
            start: KernelTime(read_u64(bytes, 4)?),
            end: KernelTime(read_u64(bytes, 12)?),
            func_addr: Address(read_u64(bytes, 20)?),
        }),
        SPAN_END_LEN => Ok(RawEvent::SpanEnd { tid: Tid(read_u32(bytes, 0)?) }),
        len => Err(TracerError::MalformedRecord { len }),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, TracerError> {
    field::<4>(bytes, offset).map(u32::from_le_bytes)
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, TracerError> {
    field::<8>(bytes, offset).map(u64::from_le_bytes)
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], TracerError> {
    offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(TracerError::MalformedRecord { len: bytes.len() })
}
