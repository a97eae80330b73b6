//! # Span Reconstruction
//!
//! Rebuilds per-request traces from the decoded record stream.
//!
//! - `SpanStart` opens a span for the thread (descriptor read from the side channel)
//! - `FuncEvent` appends a resolved function call to that thread's open span
//! - `SpanEnd` closes the span, clears the side channel entry, and emits it
//!
//! One open span per thread. Nested spans on a thread are not supported: a
//! second start replaces the first, whose events are discarded.

pub mod descriptor;
pub mod reconstructor;
pub mod span;

pub use descriptor::{DescriptorStore, EbpfDescriptorStore, MemoryDescriptorStore};
pub use reconstructor::{SpanReconstructor, SpanStats};
pub use span::{FunctionEvent, Span, SpanId, SpanState};
