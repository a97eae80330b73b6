//! Span output
//!
//! Completed spans leave the reconstructor through [`SpanSink`]. The CLI
//! writes them as JSON lines, one object per span.

pub mod json_lines;

pub use json_lines::JsonLinesEmitter;

use crate::spans::Span;

/// Receives every completed span exactly once
pub trait SpanSink {
    fn emit(&mut self, span: Span);
}

/// Collects spans in memory
impl SpanSink for Vec<Span> {
    fn emit(&mut self, span: Span) {
        self.push(span);
    }
}
