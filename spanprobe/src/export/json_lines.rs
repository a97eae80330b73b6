use log::{debug, warn};
use std::io::Write;

use super::SpanSink;
use crate::domain::TracerError;
use crate::spans::Span;

/// Writes each span as one JSON object followed by a newline.
///
/// Failed writes are logged and the span is dropped; nothing is retried.
pub struct JsonLinesEmitter<W: Write> {
    writer: W,
    pub emitted: u64,
    pub failed: u64,
}

impl<W: Write> JsonLinesEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, emitted: 0, failed: 0 }
    }

    /// Serialize and write one span
    ///
    /// # Errors
    /// Returns [`TracerError::Emit`] if serialization or the write fails
    pub fn write_span(&mut self, span: &Span) -> Result<(), TracerError> {
        let emit_err = |reason: String| TracerError::Emit { span_id: span.span_id.to_string(), reason };

        // Serialize fully first so a failure never leaves half a line behind
        let mut line = serde_json::to_vec(span).map_err(|e| emit_err(e.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line).map_err(|e| emit_err(e.to_string()))?;
        self.writer.flush().map_err(|e| emit_err(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SpanSink for JsonLinesEmitter<W> {
    fn emit(&mut self, span: Span) {
        match self.write_span(&span) {
            Ok(()) => {
                self.emitted += 1;
                debug!("Emitted span {} ({} events)", span.span_id, span.events.len());
            }
            Err(e) => {
                self.failed += 1;
                warn!("{e}");
            }
        }
    }
}
