use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::domain::Tid;

/// Identifier of one reconstructed span: 128 random bits as 32 hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    #[must_use]
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instrumented call observed while a span was open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEvent {
    pub thread_id: Tid,
    pub function_name: String,
    /// Nanoseconds between entry and return
    pub duration: u64,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanState {
    #[default]
    Open,
    Closed,
}

/// The reconstructed execution of one request on one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub span_id: SpanId,
    pub thread_id: Tid,
    pub request_descriptor: String,
    pub start_time: DateTime<Utc>,
    /// Arrival order
    pub events: Vec<FunctionEvent>,
    #[serde(skip)]
    pub state: SpanState,
}

impl Span {
    #[must_use]
    pub fn open(thread_id: Tid, request_descriptor: String, start_time: DateTime<Utc>) -> Self {
        Self {
            span_id: SpanId::random(),
            thread_id,
            request_descriptor,
            start_time,
            events: Vec::new(),
            state: SpanState::Open,
        }
    }

    pub fn push(&mut self, event: FunctionEvent) {
        debug_assert_eq!(self.state, SpanState::Open);
        self.events.push(event);
    }

    #[must_use]
    pub fn close(mut self) -> Self {
        self.state = SpanState::Closed;
        self
    }
}
