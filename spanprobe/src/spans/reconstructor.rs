use log::{debug, info};
use std::collections::HashMap;

use super::{DescriptorStore, FunctionEvent, Span};
use crate::context::TraceContext;
use crate::decoder::RawEvent;
use crate::domain::{Address, KernelTime, Tid};
use crate::export::SpanSink;

/// Per-event counters, reported at shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpanStats {
    pub started: u64,
    /// Open spans discarded because a new start arrived on the same thread
    pub replaced: u64,
    pub completed: u64,
    pub function_events: u64,
    /// Function events for threads without an open span
    pub orphan_function_events: u64,
    /// Span ends for threads without an open span
    pub orphan_ends: u64,
}

/// Span state machine, keyed by thread id.
///
/// ```text
///            SpanStart                 SpanEnd (emit)
///   NoSpan ─────────────▶ Open ───────────────────────▶ NoSpan
///                        │  ▲
///                        └──┘ SpanStart (previous span discarded)
///                         FuncEvent (append)
/// ```
///
/// Owns the live span map and the side-channel store. Exactly one task may
/// own a reconstructor; it is not shared between threads.
pub struct SpanReconstructor<S, E> {
    context: TraceContext,
    live: HashMap<Tid, Span>,
    descriptors: S,
    sink: E,
    pub stats: SpanStats,
}

impl<S: DescriptorStore, E: SpanSink> SpanReconstructor<S, E> {
    pub fn new(context: TraceContext, descriptors: S, sink: E) -> Self {
        Self { context, live: HashMap::new(), descriptors, sink, stats: SpanStats::default() }
    }

    /// Route a decoded record to its transition
    pub fn handle(&mut self, event: RawEvent) {
        match event {
            RawEvent::SpanStart { tid, timestamp } => self.on_span_start(tid, timestamp),
            RawEvent::FuncEvent { tid, start, end, func_addr } => {
                self.on_func_event(tid, start, end, func_addr);
            }
            RawEvent::SpanEnd { tid } => self.on_span_end(tid),
        }
    }

    /// Open a span for `tid`, replacing (not merging) any span already open there
    pub fn on_span_start(&mut self, tid: Tid, timestamp: KernelTime) {
        let descriptor = self.descriptors.lookup(tid).unwrap_or_default();
        let span = Span::open(tid, descriptor, self.context.wall_clock(timestamp));
        debug!("Span started: {tid} id={}", span.span_id);

        self.stats.started += 1;
        if let Some(previous) = self.live.insert(tid, span) {
            self.stats.replaced += 1;
            debug!(
                "Discarded span {} on {tid} ({} events): new start before end",
                previous.span_id,
                previous.events.len()
            );
        }
    }

    /// Append a function event to the open span of `tid`; dropped if there is none
    pub fn on_func_event(&mut self, tid: Tid, start: KernelTime, end: KernelTime, func_addr: Address) {
        let Some(span) = self.live.get_mut(&tid) else {
            self.stats.orphan_function_events += 1;
            return;
        };

        let event = FunctionEvent {
            thread_id: tid,
            function_name: self.context.resolve(func_addr),
            duration: end.saturating_since(start),
            start_time: self.context.wall_clock(start),
        };
        debug!("Function event: {tid} {} {}ns", event.function_name, event.duration);
        span.push(event);
        self.stats.function_events += 1;
    }

    /// Close the open span of `tid` and emit it; no-op if there is none
    pub fn on_span_end(&mut self, tid: Tid) {
        let Some(span) = self.live.remove(&tid) else {
            self.stats.orphan_ends += 1;
            return;
        };
        self.descriptors.remove(tid);
        self.stats.completed += 1;
        debug!("Span completed: {tid} id={}", span.span_id);
        self.sink.emit(span.close());
    }

    /// Number of spans currently open
    #[must_use]
    pub fn open_spans(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn live_span(&self, tid: Tid) -> Option<&Span> {
        self.live.get(&tid)
    }

    #[must_use]
    pub fn sink(&self) -> &E {
        &self.sink
    }

    #[must_use]
    pub fn descriptors(&self) -> &S {
        &self.descriptors
    }

    pub fn descriptors_mut(&mut self) -> &mut S {
        &mut self.descriptors
    }

    /// Drop every open span without emitting it (shutdown). Returns how many
    /// were discarded.
    pub fn discard_open(&mut self) -> usize {
        let count = self.live.len();
        if count > 0 {
            info!("Discarding {count} open spans at shutdown");
        }
        self.live.clear();
        count
    }

    pub fn into_sink(self) -> E {
        self.sink
    }
}
