//! Kernel session setup and the consumer task
//!
//! ```text
//! remove_memlock → load_ebpf_program → write_config → take maps
//!                                                        │
//!        EVENTS ring buffer ──▶ consume_events ──▶ SpanReconstructor ──▶ SpanSink
//! ```

pub mod ebpf_setup;
pub mod event_loop;

pub use ebpf_setup::{
    init_ebpf_logger, load_ebpf_program, remove_memlock, take_descriptor_store, take_event_stream, write_config,
};
pub use event_loop::{consume_events, process_record, register_source, ConsumerStats, RecordSource};
