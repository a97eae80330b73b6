//! # spanprobe - Request Spans from Uprobes
//!
//! spanprobe attaches uprobes to an unmodified, running binary and rebuilds a
//! per-request timeline from them. A request's **span** opens when the
//! dispatch function is entered on a thread and closes when it returns; every
//! instrumented function that returns on that thread in between becomes an
//! event of the span.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Target process (unmodified)                   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ function entry / return
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • dispatch_entry / dispatch_exit  → SpanStart / SpanEnd        │
//! │  • func_entry / func_exit          → FuncEvent                  │
//! │  • REQUEST_DESCRIPTORS side channel (TID → descriptor)          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ EVENTS ring buffer (kind = length)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     spanprobe (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────┐  │
//! │  │ decoder  │──▶│    spans     │──▶│  export  │──▶│  stdout  │  │
//! │  └──────────┘   │(reconstructor│   │ (JSONL)  │   │  / file  │  │
//! │                 └──────┬───────┘   └──────────┘   └──────────┘  │
//! │                        │ resolve                                │
//! │                 ┌──────▼───────┐                                │
//! │                 │symbolization │                                │
//! │                 └──────────────┘                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`probes`]: function discovery and the probe manager (sole owner of
//!   every attached uprobe)
//! - [`runtime`]: eBPF loading, map setup and the async consumer task
//! - [`decoder`]: length-discriminated record decoding
//! - [`spans`]: the per-thread span state machine and the side channel
//! - [`symbolization`]: ELF symbol table and load-bias correction
//! - [`context`]: startup-computed state shared read-only by the reconstructor
//! - [`export`]: span sinks (JSON lines)
//! - [`cli`], [`preflight`], [`target`]: command-line front end
//! - [`domain`]: core domain types and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Trace a Go HTTP server, spans to stdout
//! sudo ./spanprobe --pid <PID>
//!
//! # Write spans to a file and stop after a minute
//! sudo ./spanprobe --target ./server --output spans.jsonl --duration 60
//! ```

pub mod cli;
pub mod context;
pub mod decoder;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod probes;
pub mod runtime;
pub mod spans;
pub mod symbolization;
pub mod target;
