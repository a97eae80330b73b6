//! # Probe Discovery and Lifetime
//!
//! - [`discover_targets`] lists the functions to instrument through a
//!   [`SymbolEnumerator`] and a name filter
//! - [`ProbeManager`] binds an entry/exit pair per function plus the two
//!   dispatch probes, and owns every resulting handle
//! - [`EbpfBackend`] is the aya implementation of [`ProbeBackend`]

pub mod ebpf_backend;
pub mod enumerator;
pub mod manager;

pub use ebpf_backend::EbpfBackend;
pub use enumerator::{discover_targets, parse_nm_output, ElfSymbolEnumerator, NmSymbolEnumerator, SymbolEnumerator};
pub use manager::{ProbeBackend, ProbeId, ProbeKind, ProbeManager};
