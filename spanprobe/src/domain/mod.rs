//! Domain model for spanprobe
//!
//! Core newtypes and the structured error type shared by every component.

pub mod errors;
pub mod types;

pub use errors::TracerError;
pub use types::{Address, KernelTime, Pid, Tid};
