//! Command-line interface

pub mod args;

pub use args::{Args, EnumeratorKind, DEFAULT_DISPATCH, DEFAULT_FUNCTION_FILTER};
