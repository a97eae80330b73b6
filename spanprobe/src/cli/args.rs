//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Default request-dispatch symbol (Go `net/http` multiplexer)
pub const DEFAULT_DISPATCH: &str = "net/http.(*ServeMux).ServeHTTP";

/// Default filter for instrumented functions (Go `main` package)
pub const DEFAULT_FUNCTION_FILTER: &str = r"^main\.";

#[derive(Parser, Debug)]
#[command(
    name = "spanprobe",
    about = "Reconstruct per-request spans from uprobes on an unmodified binary",
    after_help = "\
EXAMPLES:
    sudo spanprobe --target ./server                         Trace every process running ./server
    sudo spanprobe --pid 1234                                Explicit PID, auto-detect binary
    sudo spanprobe --pid 1234 --output spans.jsonl           Write spans to a file
    sudo spanprobe --target ./server --enumerator nm         Enumerate functions with `go tool nm`"
)]
pub struct Args {
    /// Binary to instrument (auto-detected from /proc/<pid>/exe when only --pid is given)
    #[arg(short, long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    /// Only trace this process (also used to compute the load bias)
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Function whose entry opens a span and whose return closes it
    #[arg(long, value_name = "SYMBOL", default_value = DEFAULT_DISPATCH)]
    pub dispatch: String,

    /// Regex selecting the functions to instrument
    #[arg(short, long, value_name = "REGEX", default_value = DEFAULT_FUNCTION_FILTER)]
    pub functions: String,

    /// How to list the functions of the target binary
    #[arg(long, value_enum, default_value_t = EnumeratorKind::Elf)]
    pub enumerator: EnumeratorKind,

    /// nm-compatible command used by `--enumerator nm`
    #[arg(long, value_name = "CMD", default_value = "go tool nm")]
    pub nm_command: String,

    /// Dispatch argument index holding a C string to record as the request descriptor
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..6))]
    pub descriptor_arg: Option<u8>,

    /// Write spans to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnumeratorKind {
    /// Read the ELF symbol table directly
    Elf,
    /// Run an external nm-compatible tool
    Nm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["spanprobe", "--target", "/srv/app"]).unwrap();
        assert_eq!(args.dispatch, DEFAULT_DISPATCH);
        assert_eq!(args.functions, DEFAULT_FUNCTION_FILTER);
        assert_eq!(args.enumerator, EnumeratorKind::Elf);
        assert_eq!(args.nm_command, "go tool nm");
        assert_eq!(args.descriptor_arg, None);
        assert_eq!(args.duration, 0);
    }

    #[test]
    fn test_nm_enumerator() {
        let args = Args::try_parse_from(["spanprobe", "--pid", "42", "--enumerator", "nm", "--nm-command", "nm"])
            .unwrap();
        assert_eq!(args.pid, Some(42));
        assert_eq!(args.enumerator, EnumeratorKind::Nm);
        assert_eq!(args.nm_command, "nm");
    }

    #[test]
    fn test_descriptor_arg_range() {
        assert!(Args::try_parse_from(["spanprobe", "--descriptor-arg", "1"]).is_ok());
        assert!(Args::try_parse_from(["spanprobe", "--descriptor-arg", "9"]).is_err());
    }
}
