//! Resolve the binary to instrument from `--target` / `--pid`

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// Canonical path of the binary to probe.
///
/// An explicit target wins; otherwise the executable of `pid` is used.
///
/// # Errors
/// - Neither a target nor a PID was given
/// - The path cannot be canonicalized or `/proc/<pid>/exe` is unreadable
pub fn resolve_target(target: Option<&Path>, pid: Option<Pid>) -> Result<PathBuf> {
    match (target, pid) {
        (Some(target), _) => fs::canonicalize(target)
            .with_context(|| format!("Failed to resolve path: {}", target.display())),
        (None, Some(pid)) => resolve_exe_path(pid),
        (None, None) => bail!(
            "Missing required argument: --target or --pid\n\n\
             Usage:\n  \
             spanprobe --target ./server     Trace every process running ./server\n  \
             spanprobe --pid 1234            Explicit PID, auto-detect binary\n\n\
             Run 'spanprobe --help' for more options"
        ),
    }
}

/// Resolve binary path from PID via `/proc/<pid>/exe`.
///
/// # Errors
/// Returns error if the process doesn't exist or `/proc/<pid>/exe` is not readable.
pub fn resolve_exe_path(pid: Pid) -> Result<PathBuf> {
    let exe_link = format!("/proc/{}/exe", pid.0);
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_arguments() {
        let err = resolve_target(None, None).unwrap_err();
        assert!(err.to_string().contains("Missing required argument"));
    }

    #[test]
    fn test_pid_of_self() {
        let pid = Pid(i32::try_from(std::process::id()).unwrap());
        let exe = resolve_target(None, Some(pid)).unwrap();
        assert_eq!(exe, fs::canonicalize(std::env::current_exe().unwrap()).unwrap());
    }

    #[test]
    fn test_explicit_target_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("server");
        fs::write(&bin, b"").unwrap();
        let resolved = resolve_target(Some(&dir.path().join(".").join("server")), None).unwrap();
        assert_eq!(resolved, fs::canonicalize(&bin).unwrap());
    }

    #[test]
    fn test_unknown_pid() {
        assert!(resolve_exe_path(Pid(999_999_999)).is_err());
    }
}
