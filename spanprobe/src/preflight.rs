//! Pre-flight checks for spanprobe
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::debug;
use object::{Object, ObjectSection};
use std::path::Path;

use crate::domain::Pid;

/// Minimum kernel version with BPF ring buffer support
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns the first failed requirement
pub fn run_preflight_checks(target: &Path, quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_binary_exists(target)?;
    check_symbol_table(target, quiet)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: spanprobe requires root privileges to load eBPF programs.\n\n\
         Run with: sudo spanprobe ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 (...) ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        debug!("Unrecognized kernel release {release}, skipping version check");
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             spanprobe requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// `(major, minor)` from a release string such as `5.15.0-generic`
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check if the target binary exists and is a regular file
fn check_binary_exists(target: &Path) -> Result<()> {
    if !target.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            target.display()
        );
    }
    if !target.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --target must point to an executable file, not a directory.",
            target.display()
        );
    }
    Ok(())
}

/// Warn when the binary has no `.symtab` (only exported symbols can be probed)
fn check_symbol_table(target: &Path, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }

    let file_data =
        std::fs::read(target).with_context(|| format!("Failed to read binary: {}", target.display()))?;

    let Ok(obj) = object::File::parse(&*file_data) else {
        // Symbol table loading reports the real error
        return Ok(());
    };

    if !obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0) {
        eprintln!("warning: binary stripped, only dynamic symbols can be instrumented");
    }

    Ok(())
}

/// Check if the target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` is missing
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {0} not found.\n\n\
             Is the process still running? Check with: ps -p {0}",
            pid.0
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("4.19rc1"), Some((4, 19)));
        assert_eq!(parse_kernel_release("5"), None);
        assert_eq!(parse_kernel_release("x.y"), None);
        assert_eq!(parse_kernel_release("unknown"), None);
    }

    #[test]
    fn test_binary_not_found() {
        let err = check_binary_exists(Path::new("/nonexistent/path/to/binary")).unwrap_err();
        assert!(err.to_string().contains("Binary not found"));
    }

    #[test]
    fn test_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_binary_exists(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Not a file"));
    }

    #[test]
    fn test_process_not_found() {
        let err = check_process_exists(Pid(999_999_999)).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_symbol_table_check_tolerates_non_elf() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"#!/bin/sh\n").unwrap();
        assert!(check_symbol_table(file.path(), false).is_ok());
    }
}
