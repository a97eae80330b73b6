//! Discovery of instrumentable functions in the target binary

use log::{debug, info};
use object::ObjectSymbol;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;

use crate::domain::TracerError;
use crate::symbolization::symbol_table::function_symbols;

/// Lists the named functions of a binary. Names must be usable as uprobe
/// symbols (raw, not demangled).
pub trait SymbolEnumerator {
    /// # Errors
    /// Returns [`TracerError::Load`] when the binary cannot be enumerated
    fn enumerate(&self, binary: &Path) -> Result<Vec<String>, TracerError>;
}

/// Reads defined text symbols straight from the ELF symbol table (`.dynsym`
/// when the binary is stripped), the same set [`SymbolTable`](crate::symbolization::SymbolTable) resolves
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfSymbolEnumerator;

impl SymbolEnumerator for ElfSymbolEnumerator {
    fn enumerate(&self, binary: &Path) -> Result<Vec<String>, TracerError> {
        let target = binary.display().to_string();
        let data = fs::read(binary).map_err(|e| TracerError::load(&target, e))?;
        let obj = object::File::parse(&*data).map_err(|e| TracerError::load(&target, e))?;

        Ok(function_symbols(&obj).iter().filter_map(|s| s.name().ok().map(str::to_owned)).collect())
    }
}

/// Runs an `nm`-compatible tool (`go tool nm` by default) and keeps its text symbols
#[derive(Debug, Clone)]
pub struct NmSymbolEnumerator {
    command: Vec<String>,
}

impl NmSymbolEnumerator {
    /// `command` is split on whitespace; the binary path is appended as the last argument
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self { command: command.split_whitespace().map(str::to_owned).collect() }
    }
}

impl Default for NmSymbolEnumerator {
    fn default() -> Self {
        Self::new("go tool nm")
    }
}

impl SymbolEnumerator for NmSymbolEnumerator {
    fn enumerate(&self, binary: &Path) -> Result<Vec<String>, TracerError> {
        let target = binary.display().to_string();
        let (program, args) =
            self.command.split_first().ok_or_else(|| TracerError::load(&target, "empty nm command"))?;

        debug!("Running {} {} {}", program, args.join(" "), target);
        let output = Command::new(program)
            .args(args)
            .arg(binary)
            .output()
            .map_err(|e| TracerError::load(&target, format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TracerError::load(target, format!("{program} exited with {}: {}", output.status, stderr.trim())));
        }

        Ok(parse_nm_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Text symbols from `nm` output lines (`<addr> <type> <name>`).
/// Undefined symbols have no address column and are skipped.
#[must_use]
pub fn parse_nm_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [_addr, "T" | "t", name @ ..] if !name.is_empty() => Some(name.join(" ")),
                _ => None,
            }
        })
        .collect()
}

/// Functions of `binary` whose names match `filter`, sorted and de-duplicated.
///
/// An empty result is not an error.
///
/// # Errors
/// Propagates enumeration failures
pub fn discover_targets(
    enumerator: &dyn SymbolEnumerator,
    binary: &Path,
    filter: &Regex,
) -> Result<BTreeSet<String>, TracerError> {
    let targets: BTreeSet<String> =
        enumerator.enumerate(binary)?.into_iter().filter(|name| filter.is_match(name)).collect();
    info!("Discovered {} functions matching /{}/ in {}", targets.len(), filter.as_str(), binary.display());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSymbols(Vec<&'static str>);

    impl SymbolEnumerator for FixedSymbols {
        fn enumerate(&self, _binary: &Path) -> Result<Vec<String>, TracerError> {
            Ok(self.0.iter().map(|s| (*s).to_string()).collect())
        }
    }

    #[test]
    fn test_parse_go_tool_nm() {
        let out = "\
  4a5f20 T main.getUserByID
  4a5e00 T main.getUserHandler
  4a6000 T main.main
  5b1230 D main.initdone.
  4a7000 T net/http.(*ServeMux).ServeHTTP
         U runtime.cgocall
";
        assert_eq!(
            parse_nm_output(out),
            ["main.getUserByID", "main.getUserHandler", "main.main", "net/http.(*ServeMux).ServeHTTP"]
        );
    }

    #[test]
    fn test_parse_gnu_nm_local_text() {
        assert_eq!(parse_nm_output("0000000000401000 t helper\n"), ["helper"]);
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let symbols = FixedSymbols(vec!["main.sample", "runtime.main", "main.getUserByID", "main.sample"]);
        let filter = Regex::new(r"^main\.").unwrap();
        let targets = discover_targets(&symbols, Path::new("/bin/app"), &filter).unwrap();
        let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
        assert_eq!(targets, ["main.getUserByID", "main.sample"]);
    }

    #[test]
    fn test_discover_no_match_is_empty() {
        let symbols = FixedSymbols(vec!["runtime.main"]);
        let filter = Regex::new(r"^main\.").unwrap();
        assert!(discover_targets(&symbols, Path::new("/bin/app"), &filter).unwrap().is_empty());
    }

    #[test]
    fn test_nm_missing_tool_is_load_error() {
        let nm = NmSymbolEnumerator::new("/nonexistent/nm-tool");
        let err = nm.enumerate(Path::new("/bin/ls")).unwrap_err();
        assert!(matches!(err, TracerError::Load { .. }));
    }

    /// Shared library mapped into this process; distro builds ship without `.symtab`
    fn mapped_libc() -> Option<std::path::PathBuf> {
        let maps = fs::read_to_string("/proc/self/maps").ok()?;
        maps.lines()
            .filter_map(|l| l.split_whitespace().nth(5))
            .find(|p| Path::new(p).file_name().is_some_and(|n| n.to_string_lossy().starts_with("libc.so")))
            .map(std::path::PathBuf::from)
    }

    #[test]
    fn test_elf_enumerator_falls_back_to_dynsym() {
        let Some(libc) = mapped_libc() else {
            return;
        };
        let names = ElfSymbolEnumerator.enumerate(&libc).unwrap();
        assert!(names.iter().any(|n| n == "malloc"), "malloc not enumerated from {}", libc.display());

        let table = crate::symbolization::SymbolTable::load(&libc).unwrap();
        assert!(table.names().any(|n| n == "malloc"));
    }

    #[test]
    fn test_elf_enumerator_reads_test_binary() {
        let exe = std::env::current_exe().unwrap();
        let names = ElfSymbolEnumerator.enumerate(&exe).unwrap();
        assert!(!names.is_empty());
    }
}
