//! Load bias computation from `/proc/<pid>/maps`
//!
//! A PIE target is mapped at a randomized base, so addresses reported by the
//! probes differ from the link-time addresses in the symbol table by a
//! constant bias. This module finds that bias from the executable mapping of
//! the target module. Every failure degrades to a bias of zero.

use log::{debug, info, warn};
use std::fs;
use std::path::Path;

use crate::domain::Pid;

/// Offset between runtime and link-time addresses of the target module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadBias(pub u64);

/// One line of a maps file: "start-end perms offset dev inode pathname"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping<'a> {
    pub start: u64,
    pub end: u64,
    pub perms: &'a str,
    pub offset: u64,
    pub path: &'a str,
}

impl Mapping<'_> {
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.perms.as_bytes().get(2) == Some(&b'x')
    }
}

/// Parse a single maps line. Anonymous mappings parse with an empty path.
#[must_use]
pub fn parse_mapping(line: &str) -> Option<Mapping<'_>> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let perms = parts.next()?;
    let offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next().unwrap_or("");

    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        perms,
        offset: u64::from_str_radix(offset, 16).ok()?,
        path,
    })
}

/// Compute the load bias of `module` from maps-format text.
///
/// Uses the first executable mapping of the module:
/// `bias = start - file_offset - link_base`, where `link_base` is the
/// executable segment's `vaddr - file_offset` from the ELF headers (non-zero
/// for non-PIE executables, which then get a bias of 0).
///
/// Returns `LoadBias(0)` when the text cannot be parsed or the module is not mapped.
#[must_use]
pub fn compute_bias(maps: &str, module: &Path, link_base: u64) -> LoadBias {
    let mapping = maps
        .lines()
        .filter_map(parse_mapping)
        .find(|m| m.is_executable() && mapping_matches(m.path, module));

    match mapping {
        Some(m) => {
            debug!("Executable mapping of {}: 0x{:x}-0x{:x} offset 0x{:x}", m.path, m.start, m.end, m.offset);
            LoadBias(m.start.wrapping_sub(m.offset).wrapping_sub(link_base))
        }
        None => {
            debug!("No executable mapping found for {}", module.display());
            LoadBias::default()
        }
    }
}

/// Read the maps of `pid` (or of this process when `pid` is `None`) and
/// compute the bias of `module`.
#[must_use]
pub fn read_bias(pid: Option<Pid>, module: &Path, link_base: u64) -> LoadBias {
    let maps_path = pid.map_or_else(|| "/proc/self/maps".to_string(), |p| format!("/proc/{}/maps", p.0));

    match fs::read_to_string(&maps_path) {
        Ok(maps) => {
            let bias = compute_bias(&maps, module, link_base);
            info!("Load bias for {}: 0x{:x}", module.display(), bias.0);
            bias
        }
        Err(e) => {
            warn!("Failed to read {maps_path}: {e}. Resolving raw addresses.");
            LoadBias::default()
        }
    }
}

/// Exact path match, or basename match when the maps entry is a path
fn mapping_matches(mapped: &str, module: &Path) -> bool {
    if mapped.is_empty() {
        return false;
    }
    let mapped = Path::new(mapped);
    mapped == module || (mapped.file_name().is_some() && mapped.file_name() == module.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIE_MAPS: &str = "\
55d0c4a00000-55d0c4a7e000 r--p 00000000 fd:01 1234 /srv/app/test
55d0c4a7e000-55d0c4d51000 r-xp 0007e000 fd:01 1234 /srv/app/test
55d0c4d51000-55d0c4f9b000 r--p 00351000 fd:01 1234 /srv/app/test
7f2a1c000000-7f2a1c021000 rw-p 00000000 00:00 0
7f2a1e5d8000-7f2a1e76d000 r-xp 00028000 fd:01 5678 /usr/lib/libc.so.6
";

    #[test]
    fn test_parse_mapping() {
        let m = parse_mapping("55d0c4a7e000-55d0c4d51000 r-xp 0007e000 fd:01 1234 /srv/app/test").unwrap();
        assert_eq!(m.start, 0x55d0_c4a7_e000);
        assert_eq!(m.end, 0x55d0_c4d5_1000);
        assert_eq!(m.offset, 0x7e000);
        assert!(m.is_executable());
        assert_eq!(m.path, "/srv/app/test");
    }

    #[test]
    fn test_parse_anonymous_mapping() {
        let m = parse_mapping("7f2a1c000000-7f2a1c021000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(m.path, "");
        assert!(!m.is_executable());
    }

    #[test]
    fn test_bias_for_pie() {
        let bias = compute_bias(PIE_MAPS, Path::new("/srv/app/test"), 0);
        assert_eq!(bias, LoadBias(0x55d0_c4a0_0000));
    }

    #[test]
    fn test_bias_for_non_pie_is_zero() {
        let maps = "00401000-00820000 r-xp 00001000 fd:01 42 /srv/app/test\n";
        let bias = compute_bias(maps, Path::new("/srv/app/test"), 0x40_0000);
        assert_eq!(bias, LoadBias(0));
    }

    #[test]
    fn test_bias_matches_by_basename() {
        let bias = compute_bias(PIE_MAPS, Path::new("test"), 0);
        assert_eq!(bias, LoadBias(0x55d0_c4a0_0000));
    }

    #[test]
    fn test_unparsable_maps_give_zero_bias() {
        assert_eq!(compute_bias("garbage\n\u{0}\u{1}zz-yy", Path::new("/srv/app/test"), 0), LoadBias(0));
        assert_eq!(compute_bias("", Path::new("/srv/app/test"), 0), LoadBias(0));
    }

    #[test]
    fn test_module_not_mapped_gives_zero_bias() {
        assert_eq!(compute_bias(PIE_MAPS, Path::new("/srv/other"), 0), LoadBias(0));
    }

    #[test]
    fn test_read_bias_missing_process() {
        assert_eq!(read_bias(Some(Pid(999_999_999)), Path::new("/srv/app/test"), 0), LoadBias(0));
    }
}
