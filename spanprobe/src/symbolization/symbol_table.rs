use log::{debug, info};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionIndex, Symbol, SymbolKind};
use rustc_demangle::demangle;
use std::fs;
use std::path::Path;

use super::LoadBias;
use crate::domain::TracerError;

/// One function: the half-open range `[start, end)` in link-time addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub start: u64,
    pub end: u64,
    pub name: String,
}

impl SymbolEntry {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Address → function name table built once from the target binary.
///
/// Entries are sorted by start address and never change after construction.
/// Ranges may nest (inlined or local symbols inside a sized parent); the
/// innermost one wins.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    /// `reach[i]` is the largest `end` among `entries[..=i]`
    reach: Vec<u64>,
    link_base: u64,
}

/// A text symbol as read from the object, before ranges are finalized
struct RawSymbol {
    start: u64,
    size: u64,
    name: String,
    section: Option<SectionIndex>,
}

impl SymbolTable {
    /// Parse the ELF symbol table of `binary_path`.
    ///
    /// # Errors
    /// Returns [`TracerError::Load`] if the file cannot be read or parsed, or
    /// if it defines no function symbols (stripped binary)
    pub fn load<P: AsRef<Path>>(binary_path: P) -> Result<Self, TracerError> {
        let path = binary_path.as_ref();
        let target = path.display().to_string();
        let data = fs::read(path).map_err(|e| TracerError::load(&target, e))?;
        let obj = object::File::parse(&*data).map_err(|e| TracerError::load(&target, e))?;

        let table = Self::from_object(&obj);
        if table.is_empty() {
            return Err(TracerError::load(target, "no function symbols (binary stripped?)"));
        }
        info!("Loaded {} function symbols from {}", table.len(), path.display());
        Ok(table)
    }

    /// Build a table from explicit `(start, end, name)` ranges.
    ///
    /// Ranges are sorted; an entry whose start duplicates an earlier one is dropped.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = SymbolEntry>, link_base: u64) -> Self {
        let mut entries: Vec<SymbolEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| e.start);
        entries.dedup_by_key(|e| e.start);
        Self::sorted(entries, link_base)
    }

    fn sorted(entries: Vec<SymbolEntry>, link_base: u64) -> Self {
        let reach = entries
            .iter()
            .scan(0u64, |max, e| {
                *max = (*max).max(e.end);
                Some(*max)
            })
            .collect();
        Self { entries, reach, link_base }
    }

    fn from_object(obj: &object::File<'_>) -> Self {
        let mut raw: Vec<RawSymbol> = function_symbols(obj)
            .into_iter()
            .filter_map(|s| {
                let name = s.name().ok()?;
                Some(RawSymbol {
                    start: s.address(),
                    size: s.size(),
                    name: format!("{:#}", demangle(name)),
                    section: s.section_index(),
                })
            })
            .collect();
        raw.sort_by_key(|s| s.start);
        raw.dedup_by_key(|s| s.start);

        let mut entries = Vec::with_capacity(raw.len());
        for (idx, sym) in raw.iter().enumerate() {
            let end = if sym.size > 0 {
                sym.start.saturating_add(sym.size)
            } else {
                // Unsized: runs to the next symbol or the end of its section
                let next = raw.get(idx + 1).map(|n| n.start);
                let section_end = sym
                    .section
                    .and_then(|i| obj.section_by_index(i).ok())
                    .map(|s| s.address().saturating_add(s.size()));
                match (next, section_end) {
                    (Some(n), Some(s)) => n.min(s),
                    (Some(n), None) => n,
                    (None, Some(s)) => s,
                    (None, None) => sym.start.saturating_add(1),
                }
            };
            if end > sym.start {
                entries.push(SymbolEntry { start: sym.start, end, name: sym.name.clone() });
            }
        }

        Self::sorted(entries, executable_link_base(obj))
    }

    /// `vaddr - file_offset` of the executable load segment (0 for typical PIE)
    #[must_use]
    pub fn link_base(&self) -> u64 {
        self.link_base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Function names in address order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Innermost entry whose range contains the link-time address `addr`
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&SymbolEntry> {
        let idx = self.entries.partition_point(|e| e.start <= addr);
        // Walk back from the nearest start; stop once no earlier range reaches `addr`
        (0..idx)
            .rev()
            .take_while(|&i| self.reach[i] > addr)
            .map(|i| &self.entries[i])
            .find(|e| e.contains(addr))
    }

    /// Resolve a runtime address to a function name. Total: misses yield
    /// `unknown@<hex>` of the raw address.
    #[must_use]
    pub fn resolve(&self, addr: u64, bias: LoadBias) -> String {
        let adjusted = addr.wrapping_sub(bias.0);
        match self.lookup(adjusted) {
            Some(entry) => entry.name.clone(),
            None => format!("unknown@{addr:x}"),
        }
    }
}

/// Defined, named text symbols of `.symtab`, or of `.dynsym` when `.symtab`
/// has none (stripped binary)
pub(crate) fn function_symbols<'data, 'file>(obj: &'file object::File<'data>) -> Vec<Symbol<'data, 'file>> {
    let symtab: Vec<_> = obj.symbols().filter(is_function).collect();
    if !symtab.is_empty() {
        return symtab;
    }
    debug!("No .symtab functions, falling back to .dynsym");
    obj.dynamic_symbols().filter(is_function).collect()
}

fn is_function(sym: &Symbol<'_, '_>) -> bool {
    sym.kind() == SymbolKind::Text
        && sym.is_definition()
        && sym.address() != 0
        && sym.name().is_ok_and(|n| !n.is_empty())
}

fn executable_link_base(obj: &object::File<'_>) -> u64 {
    obj.segments()
        .find(|seg| match seg.flags() {
            object::SegmentFlags::Elf { p_flags } => p_flags & object::elf::PF_X != 0,
            _ => false,
        })
        .map_or(0, |seg| seg.address().wrapping_sub(seg.file_range().0))
}
