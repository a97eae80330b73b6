//! # Symbol Resolution and Address Translation
//!
//! Converts the runtime code addresses reported by the function probes into
//! function names.
//!
//! ## The Problem
//!
//! The entry uprobe records the address it fired at, e.g. `0x55d0c4b12340`.
//! The target's ELF symbol table describes functions at **link-time**
//! addresses (`main.getUserByID` at `0x112340`, size `0x1a0`). The two differ
//! by the module's **load bias**.
//!
//! ```text
//! runtime address = link-time address + bias
//! bias            = mapping start - mapping file offset - (segment vaddr - segment offset)
//! ```
//!
//! For a non-PIE executable the executable segment is mapped at its link-time
//! address and the bias is zero. For a PIE executable under ASLR it is the
//! randomized base.
//!
//! ## Flow
//!
//! ```text
//! 1. SymbolTable::load(binary)      .symtab (or .dynsym) → sorted [start, end) ranges
//! 2. read_bias(pid, binary, base)   /proc/<pid>/maps → LoadBias (0 on any failure)
//! 3. table.resolve(addr, bias)      containment lookup → name | "unknown@<hex>"
//! ```
//!
//! Both the table and the bias are computed once at startup and never mutated.
//!
//! ## Limitations
//!
//! - Stripped binaries have no function symbols and are rejected at load time
//! - Without `--pid` the bias comes from this process's own maps, which only
//!   helps when the target is not relocated
//! - Uprobes attached without a PID fire in every process running the binary;
//!   each such process may have a different bias

pub mod memory_maps;
pub mod symbol_table;

pub use memory_maps::{compute_bias, parse_mapping, read_bias, LoadBias};
pub use symbol_table::{SymbolEntry, SymbolTable};
