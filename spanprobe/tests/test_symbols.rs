//! Symbol table, load bias and enumeration against a real binary (this test)

use regex::Regex;
use spanprobe::probes::{discover_targets, ElfSymbolEnumerator, SymbolEnumerator};
use spanprobe::symbolization::{read_bias, SymbolTable};

#[inline(never)]
fn marker_function_for_symbol_test() -> u64 {
    std::hint::black_box(42)
}

#[test]
fn test_loads_spanprobe_binary() {
    let table = SymbolTable::load(env!("CARGO_BIN_EXE_spanprobe")).unwrap();
    assert!(!table.is_empty());
    assert!(table.names().any(|n| n == "main"));
}

#[test]
fn test_resolves_live_function_address() {
    assert_eq!(marker_function_for_symbol_test(), 42);

    let exe = std::env::current_exe().unwrap();
    let table = SymbolTable::load(&exe).unwrap();
    let bias = read_bias(None, &exe, table.link_base());

    let addr = marker_function_for_symbol_test as *const () as usize as u64;
    let name = table.resolve(addr, bias);
    assert!(name.ends_with("marker_function_for_symbol_test"), "resolved to {name}");
}

#[test]
fn test_elf_enumerator_returns_raw_names() {
    let exe = std::env::current_exe().unwrap();
    let filter = Regex::new("marker_function_for_symbol_test").unwrap();
    let targets = discover_targets(&ElfSymbolEnumerator, &exe, &filter).unwrap();
    assert_eq!(targets.len(), 1);

    let name = targets.iter().next().unwrap();
    let all = ElfSymbolEnumerator.enumerate(&exe).unwrap();
    assert!(all.contains(name));
}
