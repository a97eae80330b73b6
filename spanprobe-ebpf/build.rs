use std::env;

/// `bpf_target_arch` selects the register layout used to read the probed
/// address. aya-ebpf emits the same cfg, but only for its own package.
fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_CFG_BPF_TARGET_ARCH");
    let arch = env::var("CARGO_CFG_BPF_TARGET_ARCH").unwrap_or_else(|_| host_arch());
    println!("cargo:rustc-cfg=bpf_target_arch=\"{arch}\"");
    println!(
        "cargo::rustc-check-cfg=cfg(bpf_target_arch, values(\"x86_64\",\"arm\",\"aarch64\",\"riscv64\",\"powerpc64\",\"s390x\"))"
    );
}

/// Architecture part of the `HOST` triple (`x86_64-unknown-linux-gnu` → `x86_64`)
fn host_arch() -> String {
    let host = env::var("HOST").unwrap_or_default();
    host.split_once('-').map_or(host.as_str(), |(arch, _)| arch).to_string()
}
