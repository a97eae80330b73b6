use anyhow::{bail, Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the kernel programs (always release)
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
    },
    /// Build the kernel programs, then the spanprobe binary that embeds them
    Build {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    match Args::parse().command {
        Cmd::BuildEbpf { target } => build_ebpf(&target),
        Cmd::Build { target, release } => {
            build_ebpf(&target)?;
            build_userspace(release)
        }
    }
}

fn build_ebpf(target: &str) -> Result<()> {
    // Debug builds pull in formatting code (LowerHex) the BPF linker rejects
    let status = Command::new("cargo")
        .args(["+nightly", "build", "--package", "spanprobe-ebpf", "--target", target])
        .args(["-Z", "build-std=core", "--release"])
        .status()
        .context("Failed to build eBPF program")?;

    if !status.success() {
        bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built: target/{target}/release/spanprobe");
    Ok(())
}

fn build_userspace(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "--package", "spanprobe"]);
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to build spanprobe")?;
    if !status.success() {
        bail!("Failed to build spanprobe");
    }

    let profile = if release { "release" } else { "debug" };
    println!("✓ spanprobe built: target/{profile}/spanprobe");
    Ok(())
}
