//! # eBPF Program Loading and Map Setup
//!
//! - [`remove_memlock()`] - lift `RLIMIT_MEMLOCK` before any map is created
//! - [`load_ebpf_program()`] - load the embedded bytecode
//! - [`init_ebpf_logger()`] - forward `aya-log` messages to `log`
//! - [`write_config()`] - fill the `CONFIG` map read by every program
//! - [`take_event_stream()`] / [`take_descriptor_store()`] - move the maps
//!   user space reads out of the [`Ebpf`] handle
//!
//! Programs are loaded and attached later by
//! [`EbpfBackend`](crate::probes::EbpfBackend).

use anyhow::{Context, Result};
use aya::{
    include_bytes_aligned,
    maps::{HashMap, MapData, RingBuf},
    Ebpf,
};
use aya_log::EbpfLogger;
use log::{info, warn};
use spanprobe_common::{RequestDescriptor, CONFIG_DESCRIPTOR_ARG, CONFIG_TARGET_TGID};

use crate::domain::{Pid, TracerError};
use crate::spans::EbpfDescriptorStore;

/// Load the eBPF program binary
///
/// Always the release build: debug builds pull in formatting code the BPF
/// verifier rejects.
///
/// # Errors
/// Returns [`TracerError::Load`] if the object cannot be loaded
pub fn load_ebpf_program() -> Result<Ebpf, TracerError> {
    Ebpf::load(include_bytes_aligned!("../../../target/bpfel-unknown-none/release/spanprobe"))
        .map_err(|e| TracerError::load("eBPF object", e))
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Raise the locked-memory limit to infinity (needed on kernels < 5.11)
///
/// # Errors
/// Returns [`TracerError::Privilege`] if the limit cannot be raised
pub fn remove_memlock() -> Result<(), TracerError> {
    let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    // SAFETY: setrlimit only reads the struct we pass by reference
    #[allow(unsafe_code)]
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(TracerError::Privilege(format!(
            "failed to remove memlock limit: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Write the runtime configuration read by the kernel programs
///
/// # Errors
/// Returns an error if the `CONFIG` map is missing or an insert fails
#[allow(clippy::cast_sign_loss)]
pub fn write_config(bpf: &mut Ebpf, pid: Option<Pid>, descriptor_arg: Option<u8>) -> Result<()> {
    let mut config: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut("CONFIG").context("CONFIG map not found")?)?;

    if let Some(pid) = pid {
        config.insert(CONFIG_TARGET_TGID, pid.0 as u64, 0)?;
        info!("Probes restricted to PID {}", pid.0);
    }
    if let Some(arg) = descriptor_arg {
        config.insert(CONFIG_DESCRIPTOR_ARG, u64::from(arg) + 1, 0)?;
        info!("Capturing request descriptor from argument {arg}");
    }
    Ok(())
}

/// Take the `EVENTS` ring buffer
///
/// # Errors
/// Returns an error if the map is missing or has the wrong type
pub fn take_event_stream(bpf: &mut Ebpf) -> Result<RingBuf<MapData>> {
    let map = bpf.take_map("EVENTS").context("EVENTS map not found")?;
    RingBuf::try_from(map).context("EVENTS is not a ring buffer")
}

/// Take the `REQUEST_DESCRIPTORS` side-channel map
///
/// # Errors
/// Returns an error if the map is missing or has the wrong type
pub fn take_descriptor_store(bpf: &mut Ebpf) -> Result<EbpfDescriptorStore> {
    let map = bpf.take_map("REQUEST_DESCRIPTORS").context("REQUEST_DESCRIPTORS map not found")?;
    let map: HashMap<MapData, u32, RequestDescriptor> =
        HashMap::try_from(map).context("REQUEST_DESCRIPTORS has an unexpected layout")?;
    Ok(EbpfDescriptorStore::new(map))
}
