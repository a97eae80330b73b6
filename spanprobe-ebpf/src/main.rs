//! # eBPF Kernel-Side Instrumentation
//!
//! Uprobe programs that turn function entry/exit in the target process into
//! span records.
//!
//! ## Programs
//!
//! - **Uprobe** `dispatch_entry` - request dispatch entered → `SpanStartRecord`
//! - **Uretprobe** `dispatch_exit` - request dispatch returned → `SpanEndRecord`
//! - **Uprobe** `func_entry` - any instrumented function entered (bookkeeping only)
//! - **Uretprobe** `func_exit` - matching return → `FuncEventRecord`
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer carrying all three record kinds
//! - `REQUEST_DESCRIPTORS` - Side channel: TID → request descriptor
//! - `CONFIG` - Runtime configuration (target TGID, descriptor argument)
//! - `FUNC_STARTS` / `CALL_DEPTH` - Per-thread call stack between entry and exit
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns, bpf_probe_read_user_str_bytes},
    macros::{map, uprobe, uretprobe},
    maps::{HashMap, RingBuf},
    programs::{ProbeContext, RetProbeContext},
};
use aya_log_ebpf::debug;
use spanprobe_common::{
    FuncEventRecord, PendingCall, RequestDescriptor, SpanEndRecord, SpanStartRecord,
    CONFIG_DESCRIPTOR_ARG, CONFIG_TARGET_TGID,
};

// ============================================================================
// Constants
// ============================================================================

/// Deepest instrumented call nesting tracked per thread. Deeper calls are
/// not recorded; their returns still unwind the counter correctly.
const MAX_CALL_DEPTH: u32 = 64;

// ============================================================================
// eBPF Maps
// ============================================================================

/// Ring buffer for span records (16MB, record kind implied by length)
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(16 * 1024 * 1024, 0);

/// Map: TID → request descriptor, read by userspace on span start and
/// deleted by userspace on span end
#[map]
static REQUEST_DESCRIPTORS: HashMap<u32, RequestDescriptor> = HashMap::with_max_entries(1024, 0);

/// Map: Config key → Config value (see `CONFIG_*` in spanprobe-common)
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(16, 0);

/// Map: (TID << 32 | depth) → pending call
#[map]
static FUNC_STARTS: HashMap<u64, PendingCall> = HashMap::with_max_entries(16384, 0);

/// Map: TID → number of instrumented frames currently open
#[map]
static CALL_DEPTH: HashMap<u32, u32> = HashMap::with_max_entries(4096, 0);

// ============================================================================
// Dispatch hooks
// ============================================================================

#[uprobe]
pub fn dispatch_entry(ctx: ProbeContext) -> u32 {
    match try_dispatch_entry(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dispatch_entry(ctx: &ProbeContext) -> Result<(), i64> {
    let Some(tid) = current_tid() else {
        return Ok(());
    };

    // Descriptor goes in first so userspace usually finds it on span start
    capture_descriptor(ctx, tid);

    let record = SpanStartRecord { tid, timestamp_ns: unsafe { bpf_ktime_get_ns() } };
    EVENTS.output(&record, 0).map_err(|_| 1i64)
}

fn capture_descriptor(ctx: &ProbeContext, tid: u32) {
    let arg = unsafe { CONFIG.get(&CONFIG_DESCRIPTOR_ARG).copied().unwrap_or(0) };
    if arg == 0 {
        return;
    }
    let Some(ptr) = ctx.arg::<u64>((arg - 1) as usize) else {
        return;
    };
    if ptr == 0 {
        return;
    }

    // Read straight into map storage: a 256-byte buffer is too much stack.
    if REQUEST_DESCRIPTORS.insert(&tid, &RequestDescriptor::empty(), 0).is_err() {
        return;
    }
    if let Some(slot) = REQUEST_DESCRIPTORS.get_ptr_mut(&tid) {
        let dest = unsafe { &mut (*slot).bytes };
        if unsafe { bpf_probe_read_user_str_bytes(ptr as *const u8, dest) }.is_err() {
            debug!(ctx, "descriptor read failed for tid {}", tid);
            let _ = REQUEST_DESCRIPTORS.remove(&tid);
        }
    }
}

#[uretprobe]
pub fn dispatch_exit(_ctx: RetProbeContext) -> u32 {
    match try_dispatch_exit() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dispatch_exit() -> Result<(), i64> {
    let Some(tid) = current_tid() else {
        return Ok(());
    };
    EVENTS.output(&SpanEndRecord { tid }, 0).map_err(|_| 1i64)
}

// ============================================================================
// Generic function hooks
// ============================================================================

#[uprobe]
pub fn func_entry(ctx: ProbeContext) -> u32 {
    match try_func_entry(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_func_entry(ctx: &ProbeContext) -> Result<(), i64> {
    let Some(tid) = current_tid() else {
        return Ok(());
    };

    let depth = unsafe { CALL_DEPTH.get(&tid).copied().unwrap_or(0) };
    if depth < MAX_CALL_DEPTH {
        let call = PendingCall { start_ns: unsafe { bpf_ktime_get_ns() }, func_addr: probed_address(ctx) };
        FUNC_STARTS.insert(&frame_key(tid, depth), &call, 0)?;
    }
    CALL_DEPTH.insert(&tid, &(depth + 1), 0)?;
    Ok(())
}

#[uretprobe]
pub fn func_exit(_ctx: RetProbeContext) -> u32 {
    match try_func_exit() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_func_exit() -> Result<(), i64> {
    let Some(tid) = current_tid() else {
        return Ok(());
    };

    let depth = unsafe { CALL_DEPTH.get(&tid).copied().unwrap_or(0) };
    if depth == 0 {
        // Entered before the probes were attached
        return Ok(());
    }
    let depth = depth - 1;
    if depth == 0 {
        CALL_DEPTH.remove(&tid)?;
    } else {
        CALL_DEPTH.insert(&tid, &depth, 0)?;
    }

    let key = frame_key(tid, depth);
    let Some(call) = (unsafe { FUNC_STARTS.get(&key).copied() }) else {
        return Ok(());
    };
    let _ = FUNC_STARTS.remove(&key);

    let record = FuncEventRecord {
        tid,
        start_ns: call.start_ns,
        end_ns: unsafe { bpf_ktime_get_ns() },
        func_addr: call.func_addr,
        _reserved: [0u8; 4],
    };
    EVENTS.output(&record, 0).map_err(|_| 1i64)
}

// ============================================================================
// Helpers
// ============================================================================

/// Current TID, or `None` when a TGID filter is configured and does not match
fn current_tid() -> Option<u32> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let tgid = (pid_tgid >> 32) as u32;
    let target = unsafe { CONFIG.get(&CONFIG_TARGET_TGID).map(|v| *v as u32).unwrap_or(0) };
    if target != 0 && tgid != target {
        return None;
    }
    Some(pid_tgid as u32)
}

fn frame_key(tid: u32, depth: u32) -> u64 {
    (u64::from(tid) << 32) | u64::from(depth)
}

/// Instruction pointer at the uprobe, i.e. the probed function's address
#[cfg(bpf_target_arch = "x86_64")]
fn probed_address(ctx: &ProbeContext) -> u64 {
    unsafe { (*ctx.regs).rip }
}

#[cfg(bpf_target_arch = "aarch64")]
fn probed_address(ctx: &ProbeContext) -> u64 {
    unsafe { (*ctx.regs).pc }
}

// Without the probed address every function event is unattributable
#[cfg(not(any(bpf_target_arch = "x86_64", bpf_target_arch = "aarch64")))]
compile_error!("spanprobe-ebpf supports bpf_target_arch x86_64 and aarch64 only (see build.rs)");

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
