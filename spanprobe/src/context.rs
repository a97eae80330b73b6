//! Startup-computed, read-only state shared by the reconstructor
//!
//! Everything here is built once before the first event is consumed and never
//! mutated afterwards.

use chrono::{DateTime, TimeDelta, Utc};
use log::warn;
use std::fs;

use crate::domain::{Address, KernelTime};
use crate::symbolization::{LoadBias, SymbolTable};

/// Symbol table, load bias and boot-time reference for one tracing session
#[derive(Debug, Clone)]
pub struct TraceContext {
    symbols: SymbolTable,
    bias: LoadBias,
    boot_time: DateTime<Utc>,
}

impl TraceContext {
    #[must_use]
    pub fn new(symbols: SymbolTable, bias: LoadBias, boot_time: DateTime<Utc>) -> Self {
        Self { symbols, bias, boot_time }
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    #[must_use]
    pub fn bias(&self) -> LoadBias {
        self.bias
    }

    /// Function name for a probed runtime address (never fails)
    #[must_use]
    pub fn resolve(&self, addr: Address) -> String {
        self.symbols.resolve(addr.0, self.bias)
    }

    /// Convert a `bpf_ktime_get_ns()` reading to wall-clock time
    #[must_use]
    pub fn wall_clock(&self, t: KernelTime) -> DateTime<Utc> {
        let offset = TimeDelta::nanoseconds(i64::try_from(t.0).unwrap_or(i64::MAX));
        self.boot_time.checked_add_signed(offset).unwrap_or(self.boot_time)
    }
}

/// Wall-clock time of boot, derived from `/proc/uptime`.
///
/// Falls back to the UNIX epoch (timestamps then read as time since boot).
#[must_use]
pub fn boot_time() -> DateTime<Utc> {
    let now = Utc::now();
    match fs::read_to_string("/proc/uptime").ok().as_deref().and_then(parse_uptime) {
        Some(uptime) => now - uptime,
        None => {
            warn!("Could not read /proc/uptime; span timestamps are relative to boot");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

/// First field of `/proc/uptime` ("12345.67 54321.00")
fn parse_uptime(content: &str) -> Option<TimeDelta> {
    let secs: f64 = content.split_whitespace().next()?.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    TimeDelta::from_std(std::time::Duration::from_secs_f64(secs)).ok()
}
