use log::{debug, info, warn};
use std::fmt;

use crate::domain::TracerError;

/// The four kernel programs a probe can bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    FunctionEntry,
    FunctionExit,
    DispatchEntry,
    DispatchExit,
}

impl ProbeKind {
    pub const ALL: [Self; 4] = [Self::FunctionEntry, Self::FunctionExit, Self::DispatchEntry, Self::DispatchExit];

    /// Name of the program in the eBPF object
    #[must_use]
    pub const fn program_name(self) -> &'static str {
        match self {
            Self::FunctionEntry => "func_entry",
            Self::FunctionExit => "func_exit",
            Self::DispatchEntry => "dispatch_entry",
            Self::DispatchExit => "dispatch_exit",
        }
    }

    #[must_use]
    pub const fn is_return_probe(self) -> bool {
        matches!(self, Self::FunctionExit | Self::DispatchExit)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let probe = if self.is_return_probe() { "uretprobe" } else { "uprobe" };
        write!(f, "{probe}/{}", self.program_name())
    }
}

/// Kernel attach mechanism behind the manager
pub trait ProbeBackend {
    type Link;

    /// # Errors
    /// Returns [`TracerError::Attach`] when the probe cannot be bound
    fn attach(&mut self, kind: ProbeKind, symbol: &str) -> Result<Self::Link, TracerError>;

    /// # Errors
    /// Returns [`TracerError::Attach`] when the link cannot be released
    fn detach(&mut self, kind: ProbeKind, link: Self::Link) -> Result<(), TracerError>;
}

/// Identifies one attached probe for the lifetime of its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(u64);

struct ProbeHandle<L> {
    id: ProbeId,
    kind: ProbeKind,
    symbol: String,
    link: L,
}

/// Sole owner of every attached probe.
///
/// Handles are released by [`ProbeManager::release_all`], which also runs on
/// drop, so no exit path leaks a probe.
pub struct ProbeManager<B: ProbeBackend> {
    backend: B,
    handles: Vec<ProbeHandle<B::Link>>,
    next_id: u64,
}

impl<B: ProbeBackend> ProbeManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, handles: Vec::new(), next_id: 0 }
    }

    /// Bind an entry/exit pair to each target. Returns how many pairs attached.
    ///
    /// Individual failures are logged and skipped. A target whose exit probe
    /// fails keeps no entry probe either.
    pub fn attach_all<I, T>(&mut self, targets: I) -> usize
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut attached = 0;
        let mut failed = 0;

        for target in targets {
            let symbol = target.as_ref();
            let entry = match self.bind(ProbeKind::FunctionEntry, symbol) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping {symbol}: {e}");
                    failed += 1;
                    continue;
                }
            };

            if let Err(e) = self.bind(ProbeKind::FunctionExit, symbol) {
                warn!("Skipping {symbol}: {e}");
                self.release(entry);
                failed += 1;
                continue;
            }

            debug!("Attached entry/exit probes to {symbol}");
            attached += 1;
        }

        if attached == 0 {
            warn!("No function probes attached ({failed} failed); spans will have no events");
        } else {
            info!("Attached {attached} function probe pairs ({failed} failed)");
        }
        attached
    }

    /// Bind the span-opening probe on the dispatch function.
    ///
    /// # Errors
    /// Returns [`TracerError::Attach`]; the caller treats it as fatal
    pub fn attach_dispatch_entry(&mut self, symbol: &str) -> Result<ProbeId, TracerError> {
        let id = self.bind(ProbeKind::DispatchEntry, symbol)?;
        info!("Attached dispatch entry probe to {symbol}");
        Ok(id)
    }

    /// Bind the span-closing return probe on the dispatch function.
    ///
    /// # Errors
    /// Returns [`TracerError::Attach`]; the caller treats it as fatal
    pub fn attach_dispatch_exit(&mut self, symbol: &str) -> Result<ProbeId, TracerError> {
        let id = self.bind(ProbeKind::DispatchExit, symbol)?;
        info!("Attached dispatch exit probe to {symbol}");
        Ok(id)
    }

    /// Detach every probe. Safe to call more than once.
    pub fn release_all(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for handle in handles {
            self.detach(handle);
        }
        info!("Released {count} probes");
    }

    /// Number of probes currently attached
    #[must_use]
    pub fn attached(&self) -> usize {
        self.handles.len()
    }

    /// Symbols carrying a probe of `kind`
    pub fn symbols(&self, kind: ProbeKind) -> impl Iterator<Item = &str> {
        self.handles.iter().filter(move |h| h.kind == kind).map(|h| h.symbol.as_str())
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn bind(&mut self, kind: ProbeKind, symbol: &str) -> Result<ProbeId, TracerError> {
        let link = self.backend.attach(kind, symbol)?;
        let id = ProbeId(self.next_id);
        self.next_id += 1;
        self.handles.push(ProbeHandle { id, kind, symbol: symbol.to_string(), link });
        Ok(id)
    }

    fn release(&mut self, id: ProbeId) {
        if let Some(pos) = self.handles.iter().position(|h| h.id == id) {
            let handle = self.handles.swap_remove(pos);
            self.detach(handle);
        }
    }

    fn detach(&mut self, handle: ProbeHandle<B::Link>) {
        if let Err(e) = self.backend.detach(handle.kind, handle.link) {
            warn!("Failed to release {} on {}: {e}", handle.kind, handle.symbol);
        }
    }
}

impl<B: ProbeBackend> Drop for ProbeManager<B> {
    fn drop(&mut self) {
        self.release_all();
    }
}
