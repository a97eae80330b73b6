//! aya-backed [`ProbeBackend`]

use aya::programs::uprobe::UProbeLinkId;
use aya::programs::UProbe;
use aya::Ebpf;
use log::debug;
use std::path::{Path, PathBuf};

use super::{ProbeBackend, ProbeKind};
use crate::domain::{Pid, TracerError};

/// Attaches the loaded span programs to symbols of one binary
pub struct EbpfBackend {
    bpf: Ebpf,
    binary: PathBuf,
    pid: Option<Pid>,
}

impl EbpfBackend {
    /// Load all four programs into the kernel.
    ///
    /// Maps needed in user space must be taken out of `bpf` before this call.
    ///
    /// # Errors
    /// Returns [`TracerError::Load`] if a program is missing or rejected by the verifier
    pub fn new(mut bpf: Ebpf, binary: impl Into<PathBuf>, pid: Option<Pid>) -> Result<Self, TracerError> {
        for kind in ProbeKind::ALL {
            let program = uprobe_program(&mut bpf, kind)?;
            program.load().map_err(|e| TracerError::load(kind.program_name(), e))?;
            debug!("Loaded {kind}");
        }
        Ok(Self { bpf, binary: binary.into(), pid })
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl ProbeBackend for EbpfBackend {
    type Link = UProbeLinkId;

    fn attach(&mut self, kind: ProbeKind, symbol: &str) -> Result<UProbeLinkId, TracerError> {
        let attach_error = |error: String| TracerError::Attach {
            probe: kind.to_string(),
            symbol: symbol.to_string(),
            error,
        };
        let program = uprobe_program(&mut self.bpf, kind).map_err(|e| attach_error(e.to_string()))?;
        program
            .attach(Some(symbol), 0, &self.binary, self.pid.map(|p| p.0))
            .map_err(|e| attach_error(e.to_string()))
    }

    fn detach(&mut self, kind: ProbeKind, link: UProbeLinkId) -> Result<(), TracerError> {
        let detach_error = |error: String| TracerError::Attach {
            probe: kind.to_string(),
            symbol: self.binary.display().to_string(),
            error,
        };
        let program = uprobe_program(&mut self.bpf, kind).map_err(|e| detach_error(e.to_string()))?;
        program.detach(link).map_err(|e| detach_error(e.to_string()))
    }
}

fn uprobe_program(bpf: &mut Ebpf, kind: ProbeKind) -> Result<&mut UProbe, TracerError> {
    let name = kind.program_name();
    bpf.program_mut(name)
        .ok_or_else(|| TracerError::load(name, "program not found in eBPF object"))?
        .try_into()
        .map_err(|e| TracerError::load(name, e))
}
