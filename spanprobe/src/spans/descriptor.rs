//! Side channel: request descriptors written by the kernel side, keyed by TID

use aya::maps::{HashMap as BpfHashMap, MapData, MapError};
use log::debug;
use spanprobe_common::RequestDescriptor;
use std::collections::HashMap;

use crate::domain::Tid;

/// Source of per-thread request descriptors.
///
/// Read once when a span starts, removed when it ends.
pub trait DescriptorStore {
    fn lookup(&self, tid: Tid) -> Option<String>;
    fn remove(&mut self, tid: Tid);
}

/// The `REQUEST_DESCRIPTORS` eBPF hash map
pub struct EbpfDescriptorStore {
    map: BpfHashMap<MapData, u32, RequestDescriptor>,
}

impl EbpfDescriptorStore {
    #[must_use]
    pub fn new(map: BpfHashMap<MapData, u32, RequestDescriptor>) -> Self {
        Self { map }
    }
}

impl DescriptorStore for EbpfDescriptorStore {
    fn lookup(&self, tid: Tid) -> Option<String> {
        let descriptor = self.map.get(&tid.0, 0).ok()?;
        Some(String::from_utf8_lossy(descriptor.text()).into_owned())
    }

    fn remove(&mut self, tid: Tid) {
        match self.map.remove(&tid.0) {
            Ok(()) | Err(MapError::KeyNotFound) => {}
            Err(e) => debug!("Failed to clear descriptor for {tid}: {e}"),
        }
    }
}

/// In-process store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryDescriptorStore {
    entries: HashMap<Tid, String>,
}

impl MemoryDescriptorStore {
    pub fn insert(&mut self, tid: Tid, descriptor: impl Into<String>) {
        self.entries.insert(tid, descriptor.into());
    }

    #[must_use]
    pub fn contains(&self, tid: Tid) -> bool {
        self.entries.contains_key(&tid)
    }
}

impl DescriptorStore for MemoryDescriptorStore {
    fn lookup(&self, tid: Tid) -> Option<String> {
        self.entries.get(&tid).cloned()
    }

    fn remove(&mut self, tid: Tid) {
        self.entries.remove(&tid);
    }
}
