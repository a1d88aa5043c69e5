//! Shared state for in-process channel media.
//!
//! The registry is owned by the `ExecutionContext`. Two channels created with
//! the same key against the same registry are two ends of the same link;
//! channels created against different registries never see each other.

use crate::transport::fabric::FabricStream;
use crate::transport::memory::MemoryLink;
use crate::transport::shmem::Segment;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    memory: Mutex<HashMap<String, MemoryLink>>,
    segments: Mutex<HashMap<String, Arc<Segment>>>,
    fabric: Mutex<HashMap<String, Arc<FabricStream>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link for `key`, created with `capacity` on first use.
    pub(crate) fn memory_link(&self, key: &str, capacity: usize) -> MemoryLink {
        lock(&self.memory)
            .entry(key.to_string())
            .or_insert_with(|| MemoryLink::new(capacity))
            .clone()
    }

    /// Segment for `key`, created with `capacity` bytes on first use.
    pub(crate) fn segment(&self, key: &str, capacity: usize) -> Arc<Segment> {
        lock(&self.segments)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Segment::new(capacity)))
            .clone()
    }

    pub(crate) fn fabric_stream(&self, key: &str) -> Arc<FabricStream> {
        lock(&self.fabric)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FabricStream::new()))
            .clone()
    }

    /// Number of registered links across all media.
    pub fn len(&self) -> usize {
        lock(&self.memory).len() + lock(&self.segments).len() + lock(&self.fabric).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every link. Channels already holding a link keep it.
    pub fn clear(&self) {
        lock(&self.memory).clear();
        lock(&self.segments).clear();
        lock(&self.fabric).clear();
    }
}
