use crate::storage::{CrawlSnapshot, StateStore, StorageResult};
use std::sync::{Arc, Mutex};

/// In-memory snapshot store
///
/// Clones share the same slot, so a caller can keep a handle and inspect what
/// the frontier persisted and how often.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    snapshot: Option<CrawlSnapshot>,
    saves: usize,
}

impl MemoryStateStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a snapshot
    pub fn with_snapshot(snapshot: CrawlSnapshot) -> Self {
        let store = Self::new();
        if let Ok(mut slot) = store.inner.lock() {
            slot.snapshot = Some(snapshot);
        }
        store
    }

    /// Number of saves performed so far
    pub fn saves(&self) -> usize {
        self.inner.lock().map(|slot| slot.saves).unwrap_or_default()
    }

    /// The last saved snapshot
    pub fn snapshot(&self) -> Option<CrawlSnapshot> {
        self.inner.lock().ok().and_then(|slot| slot.snapshot.clone())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StorageResult<Option<CrawlSnapshot>> {
        Ok(self.snapshot())
    }

    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()> {
        if let Ok(mut slot) = self.inner.lock() {
            slot.snapshot = Some(snapshot.clone());
            slot.saves += 1;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
