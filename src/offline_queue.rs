//! Durable queue of sales that could not be confirmed written remotely.
//!
//! The whole queue is persisted as one JSON array under a single key of a
//! [`KeyValueStore`]. Every mutation re-reads the persisted list, applies
//! the change and writes the full list back; nothing is cached in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::models::QueueEntry;

/// Storage key holding the serialized queue.
pub const QUEUE_KEY: &str = "shopfront.offline_sales";
/// Raw copy of an unparseable queue blob, kept for support before it is
/// overwritten by the next mutation.
pub const QUARANTINE_KEY: &str = "shopfront.offline_sales.corrupt";

/// Local durable key-value persistence (survives restarts).
///
/// `get` must not fail: missing or unreadable values are `None`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// Non-durable [`KeyValueStore`] for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.values
            .lock()
            .map_err(|e| e.to_string())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        self.values.lock().map_err(|e| e.to_string())?.remove(key);
        Ok(())
    }
}

/// Result of reading the persisted queue.
enum Snapshot {
    Entries(Vec<QueueEntry>),
    Corrupt { raw: String },
}

pub struct OfflineQueue {
    store: Box<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles between checkout and sync.
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Snapshot {
        let raw = match self.store.get(QUEUE_KEY) {
            Some(raw) => raw,
            None => return Snapshot::Entries(Vec::new()),
        };
        if raw.trim().is_empty() {
            return Snapshot::Entries(Vec::new());
        }
        match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
            Ok(entries) => Snapshot::Entries(entries),
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Offline queue data is corrupt; treating as empty");
                Snapshot::Corrupt { raw }
            }
        }
    }

    /// Current entries for a mutation; a corrupt blob is quarantined first.
    fn read_for_update(&self) -> Result<Vec<QueueEntry>, QueueError> {
        match self.read() {
            Snapshot::Entries(entries) => Ok(entries),
            Snapshot::Corrupt { raw } => {
                self.store
                    .set(QUARANTINE_KEY, &raw)
                    .map_err(QueueError::Storage)?;
                error!("Quarantined corrupt offline queue blob under {QUARANTINE_KEY}");
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        let json = serde_json::to_string(entries)?;
        self.store.set(QUEUE_KEY, &json).map_err(QueueError::Storage)
    }

    /// Append an entry. Entries sharing a `local_id` are not deduplicated.
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let mut entries = self.read_for_update()?;
        let local_id = entry.local_id.clone();
        entries.push(entry);
        self.write(&entries)?;
        info!(local_id = %local_id, pending = entries.len(), "Sale queued offline");
        Ok(())
    }

    /// All pending entries in insertion order. Corrupt data yields an empty
    /// list.
    pub fn list(&self) -> Vec<QueueEntry> {
        match self.read() {
            Snapshot::Entries(entries) => entries,
            Snapshot::Corrupt { .. } => Vec::new(),
        }
    }

    /// Delete the first entry with `local_id`. Unknown ids are a no-op.
    pub fn remove(&self, local_id: &str) -> Result<(), QueueError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let mut entries = self.read_for_update()?;
        let Some(pos) = entries.iter().position(|e| e.local_id == local_id) else {
            debug!(local_id, "Offline queue remove: no such entry");
            return Ok(());
        };
        entries.remove(pos);
        self.write(&entries)?;
        debug!(local_id, remaining = entries.len(), "Removed synced entry from offline queue");
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
