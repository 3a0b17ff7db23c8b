//! Snapshot persistence for the accounting store
//!
//! The store itself never touches durable storage directly; it calls an
//! injected [`SnapshotStore`]. The JSON-file implementation is what the CLI
//! wires in; the in-memory one backs tests and ephemeral runs.

use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

use super::AccountingSnapshot;
use crate::Result;

/// Load/save contract for the accounting snapshot
pub trait SnapshotStore: Send + Sync {
    /// Load the persisted snapshot, if one exists and parses.
    fn load(&self) -> Option<AccountingSnapshot>;

    /// Persist the snapshot. Called after every mutating accounting write.
    fn save(&self, snapshot: &AccountingSnapshot) -> Result<()>;
}

/// Snapshot persisted as a flat JSON file
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Option<AccountingSnapshot> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // A stale or hand-edited file must not take the process down
                warn!("Ignoring unreadable accounting snapshot: {}", e);
                None
            }
        }
    }

    fn save(&self, snapshot: &AccountingSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Snapshot kept only in memory
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<AccountingSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Option<AccountingSnapshot> {
        self.slot.lock().unwrap().clone()
    }

    fn save(&self, snapshot: &AccountingSnapshot) -> Result<()> {
        *self.slot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}
