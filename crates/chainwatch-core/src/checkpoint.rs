//! Checkpoints: persisted scan progress for crash recovery.
//!
//! After every iteration the dispatcher stores its next position
//! `(block_number, tx_index)`. On restart it resumes at the transaction
//! following the stored index (see [`ScanCursor::resume`]).
//!
//! [`ScanCursor::resume`]: crate::cursor::ScanCursor::resume

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// A persisted scan position for one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_number: u64,
    pub tx_index: u32,
}

impl Checkpoint {
    pub fn new(block_number: u64, tx_index: u32) -> Self {
        Self {
            block_number,
            tx_index,
        }
    }
}

/// Trait for storing and loading checkpoints, keyed by network id.
///
/// A store may be shared by the dispatchers of several networks, so
/// implementations must tolerate concurrent calls for distinct keys.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of `network`.
    ///
    /// `Ok(None)` means no checkpoint was ever saved; unparsable data must be
    /// reported as [`ScanError::MalformedCheckpoint`].
    async fn load(&self, network: &str) -> Result<Option<Checkpoint>, ScanError>;

    /// Save (upsert) a checkpoint. Must be durable before returning.
    async fn save(&self, network: &str, checkpoint: Checkpoint) -> Result<(), ScanError>;

    /// Delete the checkpoint of `network` (e.g. when resetting a scanner).
    async fn delete(&self, network: &str) -> Result<(), ScanError>;
}

/// Binds a shared store to one network.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    network: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, network: impl Into<String>) -> Self {
        Self {
            store,
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Load the saved checkpoint (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<Checkpoint>, ScanError> {
        self.store.load(&self.network).await
    }

    pub async fn save(&self, checkpoint: Checkpoint) -> Result<(), ScanError> {
        self.store.save(&self.network, checkpoint).await
    }

    pub async fn reset(&self) -> Result<(), ScanError> {
        self.store.delete(&self.network).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral scanners.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an existing checkpoint.
    pub fn with_checkpoint(network: impl Into<String>, checkpoint: Checkpoint) -> Self {
        let store = Self::default();
        if let Ok(mut data) = store.data.lock() {
            data.insert(network.into(), checkpoint);
        }
        store
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, ScanError> {
        self.data
            .lock()
            .map_err(|_| ScanError::Storage("checkpoint map poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, network: &str) -> Result<Option<Checkpoint>, ScanError> {
        Ok(self.lock()?.get(network).copied())
    }

    async fn save(&self, network: &str, checkpoint: Checkpoint) -> Result<(), ScanError> {
        self.lock()?.insert(network.to_string(), checkpoint);
        Ok(())
    }

    async fn delete(&self, network: &str) -> Result<(), ScanError> {
        self.lock()?.remove(network);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let mgr = CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()), "mainnet");

        // No checkpoint initially
        assert!(mgr.load().await.unwrap().is_none());

        mgr.save(Checkpoint::new(1000, 4)).await.unwrap();
        assert_eq!(mgr.load().await.unwrap(), Some(Checkpoint::new(1000, 4)));

        mgr.reset().await.unwrap();
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn networks_are_isolated() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let a = CheckpointManager::new(store.clone(), "mainnet");
        let b = CheckpointManager::new(store, "goerli");

        a.save(Checkpoint::new(10, 0)).await.unwrap();
        assert!(b.load().await.unwrap().is_none());
        assert_eq!(a.network(), "mainnet");
    }
}
