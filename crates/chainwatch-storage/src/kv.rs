//! Flat `key=value` file store.
//!
//! One entry per line; blank lines and lines starting with `#` are ignored.
//! Checkpoints are kept under `<network>.lastBlock` and
//! `<network>.lastTxIndex`, so several networks can share one file:
//!
//! ```text
//! # chainwatch state
//! mainnet.lastBlock=19000000
//! mainnet.lastTxIndex=0
//! ```
//!
//! Every write rewrites the whole file through a temporary file that is
//! synced to disk before it is renamed over the state file, so a crash never
//! leaves a half-written state file behind. Comments are not preserved
//! across writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use chainwatch_core::{Checkpoint, CheckpointStore, ScanError};

const LAST_BLOCK: &str = "lastBlock";
const LAST_TX_INDEX: &str = "lastTxIndex";

/// A persistent string map backed by a single text file.
pub struct KvFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl KvFileStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref().to_path_buf();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse(&path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ScanError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), entries = values.len(), "state file opened");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.values.lock().await.get(key).cloned()
    }

    /// Set `key` and flush the whole store to disk.
    pub async fn put(&self, key: &str, value: impl Into<String>) -> Result<(), ScanError> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value.into());
        self.flush(&values).await
    }

    async fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), ScanError> {
        let mut content = String::new();
        for (k, v) in values {
            content.push_str(k);
            content.push('=');
            content.push_str(v);
            content.push('\n');
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write_failed =
            |e: std::io::Error| ScanError::Storage(format!("failed to write {}: {e}", tmp.display()));
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_failed)?;
        file.write_all(content.as_bytes()).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ScanError::Storage(format!("failed to replace {}: {e}", self.path.display())))
    }
}

fn parse(path: &Path, content: &str) -> Result<BTreeMap<String, String>, ScanError> {
    let mut values = BTreeMap::new();
    for (n, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            ScanError::Storage(format!("{}:{}: expected key=value", path.display(), n + 1))
        })?;
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(values)
}

fn key(network: &str, field: &str) -> String {
    format!("{network}.{field}")
}

#[async_trait]
impl CheckpointStore for KvFileStore {
    async fn load(&self, network: &str) -> Result<Option<Checkpoint>, ScanError> {
        let values = self.values.lock().await;
        let Some(block) = values.get(&key(network, LAST_BLOCK)) else {
            return Ok(None);
        };
        let malformed = |reason: String| ScanError::MalformedCheckpoint {
            network: network.to_string(),
            reason,
        };

        let block_number = block
            .parse::<u64>()
            .map_err(|e| malformed(format!("{LAST_BLOCK} '{block}': {e}")))?;
        let tx_index = values
            .get(&key(network, LAST_TX_INDEX))
            .ok_or_else(|| malformed(format!("{LAST_BLOCK} is set but {LAST_TX_INDEX} is missing")))?;
        let tx_index = tx_index
            .parse::<u32>()
            .map_err(|e| malformed(format!("{LAST_TX_INDEX} '{tx_index}': {e}")))?;

        Ok(Some(Checkpoint::new(block_number, tx_index)))
    }

    async fn save(&self, network: &str, checkpoint: Checkpoint) -> Result<(), ScanError> {
        let mut values = self.values.lock().await;
        values.insert(key(network, LAST_BLOCK), checkpoint.block_number.to_string());
        values.insert(key(network, LAST_TX_INDEX), checkpoint.tx_index.to_string());
        self.flush(&values).await?;

        debug!(
            network,
            block = checkpoint.block_number,
            tx_index = checkpoint.tx_index,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, network: &str) -> Result<(), ScanError> {
        let mut values = self.values.lock().await;
        let removed = values.remove(&key(network, LAST_BLOCK)).is_some()
            | values.remove(&key(network, LAST_TX_INDEX)).is_some();
        if removed {
            self.flush(&values).await?;
        }
        Ok(())
    }
}
