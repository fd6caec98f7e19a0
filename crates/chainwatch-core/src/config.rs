//! Dispatcher configuration and runtime status types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of concurrent receipt fetches per network.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default back-off when the next block does not exist yet.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 4_000;

/// What the dispatcher does when a handler returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Log the failure and move past the transaction. The event is dropped.
    #[default]
    Skip,
    /// Re-invoke the handler up to `attempts` more times, waiting
    /// `backoff_ms` between tries, then log and move on.
    Retry { attempts: u32, backoff_ms: u64 },
    /// Stop the scan with the handler error. The checkpoint is rewound so the
    /// failed transaction is delivered again after a restart.
    Halt,
}

/// Configuration for the receipt downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Number of worker tasks fetching receipts in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Configuration for one network's dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Wait before re-polling when the chain head has been reached (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub handler_error: HandlerErrorPolicy,
    /// Stop the scan when a checkpoint cannot be saved instead of logging
    /// and continuing.
    #[serde(default)]
    pub halt_on_checkpoint_error: bool,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            downloader: DownloaderConfig::default(),
            handler_error: HandlerErrorPolicy::default(),
            halt_on_checkpoint_error: false,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Runtime status of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatcherStatus {
    /// Not yet started.
    Idle,
    /// Walking blocks and delivering transactions.
    Scanning,
    /// Caught up; waiting for the chain to produce the next block.
    WaitingForHead,
    /// Stopped on request.
    Stopped,
    /// Terminated by an unrecoverable error.
    Failed,
}

impl std::fmt::Display for DispatcherStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::WaitingForHead => write!(f, "waiting-for-head"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
