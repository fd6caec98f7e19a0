//! Fluent builder for dispatchers.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use chainwatch_core::{ChainClient, CheckpointStore, TransactionHandler};
//! use chainwatch_core::{DispatcherBuilder, HandlerErrorPolicy};
//!
//! # fn build(
//! #     client: Arc<dyn ChainClient>,
//! #     store: Arc<dyn CheckpointStore>,
//! #     handler: Arc<dyn TransactionHandler>,
//! # ) {
//! let dispatcher = DispatcherBuilder::new()
//!     .concurrency(8)
//!     .poll_interval_ms(2_000)
//!     .on_handler_error(HandlerErrorPolicy::Halt)
//!     .build("mainnet", client, store, handler);
//! # }
//! ```

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::client::ChainClient;
use crate::config::{DispatcherConfig, HandlerErrorPolicy};
use crate::dispatcher::ScanEventDispatcher;
use crate::handler::TransactionHandler;

/// Fluent builder for [`DispatcherConfig`] and [`ScanEventDispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Set the number of parallel receipt fetches.
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.downloader.concurrency = workers;
        self
    }

    /// Set the back-off used while waiting for new blocks.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn on_handler_error(mut self, policy: HandlerErrorPolicy) -> Self {
        self.config.handler_error = policy;
        self
    }

    pub fn halt_on_checkpoint_error(mut self, halt: bool) -> Self {
        self.config.halt_on_checkpoint_error = halt;
        self
    }

    pub fn build_config(self) -> DispatcherConfig {
        self.config
    }

    pub fn build(
        self,
        network: impl Into<String>,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn TransactionHandler>,
    ) -> ScanEventDispatcher {
        ScanEventDispatcher::new(network, client, store, handler, self.config)
    }
}
