//! The scan loop: walks one chain block by block and delivers every
//! transaction with its receipt, in order, to a [`TransactionHandler`].
//!
//! # One iteration
//!
//! 1. On the first iteration, load the checkpoint (or start at the chain head).
//! 2. If the cached block is behind the cursor, fetch the next block. A block
//!    that does not exist yet means "wait and retry"; any other error ends
//!    the scan. A new block has all of its remaining receipts requested from
//!    the [`ReceiptDownloader`] at once.
//! 3. If the cursor points at a transaction, await its receipt, forget it,
//!    and call the handler.
//! 4. Advance the cursor and persist it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::client::ChainClient;
use crate::config::{DispatcherConfig, DispatcherStatus, HandlerErrorPolicy};
use crate::cursor::ScanCursor;
use crate::downloader::ReceiptDownloader;
use crate::error::ScanError;
use crate::handler::{DispatchContext, TransactionHandler};
use crate::types::{Block, Receipt, Transaction};

/// Snapshot of a dispatcher's progress, published after every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub status: DispatcherStatus,
    pub cursor: ScanCursor,
    /// Transactions handed to the handler since start.
    pub delivered: u64,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            status: DispatcherStatus::Idle,
            cursor: ScanCursor::Uninitialized,
            delivered: 0,
        }
    }
}

/// Result of a single [`Scanner::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A transaction was delivered and the cursor advanced.
    Delivered,
    /// The cursor advanced without a delivery (end of block, empty block).
    Advanced,
    /// The next block does not exist yet; nothing changed.
    WaitForHead,
}

/// The sequential scan state machine for one network.
pub struct Scanner {
    network: String,
    client: Arc<dyn ChainClient>,
    checkpoints: CheckpointManager,
    handler: Arc<dyn TransactionHandler>,
    downloader: ReceiptDownloader,
    config: DispatcherConfig,
    cursor: ScanCursor,
    block: Option<Block>,
    delivered: u64,
    shutdown: CancellationToken,
    progress: watch::Sender<ScanProgress>,
}

impl Scanner {
    pub fn new(
        network: impl Into<String>,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn TransactionHandler>,
        config: DispatcherConfig,
    ) -> Self {
        let network = network.into();
        let (progress, _) = watch::channel(ScanProgress::default());
        Self {
            checkpoints: CheckpointManager::new(store, network.clone()),
            downloader: ReceiptDownloader::new(client.clone(), &config.downloader),
            network,
            client,
            handler,
            config,
            cursor: ScanCursor::Uninitialized,
            block: None,
            delivered: 0,
            shutdown: CancellationToken::new(),
            progress,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    pub fn downloader(&self) -> &ReceiptDownloader {
        &self.downloader
    }

    /// Run one iteration of the state machine.
    pub async fn process(&mut self) -> Result<Step, ScanError> {
        let (next_block, next_tx) = match self.cursor.position() {
            Some(position) => position,
            None => self.initialize().await?,
        };

        tracing::debug!(network = %self.network, block = next_block, tx_index = next_tx, "scanning");

        if self.block.as_ref().map_or(true, |b| b.number < next_block) {
            let Some(block) = self.client.block_by_number(next_block).await? else {
                return Ok(Step::WaitForHead);
            };
            tracing::info!(
                network = %self.network,
                block = block.number,
                txs = block.tx_count(),
                "processing block"
            );
            for hash in block.hashes_from(next_tx) {
                self.downloader.request(hash);
            }
            self.block = Some(block);
        }

        let (tx_count, pending) = match &self.block {
            Some(block) => (
                block.tx_count(),
                block
                    .transaction(next_tx)
                    .map(|tx| (DispatchContext::for_block(&self.network, block), tx.clone())),
            ),
            None => return Ok(Step::WaitForHead),
        };

        let delivered = match pending {
            Some((ctx, tx)) => {
                self.deliver(&ctx, &tx).await?;
                true
            }
            None => false,
        };

        self.cursor.advance(delivered, tx_count);
        self.persist().await?;
        self.publish(DispatcherStatus::Scanning);

        Ok(if delivered { Step::Delivered } else { Step::Advanced })
    }

    async fn initialize(&mut self) -> Result<(u64, u32), ScanError> {
        self.cursor = match self.checkpoints.load().await? {
            Some(checkpoint) => {
                let cursor = ScanCursor::resume(&checkpoint);
                tracing::info!(
                    network = %self.network,
                    block = checkpoint.block_number,
                    tx_index = checkpoint.tx_index,
                    "resuming from checkpoint"
                );
                cursor
            }
            None => {
                let head = self.client.block_number().await?;
                tracing::info!(network = %self.network, head, "no checkpoint, starting at chain head");
                ScanCursor::at_head(head)
            }
        };
        self.cursor.position().ok_or_else(|| ScanError::Aborted {
            reason: "cursor not initialized".into(),
        })
    }

    async fn deliver(&mut self, ctx: &DispatchContext, tx: &Transaction) -> Result<(), ScanError> {
        let receipt = self.downloader.get(&tx.hash).await;
        self.downloader.forget(&tx.hash);
        let receipt = receipt?;

        self.invoke_handler(ctx, tx, &receipt).await?;
        self.delivered += 1;
        Ok(())
    }

    async fn invoke_handler(
        &self,
        ctx: &DispatchContext,
        tx: &Transaction,
        receipt: &Receipt,
    ) -> Result<(), ScanError> {
        let mut retries = 0u32;
        loop {
            let err = match self.handler.handle(ctx, tx, receipt).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match self.config.handler_error {
                HandlerErrorPolicy::Skip => {
                    tracing::error!(
                        network = %self.network,
                        handler = self.handler.name(),
                        hash = %tx.hash,
                        error = %err,
                        "handler failed, transaction skipped"
                    );
                    return Ok(());
                }
                HandlerErrorPolicy::Halt => {
                    tracing::error!(
                        network = %self.network,
                        handler = self.handler.name(),
                        hash = %tx.hash,
                        error = %err,
                        "handler failed, halting scan"
                    );
                    self.rewind().await;
                    return Err(err);
                }
                HandlerErrorPolicy::Retry { attempts, backoff_ms } => {
                    if retries >= attempts {
                        tracing::error!(
                            network = %self.network,
                            hash = %tx.hash,
                            attempts = retries + 1,
                            error = %err,
                            "handler kept failing, transaction skipped"
                        );
                        return Ok(());
                    }
                    retries += 1;
                    tracing::warn!(
                        network = %self.network,
                        hash = %tx.hash,
                        retry = retries,
                        error = %err,
                        "handler failed, retrying"
                    );
                    if !self.pause(Duration::from_millis(backoff_ms)).await {
                        tracing::warn!(network = %self.network, hash = %tx.hash, "retry interrupted by shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn persist(&self) -> Result<(), ScanError> {
        let Some(checkpoint) = self.cursor.checkpoint() else {
            return Ok(());
        };
        match self.checkpoints.save(checkpoint).await {
            Ok(()) => Ok(()),
            Err(e) if self.config.halt_on_checkpoint_error => Err(e),
            Err(e) => {
                tracing::warn!(
                    network = %self.network,
                    block = checkpoint.block_number,
                    tx_index = checkpoint.tx_index,
                    error = %e,
                    "failed to save checkpoint"
                );
                Ok(())
            }
        }
    }

    /// Store a checkpoint that resumes on the current transaction.
    async fn rewind(&self) {
        let Some(checkpoint) = self.cursor.rewind_checkpoint() else {
            tracing::warn!(network = %self.network, "cannot rewind before genesis, checkpoint left as is");
            return;
        };
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            tracing::error!(
                network = %self.network,
                block = checkpoint.block_number,
                tx_index = checkpoint.tx_index,
                error = %e,
                "failed to rewind checkpoint"
            );
        }
    }

    /// Sleep for `delay` unless shutdown is requested first.
    /// Returns `false` when interrupted.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn publish(&self, status: DispatcherStatus) {
        self.progress.send_replace(ScanProgress {
            status,
            cursor: self.cursor,
            delivered: self.delivered,
        });
    }

    /// Run until shutdown or a fatal error, then stop the downloader.
    pub async fn run(mut self) -> Result<(), ScanError> {
        self.downloader.start();
        let result = self.scan_loop().await;

        self.downloader.stop();
        self.downloader.join().await;

        match &result {
            Ok(()) => {
                tracing::info!(network = %self.network, delivered = self.delivered, "scan stopped");
                self.publish(DispatcherStatus::Stopped);
            }
            Err(e) => {
                tracing::error!(network = %self.network, error = %e, "scan terminated");
                self.publish(DispatcherStatus::Failed);
            }
        }
        result
    }

    async fn scan_loop(&mut self) -> Result<(), ScanError> {
        let poll_interval = self.config.poll_interval();
        loop {
            if self.shutdown.is_cancelled() {
                tracing::debug!(network = %self.network, "stop requested");
                return Ok(());
            }
            if self.process().await? == Step::WaitForHead {
                self.publish(DispatcherStatus::WaitingForHead);
                if !self.pause(poll_interval).await {
                    return Ok(());
                }
            }
        }
    }
}

/// Owns a [`Scanner`] and runs it as a background task.
pub struct ScanEventDispatcher {
    network: String,
    scanner: Option<Scanner>,
    shutdown: CancellationToken,
    progress: watch::Receiver<ScanProgress>,
    handle: Option<JoinHandle<Result<(), ScanError>>>,
}

impl ScanEventDispatcher {
    pub fn new(
        network: impl Into<String>,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn TransactionHandler>,
        config: DispatcherConfig,
    ) -> Self {
        Self::from_scanner(Scanner::new(network, client, store, handler, config))
    }

    pub fn from_scanner(scanner: Scanner) -> Self {
        Self {
            network: scanner.network.clone(),
            shutdown: scanner.shutdown.clone(),
            progress: scanner.progress.subscribe(),
            scanner: Some(scanner),
            handle: None,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Spawn the scan loop. The receipt downloader is started first, inside
    /// the task. Starting twice is a no-op.
    pub fn start(&mut self) {
        if let Some(scanner) = self.scanner.take() {
            tracing::info!(network = %self.network, "starting dispatcher");
            self.handle = Some(tokio::spawn(scanner.run()));
        }
    }

    /// Request a graceful stop. Does not wait; see [`join`](Self::join).
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the scan loop and its downloader to exit.
    ///
    /// Returns the error that terminated the scan, if any.
    pub async fn join(&mut self) -> Result<(), ScanError> {
        match self.handle.take() {
            Some(handle) => handle.await.map_err(|e| ScanError::Aborted {
                reason: format!("scan task failed: {e}"),
            })?,
            None => Ok(()),
        }
    }

    /// Latest published progress.
    pub fn progress(&self) -> ScanProgress {
        *self.progress.borrow()
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.progress.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}
