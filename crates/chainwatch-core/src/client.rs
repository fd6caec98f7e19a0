//! The chain client boundary consumed by the dispatcher and downloader.

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::{Block, Receipt, TxHash};

/// Read access to one chain.
///
/// Implementations are shared between the dispatcher and every downloader
/// worker, so they must be safe for concurrent calls.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64, ScanError>;

    /// Fetch a block with its full transaction list.
    ///
    /// Returns `Ok(None)` when the chain has not produced block `number` yet;
    /// this is the only outcome the dispatcher treats as "wait and retry".
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, ScanError>;

    /// Fetch the receipt of a mined transaction.
    async fn receipt_by_hash(&self, hash: &TxHash) -> Result<Receipt, ScanError>;
}
