//! Transaction handler trait and a fan-out handler set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::{Block, Receipt, Transaction};

/// Context passed to handlers alongside each transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Network id the transaction was scanned from (e.g. `"mainnet"`).
    pub network: String,
    pub block_number: u64,
    pub block_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl DispatchContext {
    pub fn for_block(network: impl Into<String>, block: &Block) -> Self {
        Self {
            network: network.into(),
            block_number: block.number,
            block_hash: block.hash.clone(),
            timestamp: block.timestamp,
        }
    }
}

/// Consumer of the ordered `(transaction, receipt)` stream.
///
/// Called exactly once per transaction, in chain order. What happens to a
/// returned error is decided by the dispatcher's
/// [`HandlerErrorPolicy`](crate::config::HandlerErrorPolicy).
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        tx: &Transaction,
        receipt: &Receipt,
    ) -> Result<(), ScanError>;

    /// Name used in logs and handler errors.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Runs several handlers in registration order.
///
/// Every handler sees every transaction; the first failure is returned
/// after all of them have run.
#[derive(Default, Clone)]
pub struct HandlerSet {
    handlers: Vec<Arc<dyn TransactionHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Arc<dyn TransactionHandler>) {
        self.handlers.push(handler);
    }

    pub fn with(mut self, handler: Arc<dyn TransactionHandler>) -> Self {
        self.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl TransactionHandler for HandlerSet {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        tx: &Transaction,
        receipt: &Receipt,
    ) -> Result<(), ScanError> {
        let mut first_err = None;
        for handler in &self.handlers {
            if let Err(e) = handler.handle(ctx, tx, receipt).await {
                tracing::debug!(handler = handler.name(), error = %e, "handler failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "handler-set"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxHash;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>, bool);

    #[async_trait]
    impl TransactionHandler for Counter {
        async fn handle(
            &self,
            _c: &DispatchContext,
            _t: &Transaction,
            _r: &Receipt,
        ) -> Result<(), ScanError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            if self.1 {
                Err(ScanError::handler("counter", "boom"))
            } else {
                Ok(())
            }
        }
    }

    fn dummy() -> (DispatchContext, Transaction, Receipt) {
        let ctx = DispatchContext {
            network: "mainnet".into(),
            block_number: 1,
            block_hash: "0xa".into(),
            timestamp: 0,
        };
        let tx = Transaction {
            hash: TxHash::new("0x01"),
            index: 0,
            from: "0x1".into(),
            to: None,
            value: "0x0".into(),
            gas: 0,
            gas_price: None,
            nonce: 0,
            input: "0x".into(),
        };
        let receipt = Receipt {
            transaction_hash: TxHash::new("0x01"),
            transaction_index: 0,
            block_number: 1,
            status: true,
            gas_used: 0,
            cumulative_gas_used: 0,
            contract_address: None,
            logs: vec![],
        };
        (ctx, tx, receipt)
    }

    #[tokio::test]
    async fn all_handlers_run_despite_failure() {
        let count = Arc::new(AtomicU32::new(0));
        let set = HandlerSet::new()
            .with(Arc::new(Counter(count.clone(), true)))
            .with(Arc::new(Counter(count.clone(), false)));

        let (ctx, tx, receipt) = dummy();
        let err = set.handle(&ctx, &tx, &receipt).await.unwrap_err();

        assert!(err.is_handler());
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn empty_set_is_ok() {
        let (ctx, tx, receipt) = dummy();
        assert!(HandlerSet::new().is_empty());
        HandlerSet::new().handle(&ctx, &tx, &receipt).await.unwrap();
    }
}
