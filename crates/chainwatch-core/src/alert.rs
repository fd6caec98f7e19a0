//! Alerts: a bounded in-memory alert log and the account-watch handler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::handler::{DispatchContext, TransactionHandler};
use crate::types::{Receipt, Transaction, TxHash};

/// Rule name used for account-activity alerts.
pub const GENERIC_RULE: &str = "Generic";

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub network: String,
    /// Name of the rule that fired.
    pub rule: String,
    pub message: String,
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Whether the transaction executed successfully.
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Bounded FIFO of recent alerts. When full, the oldest entry is evicted.
pub struct AlertLog {
    capacity: usize,
    entries: Mutex<VecDeque<Alert>>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, alert: Alert) {
        tracing::info!(
            network = %alert.network,
            rule = %alert.rule,
            block = alert.block_number,
            tx = %alert.tx_hash,
            "{}",
            alert.message
        );
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(alert);
    }

    /// Copy of the retained alerts, oldest first.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Raises a [`GENERIC_RULE`] alert whenever a watched account sends or
/// receives a transaction on its network.
pub struct AccountWatcher {
    /// network → lowercase addresses
    accounts: HashMap<String, HashSet<String>>,
    log: Arc<AlertLog>,
}

impl AccountWatcher {
    pub fn new(log: Arc<AlertLog>) -> Self {
        Self {
            accounts: HashMap::new(),
            log,
        }
    }

    /// Watch `address` on `network`. Addresses compare case-insensitively.
    pub fn watch(&mut self, network: impl Into<String>, address: &str) {
        self.accounts
            .entry(network.into())
            .or_default()
            .insert(address.trim().to_ascii_lowercase());
    }

    pub fn watched(&self, network: &str) -> usize {
        self.accounts.get(network).map_or(0, HashSet::len)
    }

    /// Watched accounts of `network` touched by `tx`.
    fn matches<'a>(&'a self, network: &str, tx: &Transaction) -> Vec<&'a str> {
        let Some(accounts) = self.accounts.get(network) else {
            return vec![];
        };
        let from = tx.from.to_ascii_lowercase();
        let to = tx
            .to
            .as_deref()
            .map_or_else(|| "create".to_string(), str::to_ascii_lowercase);

        let mut hits: Vec<&str> = accounts
            .iter()
            .filter(|a| **a == from || **a == to)
            .map(String::as_str)
            .collect();
        hits.sort_unstable();
        hits
    }
}

#[async_trait]
impl TransactionHandler for AccountWatcher {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        tx: &Transaction,
        receipt: &Receipt,
    ) -> Result<(), ScanError> {
        for account in self.matches(&ctx.network, tx) {
            self.log.push(Alert {
                network: ctx.network.clone(),
                rule: GENERIC_RULE.into(),
                message: format!("{account} account modified"),
                tx_hash: tx.hash.clone(),
                block_number: ctx.block_number,
                success: receipt.status,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "account-watcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(n: u64) -> Alert {
        Alert {
            network: "mainnet".into(),
            rule: GENERIC_RULE.into(),
            message: format!("alert {n}"),
            tx_hash: TxHash::new("0x01"),
            block_number: n,
            success: true,
            at: Utc::now(),
        }
    }

    fn ctx(network: &str) -> DispatchContext {
        DispatchContext {
            network: network.into(),
            block_number: 42,
            block_hash: "0xb".into(),
            timestamp: 0,
        }
    }

    fn tx(from: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: TxHash::new("0xfeed"),
            index: 0,
            from: from.into(),
            to: to.map(Into::into),
            value: "0x0".into(),
            gas: 21_000,
            gas_price: None,
            nonce: 0,
            input: "0x".into(),
        }
    }

    fn receipt(status: bool) -> Receipt {
        Receipt {
            transaction_hash: TxHash::new("0xfeed"),
            transaction_index: 0,
            block_number: 42,
            status,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            contract_address: None,
            logs: vec![],
        }
    }

    #[test]
    fn log_evicts_oldest() {
        let log = AlertLog::new(3);
        for n in 0..5 {
            log.push(alert(n));
        }
        let blocks: Vec<_> = log.snapshot().iter().map(|a| a.block_number).collect();
        assert_eq!(blocks, vec![2, 3, 4]);
        assert_eq!(log.len(), log.capacity());
    }

    #[tokio::test]
    async fn watcher_matches_sender_and_recipient() {
        let log = Arc::new(AlertLog::new(16));
        let mut watcher = AccountWatcher::new(log.clone());
        watcher.watch("mainnet", " 0xAbC ");
        watcher.watch("mainnet", "0xdef");

        watcher
            .handle(&ctx("mainnet"), &tx("0xABC", Some("0xDEF")), &receipt(false))
            .await
            .unwrap();

        let alerts = log.snapshot();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].message, "0xabc account modified");
        assert_eq!(alerts[1].message, "0xdef account modified");
        assert!(alerts.iter().all(|a| !a.success && a.block_number == 42));
    }

    #[tokio::test]
    async fn watcher_ignores_other_networks() {
        let log = Arc::new(AlertLog::new(16));
        let mut watcher = AccountWatcher::new(log.clone());
        watcher.watch("mainnet", "0xabc");

        watcher
            .handle(&ctx("sepolia"), &tx("0xabc", None), &receipt(true))
            .await
            .unwrap();
        assert!(log.is_empty());
        assert_eq!(watcher.watched("mainnet"), 1);
        assert_eq!(watcher.watched("sepolia"), 0);
    }

    #[tokio::test]
    async fn contract_creation_is_reported_as_create() {
        let log = Arc::new(AlertLog::new(4));
        let mut watcher = AccountWatcher::new(log.clone());
        watcher.watch("mainnet", "create");

        watcher
            .handle(&ctx("mainnet"), &tx("0x1", None), &receipt(true))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
    }
}
