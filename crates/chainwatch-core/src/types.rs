//! Block, transaction and receipt value types shared by the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── TxHash ───────────────────────────────────────────────────────────────────

/// A transaction hash (`0x…`), normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TxHash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction at a fixed position inside its block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxHash,
    /// Position of the transaction inside its block.
    pub index: u32,
    /// Sender address (`0x…`).
    pub from: String,
    /// Recipient address; `None` for contract creation.
    pub to: Option<String>,
    /// Transferred value in wei, as a hex quantity (`0x…`).
    pub value: String,
    pub gas: u64,
    /// Gas price in wei (legacy or effective), if the node reported one.
    pub gas_price: Option<u128>,
    pub nonce: u64,
    /// Call data (`0x…`).
    pub input: String,
}

impl Transaction {
    /// Returns `true` if this transaction deploys a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A fetched block with its full, ordered transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn tx_count(&self) -> u32 {
        self.transactions.len() as u32
    }

    /// Transaction at `index`, if the block has one there.
    pub fn transaction(&self, index: u32) -> Option<&Transaction> {
        self.transactions.get(index as usize)
    }

    /// Hashes of every transaction at or after `from_index`.
    pub fn hashes_from(&self, from_index: u32) -> impl Iterator<Item = &TxHash> {
        self.transactions
            .iter()
            .skip(from_index as usize)
            .map(|tx| &tx.hash)
    }
}

// ─── Receipt ──────────────────────────────────────────────────────────────────

/// A log emitted during transaction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: u32,
}

impl Log {
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// The chain-supplied outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub transaction_index: u32,
    pub block_number: u64,
    /// `true` if execution succeeded.
    pub status: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    /// Address of the deployed contract for creation transactions.
    pub contract_address: Option<String>,
    pub logs: Vec<Log>,
}
