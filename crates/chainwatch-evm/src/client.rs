//! EVM chain client.
//!
//! Implements [`ChainClient`] on top of any [`RpcTransport`] with three
//! calls: `eth_blockNumber`, `eth_getBlockByNumber(<n>, true)` and
//! `eth_getTransactionReceipt(<hash>)`. Quantities arrive as `0x`-prefixed
//! hex strings and are parsed strictly: a malformed value is an RPC error,
//! never a silent zero.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use chainwatch_core::{Block, ChainClient, Log, Receipt, ScanError, Transaction, TxHash};

use crate::error::TransportError;
use crate::request::JsonRpcRequest;
use crate::transport::RpcTransport;

// ─── Raw wire shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    pub transaction_index: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: Option<String>,
    pub nonce: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: String,
    pub transaction_index: String,
    pub block_number: String,
    /// Absent on pre-Byzantium receipts, which carry a state root instead.
    pub status: Option<String>,
    pub gas_used: String,
    pub cumulative_gas_used: String,
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: Option<String>,
}

// ─── Hex parsing ──────────────────────────────────────────────────────────────

fn parse_hex_u128(field: &str, s: &str) -> Result<u128, ScanError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| ScanError::Rpc(format!("{field}: expected 0x-prefixed quantity, got '{s}'")))?;
    if digits.is_empty() {
        return Err(ScanError::Rpc(format!("{field}: empty quantity")));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ScanError::Rpc(format!("{field}: invalid quantity '{s}': {e}")))
}

/// Parse a `0x`-prefixed hex quantity into a `u64`.
pub fn parse_hex_u64(field: &str, s: &str) -> Result<u64, ScanError> {
    let v = parse_hex_u128(field, s)?;
    u64::try_from(v).map_err(|_| ScanError::Rpc(format!("{field}: quantity '{s}' overflows u64")))
}

fn parse_hex_u32(field: &str, s: &str) -> Result<u32, ScanError> {
    let v = parse_hex_u64(field, s)?;
    u32::try_from(v).map_err(|_| ScanError::Rpc(format!("{field}: quantity '{s}' overflows u32")))
}

// ─── Conversions ──────────────────────────────────────────────────────────────

impl RawTransaction {
    fn into_transaction(self, position: u32) -> Result<Transaction, ScanError> {
        let index = parse_hex_u32("transactionIndex", &self.transaction_index)?;
        if index != position {
            return Err(ScanError::Rpc(format!(
                "transaction {} reports index {index} at position {position}",
                self.hash
            )));
        }
        Ok(Transaction {
            hash: TxHash::new(self.hash),
            index,
            from: self.from.to_ascii_lowercase(),
            to: self.to.map(|a| a.to_ascii_lowercase()),
            value: self.value,
            gas: parse_hex_u64("gas", &self.gas)?,
            gas_price: self
                .gas_price
                .as_deref()
                .map(|p| parse_hex_u128("gasPrice", p))
                .transpose()?,
            nonce: parse_hex_u64("nonce", &self.nonce)?,
            input: self.input,
        })
    }
}

impl RawBlock {
    pub fn into_block(self) -> Result<Block, ScanError> {
        let transactions = self
            .transactions
            .into_iter()
            .enumerate()
            .map(|(position, tx)| tx.into_transaction(position as u32))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            number: parse_hex_u64("number", &self.number)?,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: parse_hex_u64("timestamp", &self.timestamp)? as i64,
            transactions,
        })
    }
}

impl RawReceipt {
    pub fn into_receipt(self) -> Result<Receipt, ScanError> {
        let logs = self
            .logs
            .into_iter()
            .enumerate()
            .map(|(position, log)| -> Result<Log, ScanError> {
                Ok(Log {
                    log_index: match log.log_index.as_deref() {
                        Some(i) => parse_hex_u32("logIndex", i)?,
                        None => position as u32,
                    },
                    address: log.address.to_ascii_lowercase(),
                    topics: log.topics,
                    data: log.data,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Receipt {
            transaction_hash: TxHash::new(self.transaction_hash),
            transaction_index: parse_hex_u32("transactionIndex", &self.transaction_index)?,
            block_number: parse_hex_u64("blockNumber", &self.block_number)?,
            status: match self.status.as_deref() {
                Some(s) => parse_hex_u64("status", s)? == 1,
                None => true,
            },
            gas_used: parse_hex_u64("gasUsed", &self.gas_used)?,
            cumulative_gas_used: parse_hex_u64("cumulativeGasUsed", &self.cumulative_gas_used)?,
            contract_address: self.contract_address.map(|a| a.to_ascii_lowercase()),
            logs,
        })
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// [`ChainClient`] for EVM-compatible nodes.
pub struct EvmChainClient<T> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: RpcTransport> EvmChainClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Call `method` and deserialize its result.
    async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R, ScanError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .transport
            .send(JsonRpcRequest::new(id, method, params))
            .await
            .map_err(|e| {
                tracing::debug!(url = %self.transport.url(), method, error = %e, "request failed");
                e
            })?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        Ok(serde_json::from_value(result).map_err(TransportError::Deserialization)?)
    }
}

#[async_trait]
impl<T: RpcTransport> ChainClient for EvmChainClient<T> {
    async fn block_number(&self) -> Result<u64, ScanError> {
        let head: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64("eth_blockNumber", &head)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, ScanError> {
        let raw: Option<RawBlock> = self
            .call("eth_getBlockByNumber", vec![json!(format!("0x{number:x}")), json!(true)])
            .await?;
        raw.map(RawBlock::into_block).transpose()
    }

    async fn receipt_by_hash(&self, hash: &TxHash) -> Result<Receipt, ScanError> {
        let raw: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", vec![json!(hash.as_str())])
            .await?;
        match raw {
            Some(raw) => raw.into_receipt(),
            None => Err(ScanError::ReceiptNotFound(hash.to_string())),
        }
    }
}
