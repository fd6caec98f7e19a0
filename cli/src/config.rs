//! `chainwatch serve` configuration file.
//!
//! ```json
//! {
//!   "state_file": "chainwatch.state",
//!   "networks": {
//!     "mainnet": { "description": "Ethereum", "type": "ethereum", "url": "http://localhost:8545" }
//!   },
//!   "accounts": {
//!     "0x00000000219ab540356cbb839cbe05303d7705fa": { "network": "mainnet" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use chainwatch_core::{DispatcherBuilder, DispatcherConfig, ScanError};
use chainwatch_evm::http::DEFAULT_REQUEST_TIMEOUT;

use crate::logging::LogConfig;

pub const DEFAULT_STATE_FILE: &str = "chainwatch.state";
pub const DEFAULT_ALERT_LOG_CAPACITY: usize = 1_000;

/// The only network type with a chain client.
const ETHEREUM: &str = "ethereum";

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Number of alerts kept in memory.
    #[serde(default = "default_alert_log_capacity")]
    pub alert_log_capacity: usize,
    #[serde(default)]
    pub log: LogConfig,
    /// Defaults for every network; per-network fields override them.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    pub networks: BTreeMap<String, NetworkConfig>,
    /// address → watched account
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub concurrency: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub network: String,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_alert_log_capacity() -> usize {
    DEFAULT_ALERT_LOG_CAPACITY
}

impl WatchConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.networks.is_empty() {
            return Err(ScanError::Config("no networks configured".into()));
        }
        for (id, network) in &self.networks {
            if !network.kind.eq_ignore_ascii_case(ETHEREUM) {
                return Err(ScanError::Config(format!(
                    "network '{id}': unsupported type '{}'",
                    network.kind
                )));
            }
            if network.url.trim().is_empty() {
                return Err(ScanError::Config(format!("network '{id}': url is empty")));
            }
            if network.concurrency == Some(0) {
                return Err(ScanError::Config(format!("network '{id}': concurrency must be at least 1")));
            }
        }
        for (address, account) in &self.accounts {
            if !self.networks.contains_key(&account.network) {
                return Err(ScanError::Config(format!(
                    "account {address}: unknown network '{}'",
                    account.network
                )));
            }
        }
        Ok(())
    }

    /// Dispatcher settings for one network.
    pub fn dispatcher_config(&self, network: &NetworkConfig) -> DispatcherConfig {
        let mut builder = DispatcherBuilder::from_config(self.dispatcher.clone());
        if let Some(workers) = network.concurrency {
            builder = builder.concurrency(workers);
        }
        if let Some(ms) = network.poll_interval_ms {
            builder = builder.poll_interval_ms(ms);
        }
        builder.build_config()
    }

    pub fn request_timeout(network: &NetworkConfig) -> Duration {
        network
            .request_timeout_ms
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_core::HandlerErrorPolicy;

    const SAMPLE: &str = r#"{
        "networks": {
            "mainnet": { "description": "Ethereum", "type": "ethereum", "url": "http://localhost:8545" },
            "sepolia": {
                "type": "Ethereum",
                "url": "http://localhost:8546",
                "concurrency": 8,
                "poll_interval_ms": 12000,
                "request_timeout_ms": 5000
            }
        },
        "dispatcher": { "handler_error": { "mode": "retry", "attempts": 2, "backoff_ms": 100 } },
        "accounts": {
            "0xAbC": { "network": "mainnet" }
        }
    }"#;

    #[test]
    fn parses_with_defaults() {
        let config = WatchConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert_eq!(config.alert_log_capacity, DEFAULT_ALERT_LOG_CAPACITY);
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.accounts["0xAbC"].network, "mainnet");

        let mainnet = config.dispatcher_config(&config.networks["mainnet"]);
        assert_eq!(mainnet.downloader.concurrency, 3);
        assert_eq!(mainnet.poll_interval_ms, 4_000);
        assert_eq!(
            mainnet.handler_error,
            HandlerErrorPolicy::Retry { attempts: 2, backoff_ms: 100 }
        );
        assert_eq!(
            WatchConfig::request_timeout(&config.networks["mainnet"]),
            DEFAULT_REQUEST_TIMEOUT
        );
    }

    #[test]
    fn network_overrides_apply() {
        let config = WatchConfig::from_json(SAMPLE).unwrap();
        let sepolia = &config.networks["sepolia"];
        let dispatcher = config.dispatcher_config(sepolia);
        assert_eq!(dispatcher.downloader.concurrency, 8);
        assert_eq!(dispatcher.poll_interval_ms, 12_000);
        assert_eq!(WatchConfig::request_timeout(sepolia), Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_network_type() {
        let raw = r#"{ "networks": { "btc": { "type": "bitcoin", "url": "http://x" } } }"#;
        let err = WatchConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("unsupported type 'bitcoin'"));
    }

    #[test]
    fn rejects_account_on_undefined_network() {
        let raw = r#"{
            "networks": { "mainnet": { "type": "ethereum", "url": "http://x" } },
            "accounts": { "0x1": { "network": "goerli" } }
        }"#;
        let err = WatchConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("unknown network 'goerli'"));
    }

    #[test]
    fn rejects_zero_concurrency_and_empty_networks() {
        let raw = r#"{ "networks": { "m": { "type": "ethereum", "url": "http://x", "concurrency": 0 } } }"#;
        assert!(WatchConfig::from_json(raw).is_err());
        assert!(WatchConfig::from_json(r#"{ "networks": {} }"#).is_err());
    }
}
