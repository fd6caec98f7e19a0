//! chainwatch CLI: watch accounts across EVM networks and manage scan state.
//!
//! Usage:
//! ```bash
//! chainwatch serve  --config config.json
//! chainwatch status --network mainnet --state chainwatch.state
//! chainwatch reset  --network mainnet
//! chainwatch version
//! ```

mod config;
mod logging;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

use chainwatch_core::{
    AccountWatcher, Alert, AlertLog, CheckpointStore, DispatcherBuilder, HandlerSet, ScanEventDispatcher,
    TransactionHandler,
};
use chainwatch_evm::{EvmChainClient, HttpTransport};
use chainwatch_storage::KvFileStore;

use crate::config::{WatchConfig, DEFAULT_STATE_FILE};

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let rest = &args[2..];

    let result = match command.as_str() {
        "serve" => cmd_serve(rest).await,
        "status" => cmd_status(rest).await,
        "reset" => cmd_reset(rest).await,
        "version" | "--version" | "-V" => {
            println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Ordered transaction scanner and account watcher for EVM networks\n");
    println!("USAGE:");
    println!("    chainwatch <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    serve   [--config PATH]              Scan every configured network until Ctrl-C");
    println!("    status  --network ID [--state PATH]  Show the stored checkpoint of a network");
    println!("    reset   --network ID [--state PATH]  Delete the stored checkpoint of a network");
    println!("    version                              Print version");
    println!("    help                                 Print this help");
}

/// Parse `--name value` pairs, rejecting flags not in `allowed`.
fn parse_flags(args: &[String], allowed: &[&str]) -> anyhow::Result<HashMap<String, String>> {
    let mut flags = HashMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let Some(name) = arg.strip_prefix("--") else {
            bail!("unexpected argument '{arg}'");
        };
        if !allowed.contains(&name) {
            bail!("unknown option '--{name}'");
        }
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("option '--{name}' requires a value"))?;
        flags.insert(name.to_string(), value.clone());
    }
    Ok(flags)
}

async fn cmd_serve(args: &[String]) -> anyhow::Result<()> {
    let flags = parse_flags(args, &["config"])?;
    let path = PathBuf::from(
        flags
            .get("config")
            .map_or(DEFAULT_CONFIG_FILE, String::as_str),
    );
    let config = WatchConfig::load(&path)?;
    logging::init_tracing(&config.log);

    let store: Arc<dyn CheckpointStore> = Arc::new(KvFileStore::open(&config.state_file).await?);
    let alerts = Arc::new(AlertLog::new(config.alert_log_capacity));

    let mut watcher = AccountWatcher::new(alerts.clone());
    for (address, account) in &config.accounts {
        watcher.watch(account.network.clone(), address);
    }
    let handler: Arc<dyn TransactionHandler> = Arc::new(HandlerSet::new().with(Arc::new(watcher)));

    let mut dispatchers: Vec<ScanEventDispatcher> = Vec::with_capacity(config.networks.len());
    for (id, network) in &config.networks {
        let transport = HttpTransport::new(network.url.clone(), WatchConfig::request_timeout(network))
            .with_context(|| format!("network '{id}'"))?;
        let client = Arc::new(EvmChainClient::new(transport));
        let dispatcher = DispatcherBuilder::from_config(config.dispatcher_config(network)).build(
            id.clone(),
            client,
            store.clone(),
            handler.clone(),
        );
        tracing::info!(network = %id, description = %network.description, url = %network.url, "network configured");
        dispatchers.push(dispatcher);
    }

    for dispatcher in &mut dispatchers {
        dispatcher.start();
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                if dispatchers.iter().all(|d| !d.is_running()) {
                    tracing::warn!("every dispatcher has terminated");
                    break;
                }
            }
        }
    }

    for dispatcher in &dispatchers {
        dispatcher.stop();
    }
    let mut failed = 0usize;
    for dispatcher in &mut dispatchers {
        let progress = dispatcher.progress();
        match dispatcher.join().await {
            Ok(()) => tracing::info!(
                network = dispatcher.network(),
                delivered = progress.delivered,
                "network stopped"
            ),
            Err(e) => {
                failed += 1;
                tracing::error!(network = dispatcher.network(), error = %e, "network terminated with error");
            }
        }
    }
    tracing::info!(alerts = alerts.len(), "chainwatch stopped");
    print!("{}", render_alerts(&alerts.snapshot()));

    if failed > 0 {
        bail!("{failed} network(s) terminated with errors");
    }
    Ok(())
}

/// One line per alert, oldest first.
fn render_alerts(alerts: &[Alert]) -> String {
    if alerts.is_empty() {
        return "No alerts raised\n".to_string();
    }
    let mut out = format!("Alerts ({}):\n", alerts.len());
    for alert in alerts {
        out.push_str(&format!(
            "  {} [{}] block {} {} {}: {}{}\n",
            alert.at.format("%Y-%m-%d %H:%M:%S"),
            alert.network,
            alert.block_number,
            alert.tx_hash,
            alert.rule,
            alert.message,
            if alert.success { "" } else { " (reverted)" },
        ));
    }
    out
}

async fn open_state(flags: &HashMap<String, String>) -> anyhow::Result<(String, KvFileStore)> {
    let network = flags
        .get("network")
        .cloned()
        .ok_or_else(|| anyhow!("--network is required"))?;
    let path = flags
        .get("state")
        .map_or(DEFAULT_STATE_FILE, String::as_str);
    let store = KvFileStore::open(path)
        .await
        .with_context(|| format!("failed to open state file {path}"))?;
    Ok((network, store))
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let flags = parse_flags(args, &["network", "state"])?;
    let (network, store) = open_state(&flags).await?;
    match store.load(&network).await? {
        Some(cp) => {
            println!("Network: {network}");
            println!("  Block:    {}", cp.block_number);
            println!("  Tx index: {}", cp.tx_index);
        }
        None => println!("Network: {network}\n  No checkpoint (scan starts at chain head)"),
    }
    Ok(())
}

async fn cmd_reset(args: &[String]) -> anyhow::Result<()> {
    let flags = parse_flags(args, &["network", "state"])?;
    let (network, store) = open_state(&flags).await?;
    store.delete(&network).await?;
    println!("Checkpoint for '{network}' removed from {}", store.path().display());
    Ok(())
}
