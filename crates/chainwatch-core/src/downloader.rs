//! Receipt downloader: a bounded worker pool that fetches receipts ahead
//! of the dispatcher.
//!
//! The dispatcher [`request`](ReceiptDownloader::request)s every pending
//! receipt of a block as soon as the block arrives, then consumes them one by
//! one in index order with [`get`](ReceiptDownloader::get). Up to
//! `concurrency` fetches overlap; consumption order is still strict because
//! `get` always waits for one specific hash.
//!
//! ```text
//! request(h) ──► pending map (Requested) ──► queue ──► worker N
//!                                                        │ Fetching
//! get(h) ◄──── watch channel ◄── Ready(receipt) | Failed(err)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ChainClient;
use crate::config::DownloaderConfig;
use crate::error::ScanError;
use crate::types::{Receipt, TxHash};

type Outcome = Option<Result<Arc<Receipt>, ScanError>>;

/// Lifecycle of one tracked receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Requested,
    Fetching,
    Ready,
    Failed,
}

struct PendingReceipt {
    /// Distinguishes a re-request from an older, forgotten fetch of the same hash.
    generation: u64,
    state: FetchState,
    done: watch::Sender<Outcome>,
}

struct Shared {
    client: Arc<dyn ChainClient>,
    pending: Mutex<HashMap<TxHash, PendingReceipt>>,
    queue_tx: mpsc::UnboundedSender<(TxHash, u64)>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(TxHash, u64)>>,
    next_generation: AtomicU64,
    fetches: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<TxHash, PendingReceipt>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark an entry as fetching. Returns `false` if it was forgotten or
    /// superseded since it was queued.
    fn begin(&self, hash: &TxHash, generation: u64) -> bool {
        match self.pending().get_mut(hash) {
            Some(entry) if entry.generation == generation => {
                entry.state = FetchState::Fetching;
                true
            }
            _ => false,
        }
    }

    fn finish(&self, hash: &TxHash, generation: u64, result: Result<Receipt, ScanError>) {
        let mut pending = self.pending();
        let Some(entry) = pending.get_mut(hash) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.state = if result.is_ok() {
            FetchState::Ready
        } else {
            FetchState::Failed
        };
        entry.done.send_replace(Some(result.map(Arc::new)));
    }

    async fn next_job(&self) -> Option<(TxHash, u64)> {
        self.queue_rx.lock().await.recv().await
    }
}

/// Fetches receipts in parallel and hands them out in whatever order the
/// caller asks for them.
pub struct ReceiptDownloader {
    shared: Arc<Shared>,
    concurrency: usize,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ReceiptDownloader {
    pub fn new(client: Arc<dyn ChainClient>, config: &DownloaderConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                client,
                pending: Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                next_generation: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
            }),
            concurrency: config.concurrency.max(1),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() || self.shutdown.is_cancelled() {
            return;
        }
        for id in 0..self.concurrency {
            let shared = self.shared.clone();
            let shutdown = self.shutdown.clone();
            workers.push(tokio::spawn(worker(id, shared, shutdown)));
        }
        tracing::debug!(workers = self.concurrency, "receipt downloader started");
    }

    /// Ask the workers to stop taking new work. Does not wait.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every worker to exit.
    ///
    /// Entries that never completed are failed with [`ScanError::Aborted`] so
    /// that no `get` waits forever.
    pub async fn join(&self) {
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "receipt worker panicked");
            }
        }

        let mut pending = self.shared.pending();
        for (hash, entry) in pending.iter_mut() {
            if matches!(entry.state, FetchState::Requested | FetchState::Fetching) {
                entry.state = FetchState::Failed;
                entry.done.send_replace(Some(Err(ScanError::Aborted {
                    reason: format!("downloader stopped before receipt {hash} was fetched"),
                })));
            }
        }
        tracing::debug!("receipt downloader joined");
    }

    /// Enqueue a fetch for `hash` unless it is already requested or cached.
    pub fn request(&self, hash: &TxHash) {
        let generation = {
            let mut pending = self.shared.pending();
            if pending.contains_key(hash) {
                return;
            }
            let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
            let (done, _) = watch::channel(None);
            pending.insert(
                hash.clone(),
                PendingReceipt {
                    generation,
                    state: FetchState::Requested,
                    done,
                },
            );
            generation
        };
        // The receiver lives in `shared`, so the queue cannot be closed here.
        let _ = self.shared.queue_tx.send((hash.clone(), generation));
    }

    /// Wait for the fetch of `hash` to complete and return its outcome.
    pub async fn get(&self, hash: &TxHash) -> Result<Arc<Receipt>, ScanError> {
        let mut rx = match self.shared.pending().get(hash) {
            Some(entry) => entry.done.subscribe(),
            None => return Err(ScanError::NotRequested(hash.to_string())),
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(ScanError::Aborted {
                reason: format!("receipt {hash} was forgotten while awaited"),
            })
        })
    }

    /// Drop the cached entry for `hash`.
    pub fn forget(&self, hash: &TxHash) {
        self.shared.pending().remove(hash);
    }

    /// Current state of `hash`, if tracked.
    pub fn state(&self, hash: &TxHash) -> Option<FetchState> {
        self.shared.pending().get(hash).map(|e| e.state)
    }

    /// Number of tracked (requested, in-flight or cached) receipts.
    pub fn tracked(&self) -> usize {
        self.shared.pending().len()
    }

    /// Total number of fetches issued to the chain client.
    pub fn fetch_count(&self) -> u64 {
        self.shared.fetches.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

async fn worker(id: usize, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = shared.next_job() => job,
        };
        let Some((hash, generation)) = job else {
            break;
        };
        if !shared.begin(&hash, generation) {
            continue;
        }

        shared.fetches.fetch_add(1, Ordering::Relaxed);
        let result = shared.client.receipt_by_hash(&hash).await;
        match &result {
            Ok(_) => tracing::trace!(worker = id, %hash, "receipt fetched"),
            Err(e) => tracing::warn!(worker = id, %hash, error = %e, "receipt fetch failed"),
        }
        shared.finish(&hash, generation, result);
    }
    tracing::trace!(worker = id, "receipt worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Block;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct MockClient {
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        fail: HashSet<String>,
        delay: Duration,
    }

    #[async_trait]
    impl ChainClient for MockClient {
        async fn block_number(&self) -> Result<u64, ScanError> {
            Err(ScanError::Rpc("unused".into()))
        }

        async fn block_by_number(&self, _n: u64) -> Result<Option<Block>, ScanError> {
            Err(ScanError::Rpc("unused".into()))
        }

        async fn receipt_by_hash(&self, hash: &TxHash) -> Result<Receipt, ScanError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(hash.as_str()) {
                return Err(ScanError::Rpc(format!("no receipt for {hash}")));
            }
            Ok(receipt(hash))
        }
    }

    fn receipt(hash: &TxHash) -> Receipt {
        Receipt {
            transaction_hash: hash.clone(),
            transaction_index: 0,
            block_number: 1,
            status: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            contract_address: None,
            logs: vec![],
        }
    }

    fn downloader(client: Arc<MockClient>, concurrency: usize) -> ReceiptDownloader {
        ReceiptDownloader::new(client, &DownloaderConfig { concurrency })
    }

    #[tokio::test]
    async fn duplicate_request_fetches_once() {
        let client = Arc::new(MockClient::default());
        let dl = downloader(client.clone(), 3);
        let h = TxHash::new("0x01");

        dl.request(&h);
        dl.request(&h);
        dl.start();

        let r = dl.get(&h).await.unwrap();
        assert_eq!(r.transaction_hash, h);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(dl.fetch_count(), 1);

        dl.stop();
        dl.join().await;
    }

    #[tokio::test]
    async fn get_waits_for_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(MockClient {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let dl = downloader(client, 1);
        let h = TxHash::new("0x01");
        dl.request(&h);
        dl.start();

        let early = tokio::time::timeout(Duration::from_millis(50), dl.get(&h)).await;
        assert!(early.is_err(), "get returned before the fetch completed");
        assert_eq!(dl.state(&h), Some(FetchState::Fetching));

        gate.add_permits(1);
        dl.get(&h).await.unwrap();
        assert_eq!(dl.state(&h), Some(FetchState::Ready));

        // Completed entries are served straight from the cache.
        let cached = tokio::time::timeout(Duration::from_millis(10), dl.get(&h)).await;
        assert!(cached.unwrap().is_ok());

        dl.stop();
        dl.join().await;
    }

    #[tokio::test]
    async fn get_without_request_is_an_error() {
        let dl = downloader(Arc::new(MockClient::default()), 1);
        let err = dl.get(&TxHash::new("0xdead")).await.unwrap_err();
        assert!(matches!(err, ScanError::NotRequested(_)));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_hash() {
        let client = Arc::new(MockClient {
            fail: ["0x02".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let dl = downloader(client, 2);
        let ok = TxHash::new("0x01");
        let bad = TxHash::new("0x02");
        dl.request(&ok);
        dl.request(&bad);
        dl.start();

        assert!(matches!(dl.get(&bad).await, Err(ScanError::Rpc(_))));
        assert_eq!(dl.state(&bad), Some(FetchState::Failed));
        assert!(dl.get(&ok).await.is_ok());

        dl.stop();
        dl.join().await;
    }

    #[tokio::test]
    async fn forget_then_request_fetches_again() {
        let client = Arc::new(MockClient::default());
        let dl = downloader(client.clone(), 1);
        let h = TxHash::new("0x01");
        dl.start();

        dl.request(&h);
        dl.get(&h).await.unwrap();
        dl.forget(&h);
        assert_eq!(dl.tracked(), 0);
        assert!(dl.state(&h).is_none());

        dl.request(&h);
        dl.get(&h).await.unwrap();
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);

        dl.stop();
        dl.join().await;
    }

    #[tokio::test]
    async fn pool_bounds_parallel_fetches() {
        let client = Arc::new(MockClient {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let dl = downloader(client.clone(), 3);
        let hashes: Vec<_> = (0..10).map(|i| TxHash::new(format!("0x{i:02x}"))).collect();
        for h in &hashes {
            dl.request(h);
        }
        dl.start();

        for h in &hashes {
            dl.get(h).await.unwrap();
        }
        assert!(client.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 10);

        dl.stop();
        dl.join().await;
    }

    #[tokio::test]
    async fn join_fails_unfinished_entries() {
        let dl = downloader(Arc::new(MockClient::default()), 2);
        let h = TxHash::new("0x01");
        dl.request(&h);

        // Never started: the request can only be aborted.
        dl.stop();
        dl.join().await;

        assert!(matches!(dl.get(&h).await, Err(ScanError::Aborted { .. })));
    }

    #[tokio::test]
    async fn stop_and_join_leaves_no_workers() {
        let dl = downloader(Arc::new(MockClient::default()), 4);
        dl.start();
        dl.stop();
        dl.join().await;

        assert!(dl.workers.lock().unwrap().is_empty());
        // A stopped downloader does not restart.
        dl.start();
        assert!(dl.workers.lock().unwrap().is_empty());
    }
}
