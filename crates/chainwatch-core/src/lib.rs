//! chainwatch-core: ordered, checkpointed transaction scanning.
//!
//! # Architecture
//!
//! ```text
//! ScanEventDispatcher (one task per network)
//!      ├── ScanCursor / CheckpointManager  (resume after restart)
//!      ├── ChainClient                     (blocks, receipts, head)
//!      ├── ReceiptDownloader               (bounded prefetch worker pool)
//!      └── TransactionHandler              (alerts, user logic)
//! ```

pub mod alert;
pub mod builder;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod downloader;
pub mod error;
pub mod handler;
pub mod types;

pub use alert::{AccountWatcher, Alert, AlertLog};
pub use builder::DispatcherBuilder;
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use client::ChainClient;
pub use config::{DispatcherConfig, DispatcherStatus, DownloaderConfig, HandlerErrorPolicy};
pub use cursor::ScanCursor;
pub use dispatcher::{ScanEventDispatcher, ScanProgress, Scanner, Step};
pub use downloader::{FetchState, ReceiptDownloader};
pub use error::ScanError;
pub use handler::{DispatchContext, HandlerSet, TransactionHandler};
pub use types::{Block, Log, Receipt, Transaction, TxHash};
