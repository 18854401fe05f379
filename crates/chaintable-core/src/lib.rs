//! chaintable-core — checkpointed chain → partitioned table-store projection.
//!
//! # Architecture
//!
//! ```text
//! IndexLoop                         ChainSyncLoop
//!   ├── BlockFetcher (per stream)     └── ChainHeaderEntry rows
//!   ├── BlockProjector ×4
//!   │     blocks / transactions / balances / wallets
//!   ├── BulkImporter     (partition-keyed buffer)
//!   ├── WriteScheduler   (bounded pool, retry/backoff)
//!   └── CheckpointRepository (block-locator progress)
//!            ↕
//!        TableStore (partitioned key/value tables)
//! ```
//!
//! Each projection stream advances independently; the externally visible
//! store tip is the conservative minimum over the four streams.

pub mod balance;
pub mod bulk;
pub mod chain;
pub mod chain_sync;
pub mod checkpoint;
pub mod entity;
pub mod error;
pub mod fetcher;
pub mod index_loop;
pub mod indexer;
pub mod locator;
pub mod projections;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod testnet;
pub mod types;

pub use balance::{OrderedBalanceChange, WalletRule, WalletRuleSet};
pub use bulk::BulkImporter;
pub use chain::{BlockRepository, ChainView, HeaderChain};
pub use chain_sync::ChainSyncLoop;
pub use checkpoint::{Checkpoint, CheckpointRepository, StreamKind};
pub use entity::{TableEntity, TableSet};
pub use error::IndexError;
pub use fetcher::{BlockFetcher, Fetched};
pub use index_loop::{IndexLoop, IndexLoopEvent};
pub use indexer::{IndexerBuilder, IndexerConfig, IndexerStatus, LoopState, StreamProgress, StreamState};
pub use locator::BlockLocator;
pub use scheduler::{Backoff, WriteScheduler};
pub use store::{MemoryTableStore, RowRange, TableRow, TableStore, TableWrite};
pub use task::BlockProjector;
pub use types::{Block, ChainedHeader, Hash256, Height, Script, Transaction};
