// SPDX-License-Identifier: GPL-3.0

//! Chain state synchronization and caching for Substrate-family chains.
//!
//! The crate keeps a local, observable mirror of selected on-chain
//! storage entries. Reads are served from memory or a SQLite cache;
//! refreshes come from a node over JSON-RPC and run as small task
//! graphs (metadata and storage fetch in parallel, apply after both).
//! Observers receive diffs as the mirror moves, and every failure
//! degrades to "serve the last known value and report the error".
//!
//! ```text
//!   consumers (fetch / observe / refresh)
//!            |
//!            v
//!   +-------------------+      +--------------------+
//!   | provider registry | ---> |   value provider   |----> Change /
//!   |  (one per entry)  |      |  memory + diffing  |      Error events
//!   +-------------------+      +---------+----------+
//!                                        |
//!                         +--------------+--------------+
//!                         v                             v
//!                 +---------------+            +-----------------+
//!                 |  SQLite cache |            |  chain source   |
//!                 | raw + decoded |            | JSON-RPC (ws)   |
//!                 +---------------+            +-----------------+
//! ```
//!
//! Storage keys are computed from runtime metadata by [`keys`], values
//! are decoded against the live runtime by [`codec`] with layout
//! fallback for pre-migration bytes, and whole maps can be mirrored in
//! bulk by [`sync`].
//!
//! # Example
//!
//! ```ignore
//! let source = Arc::new(WsStorageSource::connect(endpoint).await?);
//! let cache = Arc::new(CacheRepository::open(&path).await?);
//! let runtime = Arc::new(RuntimeService::new(source.clone()));
//!
//! let provider = StorageValueProvider::<AccountInfo>::new(
//!     source,
//!     cache,
//!     runtime,
//!     "westend",
//!     StoragePath::new("System", "Account"),
//!     vec![(&account).into()],
//!     TriggerPolicy::default().with_subscription(true),
//! )
//! .await?;
//!
//! let (_, mut events) = provider.add_observer(ObserverOptions::default()).await;
//! while let Some(event) = events.recv().await {
//!     // Apply the change to view state; errors mean the shown value
//!     // is stale, not wrong.
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod dev;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod metadata;
pub mod provider;
pub mod source;
pub(crate) mod strings;
pub mod sync;
pub mod types;

pub use cache::{CacheEntry, CacheRepository};
pub use codec::StorageDecode;
pub use error::{CacheError, CodecError, KeyError, MetadataError, ProviderError, SourceError};
pub use indexer::{HistoryRecord, HistorySource};
pub use keys::{KeyParam, StorageHasher, StoragePath};
pub use metadata::{CoderFactory, RuntimeService};
pub use provider::{
	Change, ObserverOptions, ProviderEvent, ProviderRegistry, StorageValueProvider, TriggerPolicy,
};
pub use source::{KeyPage, SourceOptions, StorageSource, StorageUpdate, WsStorageSource};
pub use sync::{PrefixSync, SyncReport};
pub use types::{AccountData, AccountId, AccountInfo};
