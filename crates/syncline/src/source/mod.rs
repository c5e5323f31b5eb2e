// SPDX-License-Identifier: GPL-3.0

//! Remote access to chain storage.
//!
//! [`StorageSource`] is the seam between the update pipeline and the
//! network: everything above it deals in raw storage keys and SCALE
//! payloads, everything below it speaks JSON-RPC. The production
//! implementation is [`WsStorageSource`]; tests swap in an in-process
//! source from [`crate::dev`].
//!
//! All operations are read-only and idempotent, so callers may retry any
//! of them after a [`SourceError::ConnectionUnavailable`] without risk of
//! double effects. Key enumeration is paged and resumable through the
//! cursor carried by [`KeyPage`].

use crate::error::SourceError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
pub use subxt::config::substrate::H256;
pub use ws::WsStorageSource;

mod ws;

/// Default deadline applied to every RPC request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection options for remote sources.
#[derive(Debug, Clone)]
pub struct SourceOptions {
	timeout: Duration,
}

impl SourceOptions {
	/// Overrides the per-request deadline.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}

impl Default for SourceOptions {
	fn default() -> Self {
		Self { timeout: DEFAULT_REQUEST_TIMEOUT }
	}
}

/// One page of a key enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPage {
	/// Keys in this page, in lexicographic order.
	pub keys: Vec<Vec<u8>>,
	/// Cursor to pass as `start` for the next page.
	pub next: Option<Vec<u8>>,
	/// Whether the enumeration is finished.
	pub complete: bool,
}

impl KeyPage {
	/// Builds a page from the keys one `state_getKeysPaged` call returned.
	///
	/// A short page means the node has nothing more under the prefix.
	pub fn from_keys(keys: Vec<Vec<u8>>, count: u32) -> Self {
		let complete = (keys.len() as u32) < count;
		let next = if complete { None } else { keys.last().cloned() };
		Self { keys, next, complete }
	}
}

/// A batch of storage changes reported by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUpdate {
	/// Block the changes were observed at.
	pub block: H256,
	/// Changed keys with their new values, `None` when deleted.
	pub changes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

/// Stream of storage updates. An `Err` item means the subscription died
/// and must be re-established.
pub type UpdateStream = BoxStream<'static, Result<StorageUpdate, SourceError>>;

/// Read-only view of a chain's storage and runtime.
#[async_trait]
pub trait StorageSource: Send + Sync {
	/// Reads one storage value at `at` (or the best block when `None`).
	async fn fetch_one(&self, key: &[u8], at: Option<H256>) -> Result<Option<Vec<u8>>, SourceError>;

	/// Reads several storage values in one request.
	///
	/// The result has the same length and order as `keys`.
	async fn fetch_values(
		&self,
		keys: &[Vec<u8>],
		at: Option<H256>,
	) -> Result<Vec<Option<Vec<u8>>>, SourceError>;

	/// Enumerates up to `count` keys under `prefix`, starting strictly
	/// after `start`.
	async fn fetch_page(
		&self,
		prefix: &[u8],
		count: u32,
		start: Option<&[u8]>,
		at: Option<H256>,
	) -> Result<KeyPage, SourceError>;

	/// Subscribes to changes of the given keys.
	async fn subscribe(&self, keys: &[Vec<u8>]) -> Result<UpdateStream, SourceError>;

	/// Hash of the latest finalized block.
	async fn finalized_head(&self) -> Result<H256, SourceError>;

	/// SCALE-encoded runtime metadata at `at`.
	async fn runtime_metadata(&self, at: Option<H256>) -> Result<Vec<u8>, SourceError>;

	/// Runtime spec version at `at`.
	async fn runtime_spec_version(&self, at: Option<H256>) -> Result<u32, SourceError>;
}
