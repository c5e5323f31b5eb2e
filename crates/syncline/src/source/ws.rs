// SPDX-License-Identifier: GPL-3.0

//! WebSocket-backed [`StorageSource`].
//!
//! # Design Decision: Legacy RPC Surface
//!
//! The source speaks the `state_*`/`chain_*` RPC family rather than the
//! newer `chainHead` API because:
//! 1. Every public node and light client exposes it, including archive
//!    nodes pinned to old runtimes.
//! 2. Storage reads by raw key map one-to-one onto `state_getStorage`
//!    and `state_queryStorageAt`, with no follow-the-head bookkeeping.
//! 3. Subscriptions arrive as plain change sets, which is exactly the
//!    shape the update pipeline consumes.
//!
//! Every request runs under a deadline. An elapsed deadline is reported
//! as [`SourceError::Timeout`], which callers treat the same as an
//! unreachable node.

use super::{KeyPage, SourceOptions, StorageSource, StorageUpdate, UpdateStream};
use crate::{error::SourceError, strings::rpc::methods};
use async_trait::async_trait;
use futures::StreamExt;
use std::{collections::HashMap, future::Future, time::Duration};
use subxt::{
	SubstrateConfig,
	backend::{
		legacy::{LegacyRpcMethods, rpc_methods::StorageChangeSet},
		rpc::RpcClient,
	},
	config::substrate::H256,
	ext::subxt_rpcs::rpc_params,
	utils::to_hex,
};
use url::Url;

/// [`StorageSource`] over a WebSocket JSON-RPC connection.
pub struct WsStorageSource {
	legacy: LegacyRpcMethods<SubstrateConfig>,
	client: RpcClient,
	endpoint: Url,
	timeout: Duration,
}

impl WsStorageSource {
	/// Connects with default options.
	pub async fn connect(endpoint: Url) -> Result<Self, SourceError> {
		Self::connect_with(endpoint, SourceOptions::default()).await
	}

	/// Connects with the given options.
	pub async fn connect_with(endpoint: Url, options: SourceOptions) -> Result<Self, SourceError> {
		let client = RpcClient::from_url(endpoint.as_str()).await.map_err(|error| {
			SourceError::ConnectionUnavailable {
				endpoint: endpoint.to_string(),
				message: error.to_string(),
			}
		})?;
		log::debug!("connected to {endpoint}");
		let legacy = LegacyRpcMethods::new(client.clone());
		Ok(Self { legacy, client, endpoint, timeout: options.timeout() })
	}

	/// Endpoint this source is connected to.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn with_deadline<T>(
		&self,
		method: &'static str,
		request: impl Future<Output = Result<T, subxt::ext::subxt_rpcs::Error>>,
	) -> Result<T, SourceError> {
		match tokio::time::timeout(self.timeout, request).await {
			Ok(result) => result.map_err(|error| self.request_error(method, error.into())),
			Err(_) => Err(SourceError::Timeout { method }),
		}
	}

	fn request_error(&self, method: &'static str, error: subxt::Error) -> SourceError {
		match error {
			// RPC-layer failures mean the node went away mid-request.
			subxt::Error::Rpc(error) => SourceError::ConnectionUnavailable {
				endpoint: self.endpoint.to_string(),
				message: error.to_string(),
			},
			error => SourceError::RequestFailed { method, message: error.to_string() },
		}
	}
}

#[async_trait]
impl StorageSource for WsStorageSource {
	async fn fetch_one(&self, key: &[u8], at: Option<H256>) -> Result<Option<Vec<u8>>, SourceError> {
		self.with_deadline(methods::STATE_GET_STORAGE, self.legacy.state_get_storage(key, at)).await
	}

	async fn fetch_values(
		&self,
		keys: &[Vec<u8>],
		at: Option<H256>,
	) -> Result<Vec<Option<Vec<u8>>>, SourceError> {
		if keys.is_empty() {
			return Ok(Vec::new());
		}
		let sets = self
			.with_deadline(
				methods::STATE_QUERY_STORAGE_AT,
				self.legacy.state_query_storage_at(keys.iter().map(|key| key.as_slice()), at),
			)
			.await?;
		let mut merged: HashMap<Vec<u8>, Option<Vec<u8>>> = HashMap::new();
		for set in sets {
			for (key, value) in set.changes {
				merged.insert(key.0.to_vec(), value.map(|value| value.0.to_vec()));
			}
		}
		// Preserve request order; keys the node did not mention are empty.
		Ok(keys.iter().map(|key| merged.remove(key.as_slice()).flatten()).collect())
	}

	async fn fetch_page(
		&self,
		prefix: &[u8],
		count: u32,
		start: Option<&[u8]>,
		at: Option<H256>,
	) -> Result<KeyPage, SourceError> {
		let keys = self
			.with_deadline(
				methods::STATE_GET_KEYS_PAGED,
				self.legacy.state_get_keys_paged(prefix, count, start, at),
			)
			.await?;
		Ok(KeyPage::from_keys(keys, count))
	}

	async fn subscribe(&self, keys: &[Vec<u8>]) -> Result<UpdateStream, SourceError> {
		let hex_keys: Vec<String> = keys.iter().map(|key| to_hex(key)).collect();
		let subscription = self
			.with_deadline(
				methods::STATE_SUBSCRIBE_STORAGE,
				self.client.subscribe::<StorageChangeSet<H256>>(
					methods::STATE_SUBSCRIBE_STORAGE,
					rpc_params![hex_keys],
					methods::STATE_UNSUBSCRIBE_STORAGE,
				),
			)
			.await?;
		let endpoint = self.endpoint.to_string();
		let stream = subscription
			.map(move |result| match result {
				Ok(set) => Ok(StorageUpdate {
					block: set.block,
					changes: set
						.changes
						.into_iter()
						.map(|(key, value)| (key.0.to_vec(), value.map(|value| value.0.to_vec())))
						.collect(),
				}),
				// A failed subscription item means the transport is gone.
				Err(error) => Err(SourceError::ConnectionUnavailable {
					endpoint: endpoint.clone(),
					message: error.to_string(),
				}),
			})
			.boxed();
		Ok(stream)
	}

	async fn finalized_head(&self) -> Result<H256, SourceError> {
		self.with_deadline(methods::CHAIN_GET_FINALIZED_HEAD, self.legacy.chain_get_finalized_head())
			.await
	}

	async fn runtime_metadata(&self, at: Option<H256>) -> Result<Vec<u8>, SourceError> {
		let metadata =
			self.with_deadline(methods::STATE_GET_METADATA, self.legacy.state_get_metadata(at)).await?;
		Ok(metadata.into_raw())
	}

	async fn runtime_spec_version(&self, at: Option<H256>) -> Result<u32, SourceError> {
		let version = self
			.with_deadline(
				methods::STATE_GET_RUNTIME_VERSION,
				self.legacy.state_get_runtime_version(at),
			)
			.await?;
		Ok(version.spec_version)
	}
}
