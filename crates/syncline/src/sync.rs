// SPDX-License-Identifier: GPL-3.0

//! Bulk synchronization of whole storage maps.
//!
//! [`PrefixSync`] walks every key under a storage item's prefix page by
//! page and mirrors the values into the cache. Two modes cover the two
//! shapes of bulk updates:
//! - [`PrefixSync::run`] persists each page as it arrives. Reruns after
//!   a failure are harmless and finish the remainder.
//! - [`PrefixSync::reindex`] collects everything first and swaps it in
//!   with one [`replace`](crate::cache::CacheRepository::replace), for
//!   maps whose key set turns over wholesale, such as per-era staking
//!   entries.

use crate::{
	cache::{CacheEntry, CacheRepository},
	error::ProviderError,
	keys::{self, StoragePath},
	source::StorageSource,
};
use std::sync::Arc;

/// Keys requested per page.
const DEFAULT_SYNC_PAGE_SIZE: u32 = 1000;

/// Outcome of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
	/// Pages fetched from the node.
	pub pages: u32,
	/// Keys written to the cache.
	pub keys: u64,
}

/// Mirrors one storage map into the cache.
pub struct PrefixSync {
	source: Arc<dyn StorageSource>,
	cache: Arc<CacheRepository>,
	chain_id: String,
	path: StoragePath,
	page_size: u32,
}

impl PrefixSync {
	pub fn new(
		source: Arc<dyn StorageSource>,
		cache: Arc<CacheRepository>,
		chain_id: impl Into<String>,
		path: StoragePath,
	) -> Self {
		Self { source, cache, chain_id: chain_id.into(), path, page_size: DEFAULT_SYNC_PAGE_SIZE }
	}

	/// Overrides the page size, keeping it at least 1.
	pub fn with_page_size(mut self, page_size: u32) -> Self {
		self.page_size = page_size.max(1);
		self
	}

	/// Syncs the map, persisting page by page.
	///
	/// Each page is committed before the next is requested, so a failed
	/// run leaves completed pages behind and a rerun finishes the rest.
	pub async fn run(&self) -> Result<SyncReport, ProviderError> {
		let prefix = keys::remote_prefix(&self.path);
		let mut report = SyncReport::default();
		let mut start: Option<Vec<u8>> = None;
		loop {
			let page =
				self.source.fetch_page(&prefix, self.page_size, start.as_deref(), None).await?;
			let values = self.source.fetch_values(&page.keys, None).await?;
			let entries: Vec<CacheEntry> = page
				.keys
				.iter()
				.zip(values)
				.map(|(key, payload)| self.entry_for(&prefix, key, payload))
				.collect();
			self.cache.save(&entries, &[]).await?;
			report.pages += 1;
			report.keys += entries.len() as u64;
			log::debug!("synced page {} of {} ({} keys so far)", report.pages, self.path, report.keys);
			if page.complete {
				break;
			}
			start = page.next;
		}
		Ok(report)
	}

	/// Rebuilds the map from scratch in one atomic swap.
	///
	/// Cached keys that no longer exist on chain disappear together with
	/// the arrival of the new set, so readers never see a mix of eras.
	pub async fn reindex(&self) -> Result<SyncReport, ProviderError> {
		let prefix = keys::remote_prefix(&self.path);
		let mut report = SyncReport::default();
		let mut entries = Vec::new();
		let mut start: Option<Vec<u8>> = None;
		loop {
			let page =
				self.source.fetch_page(&prefix, self.page_size, start.as_deref(), None).await?;
			let values = self.source.fetch_values(&page.keys, None).await?;
			entries.extend(
				page.keys.iter().zip(values).map(|(key, payload)| self.entry_for(&prefix, key, payload)),
			);
			report.pages += 1;
			if page.complete {
				break;
			}
			start = page.next;
		}
		report.keys = entries.len() as u64;
		self.cache.replace(&keys::local_prefix(&self.chain_id, &self.path), &entries).await?;
		log::debug!("reindexed {} ({} keys)", self.path, report.keys);
		Ok(report)
	}

	fn entry_for(&self, prefix: &[u8], key: &[u8], payload: Option<Vec<u8>>) -> CacheEntry {
		let suffix = key.get(prefix.len()..).unwrap_or_default();
		CacheEntry { identifier: keys::local_key(&self.chain_id, &self.path, suffix), payload }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dev::{self, ALICE, AccountLayout, BOB};

	const CHAIN: &str = "westend";

	fn account_path() -> StoragePath {
		StoragePath::new("System", "Account")
	}

	fn local_id(account: &[u8; 32]) -> String {
		let remote = dev::account_storage_key(account);
		keys::local_key(CHAIN, &account_path(), &remote[32..])
	}

	fn seeded_source() -> Arc<dev::MockSource> {
		let source = Arc::new(dev::MockSource::new(AccountLayout::Current));
		source.set_value(dev::account_storage_key(&ALICE), dev::encode_account_info(1, 100, 0, 0));
		source.set_value(dev::account_storage_key(&BOB), dev::encode_account_info(2, 200, 0, 0));
		source
	}

	#[tokio::test]
	async fn syncs_a_map_across_pages() {
		let source = seeded_source();
		let cache = Arc::new(CacheRepository::in_memory().await.unwrap());
		let sync = PrefixSync::new(source, cache.clone(), CHAIN, account_path()).with_page_size(1);

		let report = sync.run().await.unwrap();
		assert_eq!(report.keys, 2);
		assert!(report.pages >= 2);
		let entries = cache.fetch_all(&keys::local_prefix(CHAIN, &account_path())).await.unwrap();
		assert_eq!(entries.len(), 2);
		assert!(cache.fetch(&local_id(&ALICE)).await.unwrap().is_some());
		assert!(cache.fetch(&local_id(&BOB)).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn interrupted_runs_keep_their_pages_and_finish_on_rerun() {
		let source = seeded_source();
		let cache = Arc::new(CacheRepository::in_memory().await.unwrap());
		let sync =
			PrefixSync::new(source.clone(), cache.clone(), CHAIN, account_path()).with_page_size(1);

		// Page 1 is fetch_page + fetch_values; fail the second page's values.
		source.set_fail_after(3);
		assert!(sync.run().await.is_err());
		assert_eq!(cache.fetch_all(&keys::local_prefix(CHAIN, &account_path())).await.unwrap().len(), 1);

		let report = sync.run().await.unwrap();
		assert_eq!(report.keys, 2);
		assert_eq!(cache.fetch_all(&keys::local_prefix(CHAIN, &account_path())).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn reindex_drops_keys_that_left_the_map() {
		let source = seeded_source();
		let cache = Arc::new(CacheRepository::in_memory().await.unwrap());
		let stale = keys::local_key(CHAIN, &account_path(), &[0xde, 0xad]);
		cache
			.save(&[CacheEntry { identifier: stale.clone(), payload: Some(vec![1]) }], &[])
			.await
			.unwrap();

		let sync = PrefixSync::new(source, cache.clone(), CHAIN, account_path());
		let report = sync.reindex().await.unwrap();
		assert_eq!(report.keys, 2);
		assert!(cache.fetch(&stale).await.unwrap().is_none());
		assert!(cache.fetch(&local_id(&ALICE)).await.unwrap().is_some());
	}
}
