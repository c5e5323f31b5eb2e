// SPDX-License-Identifier: GPL-3.0

//! Shared provider instances, one per entry and value type.
//!
//! Several screens observing the same entry must share one
//! [`StorageValueProvider`], otherwise each would fetch and cache on its
//! own. The registry keys providers by `(local key, value type)` and
//! hands out clones of the stored [`Arc`].
//!
//! # Design Decision: Counted References, Lazy Sweeps
//!
//! The registry holds strong references and reclaims by counting:
//!
//! 1. An entry is unused when the registry holds the only [`Arc`] and no
//!    observers are registered. Unused entries are swept on every lookup
//!    and on explicit [`ProviderRegistry::evict_unused`] calls.
//! 2. Sweeping closes the provider first, which stops its subscription
//!    task and cancels any in-flight run.
//! 3. Creation runs under the registry lock, so concurrent lookups of
//!    the same entry build exactly one provider.

use super::StorageValueProvider;
use crate::{codec::StorageDecode, error::ProviderError};
use std::{
	any::{Any, TypeId},
	collections::HashMap,
	future::Future,
	sync::Arc,
};
use tokio::sync::Mutex;

/// Type-erased registry entry.
trait RegisteredProvider: Any + Send + Sync {
	fn observer_count(&self) -> usize;
	fn close(&self);
	fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> RegisteredProvider for StorageValueProvider<T>
where
	T: StorageDecode + Clone + PartialEq,
{
	fn observer_count(&self) -> usize {
		StorageValueProvider::observer_count(self)
	}

	fn close(&self) {
		StorageValueProvider::close(self)
	}

	fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
		self
	}
}

/// Shares providers across consumers and reclaims abandoned ones.
#[derive(Default)]
pub struct ProviderRegistry {
	entries: Mutex<HashMap<(String, TypeId), Arc<dyn RegisteredProvider>>>,
}

impl ProviderRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the provider registered for `local_key` and `T`, building
	/// it with `build` if there is none.
	pub async fn get_or_create<T, F, Fut>(
		&self,
		local_key: &str,
		build: F,
	) -> Result<Arc<StorageValueProvider<T>>, ProviderError>
	where
		T: StorageDecode + Clone + PartialEq,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Arc<StorageValueProvider<T>>, ProviderError>>,
	{
		let mut entries = self.entries.lock().await;
		sweep(&mut entries);
		let key = (local_key.to_string(), TypeId::of::<T>());
		if let Some(existing) = entries.get(&key) &&
			let Ok(provider) = existing.clone().as_any().downcast::<StorageValueProvider<T>>()
		{
			return Ok(provider);
		}
		let provider = build().await?;
		entries.insert(key, provider.clone());
		Ok(provider)
	}

	/// Sweeps unused entries now. Returns how many were evicted.
	pub async fn evict_unused(&self) -> usize {
		let mut entries = self.entries.lock().await;
		let before = entries.len();
		sweep(&mut entries);
		before - entries.len()
	}

	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.lock().await.is_empty()
	}
}

fn sweep(entries: &mut HashMap<(String, TypeId), Arc<dyn RegisteredProvider>>) {
	entries.retain(|(key, _), provider| {
		let unused = Arc::strong_count(provider) == 1 && provider.observer_count() == 0;
		if unused {
			log::debug!("evicting provider for {key}");
			provider.close();
		}
		!unused
	});
}
