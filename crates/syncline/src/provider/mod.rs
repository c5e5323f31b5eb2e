// SPDX-License-Identifier: GPL-3.0

//! Observable storage values with remote refresh and local fallback.
//!
//! A [`StorageValueProvider`] owns one storage entry end to end: it holds
//! the entry's remote key and cache identifier, serves reads from memory,
//! falls back to the cache, and refreshes from the node whenever its
//! [`TriggerPolicy`] fires. Observers receive the resulting [`Change`]s
//! over a channel; equal values produce no event.
//!
//! ```text
//!   fetch / refresh / trigger
//!            |
//!            v
//!   +------------------+   coalesced   +---------------------+
//!   |     provider     | ------------> |     update run      |
//!   |  memory | cache  |  (<= 1 live)  | factory -+          |
//!   +------------------+               |          +-> apply  |
//!            |                         | fetch ---+          |
//!            v                         +---------------------+
//!     Change / Error events                       |
//!                                                 v
//!                                     cache write + diff dispatch
//! ```
//!
//! # Design Decision: Coalesced Update Runs
//!
//! Every refresh trigger funnels through [`StorageValueProvider::refresh`]
//! internals that keep at most one update run in flight per entry:
//!
//! 1. A trigger that arrives while a run is live attaches to that run's
//!    completion channel instead of starting a second one, so bursts of
//!    triggers cost one node round trip.
//! 2. The run itself is a small task graph: metadata lookup and the
//!    storage fetch run as parallel parents of the apply step, which
//!    waits on both.
//! 3. A run failure resolves every attached waiter with the same shared
//!    error while the previously served value stays untouched. Stale data
//!    plus a reported error always beats no data.

use crate::{
	cache::{CacheEntry, CacheRepository},
	codec::StorageDecode,
	error::ProviderError,
	keys::{self, KeyParam, StoragePath},
	metadata::{CoderFactory, RuntimeService},
	source::StorageSource,
};
use futures::StreamExt;
use parking_lot::Mutex;
pub use registry::ProviderRegistry;
use std::{
	slice,
	sync::{
		Arc, Weak,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};
use syncline_graph::{GraphConfig, Priority, TaskGraph};
use tokio::{
	sync::{mpsc, watch},
	task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

mod registry;

/// Delay before a broken subscription is re-established.
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// When a provider refreshes from the node on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
	on_init: bool,
	on_add_observer: bool,
	on_subscription: bool,
}

impl TriggerPolicy {
	/// No automatic refreshes; only explicit [`StorageValueProvider::refresh`]
	/// calls (and cold [`StorageValueProvider::fetch`]es) reach the node.
	pub fn manual() -> Self {
		Self { on_init: false, on_add_observer: false, on_subscription: false }
	}

	pub fn with_refresh_on_init(mut self, on_init: bool) -> Self {
		self.on_init = on_init;
		self
	}

	pub fn with_refresh_on_add_observer(mut self, on_add_observer: bool) -> Self {
		self.on_add_observer = on_add_observer;
		self
	}

	/// Keeps a storage subscription open and refreshes when the entry's
	/// key is reported changed.
	pub fn with_subscription(mut self, on_subscription: bool) -> Self {
		self.on_subscription = on_subscription;
		self
	}

	pub fn on_init(&self) -> bool {
		self.on_init
	}

	pub fn on_add_observer(&self) -> bool {
		self.on_add_observer
	}

	pub fn on_subscription(&self) -> bool {
		self.on_subscription
	}
}

impl Default for TriggerPolicy {
	fn default() -> Self {
		Self { on_init: true, on_add_observer: true, on_subscription: false }
	}
}

/// Options for [`StorageValueProvider::add_observer`].
#[derive(Debug, Clone, Copy)]
pub struct ObserverOptions {
	emit_current: bool,
}

impl ObserverOptions {
	/// Whether the observer receives the already-known value as an
	/// immediate synthetic [`Change::Insert`].
	pub fn with_emit_current(mut self, emit_current: bool) -> Self {
		self.emit_current = emit_current;
		self
	}

	pub fn emit_current(&self) -> bool {
		self.emit_current
	}
}

impl Default for ObserverOptions {
	fn default() -> Self {
		Self { emit_current: true }
	}
}

/// A change to an observed storage entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
	/// The entry gained a value it did not have before.
	Insert(T),
	/// The entry's value changed.
	Update(T),
	/// The entry no longer has a value.
	Delete,
}

/// What observers receive.
#[derive(Debug, Clone)]
pub enum ProviderEvent<T> {
	Change(Change<T>),
	/// A refresh failed; the last served value still stands.
	Error(Arc<ProviderError>),
}

/// Handle identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Completion state of an update run, published on a watch channel so any
/// number of triggers can await the same run.
#[derive(Debug, Clone, Default)]
enum RunState {
	#[default]
	Running,
	Finished(Option<Arc<ProviderError>>),
}

struct ProviderState<T> {
	/// `None` until first resolution; `Some(None)` is known-empty.
	current: Option<Option<T>>,
	inflight: Option<watch::Receiver<RunState>>,
	inflight_cancel: Option<CancellationToken>,
}

impl<T> Default for ProviderState<T> {
	fn default() -> Self {
		Self { current: None, inflight: None, inflight_cancel: None }
	}
}

type ObserverTable<T> = Vec<(ObserverId, mpsc::UnboundedSender<ProviderEvent<T>>)>;

/// Serves one storage entry and keeps it fresh.
///
/// Created through [`StorageValueProvider::new`] (usually via a
/// [`ProviderRegistry`], which shares one provider per entry and type).
pub struct StorageValueProvider<T> {
	weak_self: Weak<Self>,
	chain_id: String,
	path: StoragePath,
	remote_key: Vec<u8>,
	local_key: String,
	source: Arc<dyn StorageSource>,
	cache: Arc<CacheRepository>,
	runtime: Arc<RuntimeService>,
	trigger: TriggerPolicy,
	graph_config: GraphConfig,
	state: Mutex<ProviderState<T>>,
	observers: Mutex<ObserverTable<T>>,
	watch_task: Mutex<Option<JoinHandle<()>>>,
	next_observer: AtomicU64,
}

impl<T> StorageValueProvider<T> {
	/// Cache identifier of the served entry.
	pub fn local_key(&self) -> &str {
		&self.local_key
	}

	pub fn path(&self) -> &StoragePath {
		&self.path
	}

	pub fn chain_id(&self) -> &str {
		&self.chain_id
	}

	/// Currently registered observers.
	pub fn observer_count(&self) -> usize {
		self.observers.lock().len()
	}

	/// Deregisters an observer; its channel closes. Returns whether the
	/// id was registered.
	pub fn remove_observer(&self, id: ObserverId) -> bool {
		let mut observers = self.observers.lock();
		let before = observers.len();
		observers.retain(|(observer, _)| *observer != id);
		before != observers.len()
	}

	/// Stops the subscription task and cancels any in-flight update run.
	pub fn close(&self) {
		if let Some(task) = self.watch_task.lock().take() {
			task.abort();
		}
		let mut state = self.state.lock();
		if let Some(token) = state.inflight_cancel.take() {
			token.cancel();
		}
		state.inflight = None;
	}
}

impl<T> StorageValueProvider<T>
where
	T: StorageDecode + Clone + PartialEq,
{
	/// Builds a provider for one storage entry and starts its triggers.
	///
	/// `params` must match the storage item's declared map parameters;
	/// key encoding errors surface here, before anything is spawned.
	pub async fn new(
		source: Arc<dyn StorageSource>,
		cache: Arc<CacheRepository>,
		runtime: Arc<RuntimeService>,
		chain_id: impl Into<String>,
		path: StoragePath,
		params: Vec<KeyParam>,
		trigger: TriggerPolicy,
	) -> Result<Arc<Self>, ProviderError> {
		let chain_id = chain_id.into();
		let factory = runtime.coder_factory().await?;
		let encoded = keys::encode_params(&factory, &path, &params)?;
		let suffix = keys::param_suffix(&factory, &path, &encoded)?;
		let local_key = keys::local_key(&chain_id, &path, &suffix);
		let mut remote_key = keys::remote_prefix(&path);
		remote_key.extend_from_slice(&suffix);

		let provider = Arc::new_cyclic(|weak| Self {
			weak_self: weak.clone(),
			chain_id,
			path,
			remote_key,
			local_key,
			source,
			cache,
			runtime,
			trigger,
			graph_config: GraphConfig::default(),
			state: Mutex::new(ProviderState::default()),
			observers: Mutex::new(Vec::new()),
			watch_task: Mutex::new(None),
			next_observer: AtomicU64::new(0),
		});
		provider.start();
		Ok(provider)
	}

	fn start(&self) {
		if self.trigger.on_init() {
			self.spawn_refresh(false);
		}
		if self.trigger.on_subscription() {
			self.start_watching();
		}
	}

	/// Returns the entry's value, `None` when the entry is known empty.
	///
	/// Resolution order: served value, then cache, then a (coalesced)
	/// remote refresh. Only a cold provider with a cold cache waits on
	/// the network.
	pub async fn fetch(&self) -> Result<Option<T>, ProviderError> {
		if let Some(current) = self.state.lock().current.clone() {
			return Ok(current);
		}
		match self.load_local().await {
			Ok(Some(local)) => {
				let mut state = self.state.lock();
				if state.current.is_none() {
					state.current = Some(local.clone());
					return Ok(local);
				}
				return Ok(state.current.clone().unwrap_or(local));
			},
			Ok(None) => {},
			Err(error) => log::debug!("local read of {} failed: {error}", self.local_key),
		}
		let mut outcome = self.begin_refresh(false);
		match outcome.wait_for(|run| matches!(run, RunState::Finished(_))).await {
			Ok(run) =>
				if let RunState::Finished(Some(error)) = &*run {
					return Err(ProviderError::Shared(error.clone()));
				},
			Err(_) => return Err(ProviderError::Cancelled),
		}
		Ok(self.state.lock().current.clone().unwrap_or(None))
	}

	/// Forces a refresh from the node and waits for it.
	///
	/// Attaches to an already-running update run if there is one; the
	/// forced diff semantics then apply to the next run started after it.
	pub async fn refresh(&self) -> Result<(), ProviderError> {
		let mut outcome = self.begin_refresh(true);
		match outcome.wait_for(|run| matches!(run, RunState::Finished(_))).await {
			Ok(run) => match &*run {
				RunState::Finished(Some(error)) => Err(ProviderError::Shared(error.clone())),
				_ => Ok(()),
			},
			Err(_) => Err(ProviderError::Cancelled),
		}
	}

	/// Registers an observer and returns its event channel.
	///
	/// With [`ObserverOptions::with_emit_current`] the observer first
	/// receives the known value as a synthetic [`Change::Insert`], sourced
	/// from memory or the cache without touching the network.
	pub async fn add_observer(
		&self,
		options: ObserverOptions,
	) -> (ObserverId, mpsc::UnboundedReceiver<ProviderEvent<T>>) {
		let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = mpsc::unbounded_channel();
		if options.emit_current() && self.state.lock().current.is_none() {
			match self.load_local().await {
				Ok(Some(local)) => {
					let mut state = self.state.lock();
					if state.current.is_none() {
						state.current = Some(local);
					}
				},
				Ok(None) => {},
				Err(error) => log::debug!("local read of {} failed: {error}", self.local_key),
			}
		}
		{
			let mut observers = self.observers.lock();
			if options.emit_current() &&
				let Some(Some(value)) = self.state.lock().current.clone()
			{
				let _ = tx.send(ProviderEvent::Change(Change::Insert(value)));
			}
			observers.push((id, tx));
		}
		if self.trigger.on_add_observer() {
			self.spawn_refresh(false);
		}
		(id, rx)
	}

	fn spawn_refresh(&self, force: bool) {
		let _ = self.begin_refresh(force);
	}

	/// Starts an update run, or attaches to the one already in flight.
	fn begin_refresh(&self, force: bool) -> watch::Receiver<RunState> {
		let mut state = self.state.lock();
		if let Some(inflight) = &state.inflight {
			// An Err here means the run task died without reporting.
			if inflight.has_changed().is_ok() {
				return inflight.clone();
			}
		}
		let (done, updates) = watch::channel(RunState::Running);
		let token = CancellationToken::new();
		state.inflight = Some(updates.clone());
		state.inflight_cancel = Some(token.clone());
		drop(state);

		let Some(provider) = self.weak_self.upgrade() else {
			return cancelled_run();
		};
		tokio::spawn(provider.run_refresh(force, token, done));
		updates
	}

	async fn run_refresh(
		self: Arc<Self>,
		force: bool,
		token: CancellationToken,
		done: watch::Sender<RunState>,
	) {
		let outcome = tokio::select! {
			biased;
			_ = token.cancelled() => Err(Arc::new(ProviderError::Cancelled)),
			result = self.execute_pipeline(force) => result,
		};
		let error = outcome.err();
		{
			let mut state = self.state.lock();
			state.inflight = None;
			state.inflight_cancel = None;
		}
		if let Some(error) = &error {
			log::debug!("update of {} failed: {error}", self.local_key);
			self.dispatch_error(error.clone());
		}
		let _ = done.send(RunState::Finished(error));
	}

	/// One update run as a task graph: metadata and the storage fetch run
	/// in parallel, apply waits on both.
	async fn execute_pipeline(&self, force: bool) -> Result<(), Arc<ProviderError>> {
		let graph = TaskGraph::new(self.graph_config.clone());
		let factory_handle = {
			let runtime = self.runtime.clone();
			graph.submit("coder-factory", Priority::High, vec![], async move {
				runtime.coder_factory().await.map_err(|error| Arc::new(ProviderError::from(error)))
			})
		};
		let fetch_handle = {
			let source = self.source.clone();
			let key = self.remote_key.clone();
			graph.submit("fetch-remote", Priority::Normal, vec![], async move {
				source.fetch_one(&key, None).await.map_err(|error| Arc::new(ProviderError::from(error)))
			})
		};
		let apply_handle = {
			let Some(provider) = self.weak_self.upgrade() else {
				return Err(Arc::new(ProviderError::Cancelled));
			};
			let factory = factory_handle.clone();
			let fetch = fetch_handle.clone();
			graph.submit(
				"apply-update",
				Priority::Normal,
				vec![factory_handle.dependency(), fetch_handle.dependency()],
				async move {
					let factory = match factory.result().await {
						Ok(result) => result?,
						Err(_) => return Err(Arc::new(ProviderError::Cancelled)),
					};
					let payload = match fetch.result().await {
						Ok(result) => result?,
						Err(_) => return Err(Arc::new(ProviderError::Cancelled)),
					};
					provider.apply_update(&factory, payload, force).await.map_err(Arc::new)
				},
			)
		};
		match apply_handle.result().await {
			Ok(outcome) => outcome,
			Err(_) => Err(Arc::new(ProviderError::Cancelled)),
		}
	}

	/// Persists a fetched payload, decodes it, and dispatches the diff.
	///
	/// The raw payload is cached before decoding is attempted, so a value
	/// this build cannot decode is still preserved for one that can. A
	/// decode failure leaves the served value untouched.
	async fn apply_update(
		&self,
		factory: &CoderFactory,
		payload: Option<Vec<u8>>,
		force: bool,
	) -> Result<(), ProviderError> {
		let mut soft_error: Option<ProviderError> = None;
		let entry = CacheEntry { identifier: self.local_key.clone(), payload: payload.clone() };
		if let Err(error) = self.cache.save(slice::from_ref(&entry), &[]).await {
			log::debug!("caching {} failed: {error}", self.local_key);
			soft_error = Some(error.into());
		}

		let decoded: Option<T> = match &payload {
			Some(bytes) => Some(T::decode_storage(bytes, &self.path, factory)?),
			None => None,
		};

		let snapshot_result = match decoded.as_ref().and_then(T::encode_snapshot) {
			Some(snapshot) =>
				self.cache.save_decoded(&self.local_key, factory.spec_version(), &snapshot).await,
			None => self.cache.delete_decoded(&self.local_key).await,
		};
		if let Err(error) = snapshot_result {
			log::debug!("snapshot of {} failed: {error}", self.local_key);
			if soft_error.is_none() {
				soft_error = Some(error.into());
			}
		}

		let change = {
			let mut state = self.state.lock();
			let change = diff(state.current.as_ref(), decoded.as_ref(), force);
			state.current = Some(decoded);
			change
		};
		if let Some(change) = &change {
			self.dispatch_change(change);
		}
		if let Some(error) = soft_error {
			self.dispatch_error(Arc::new(error));
		}
		Ok(())
	}

	/// Reads the entry from the cache without touching the network.
	///
	/// `Ok(None)` means the cache has never seen the entry;
	/// `Ok(Some(None))` means it was fetched and found empty.
	async fn load_local(&self) -> Result<Option<Option<T>>, ProviderError> {
		if let Some(snapshot) = self.cache.fetch_decoded(&self.local_key).await? &&
			let Some(value) = T::decode_snapshot(&snapshot.payload)
		{
			return Ok(Some(Some(value)));
		}
		let Some(entry) = self.cache.fetch(&self.local_key).await? else {
			return Ok(None);
		};
		let Some(bytes) = entry.payload else {
			return Ok(Some(None));
		};
		let factory = self.runtime.coder_factory().await?;
		Ok(Some(Some(T::decode_storage(&bytes, &self.path, &factory)?)))
	}

	fn dispatch_change(&self, change: &Change<T>) {
		self.observers
			.lock()
			.retain(|(_, tx)| tx.send(ProviderEvent::Change(change.clone())).is_ok());
	}

	fn dispatch_error(&self, error: Arc<ProviderError>) {
		self.observers.lock().retain(|(_, tx)| tx.send(ProviderEvent::Error(error.clone())).is_ok());
	}

	fn start_watching(&self) {
		let mut watch_task = self.watch_task.lock();
		if watch_task.is_some() {
			return;
		}
		*watch_task = Some(tokio::spawn(Self::watch_loop(
			self.weak_self.clone(),
			self.source.clone(),
			self.remote_key.clone(),
			self.local_key.clone(),
		)));
	}

	/// Subscription task: refreshes on reported changes to the entry's
	/// key and re-subscribes after transport failures.
	///
	/// Holds only a weak reference so an abandoned provider can drop.
	async fn watch_loop(
		weak: Weak<Self>,
		source: Arc<dyn StorageSource>,
		remote_key: Vec<u8>,
		local_key: String,
	) {
		loop {
			match source.subscribe(slice::from_ref(&remote_key)).await {
				Ok(mut updates) => {
					log::debug!("watching {local_key}");
					while let Some(update) = updates.next().await {
						let Some(provider) = weak.upgrade() else { return };
						match update {
							Ok(update) =>
								if update.changes.iter().any(|(key, _)| key == &remote_key) {
									provider.spawn_refresh(false);
								},
							Err(error) => {
								provider.dispatch_error(Arc::new(error.into()));
								break;
							},
						}
					}
				},
				Err(error) => {
					let Some(provider) = weak.upgrade() else { return };
					provider.dispatch_error(Arc::new(error.into()));
				},
			}
			if weak.upgrade().is_none() {
				return;
			}
			tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
		}
	}
}

impl<T> Drop for StorageValueProvider<T> {
	fn drop(&mut self) {
		self.close();
	}
}

/// A receiver already resolved to cancellation, for paths where the
/// provider is mid-teardown.
fn cancelled_run() -> watch::Receiver<RunState> {
	let (_done, updates) = watch::channel(RunState::Finished(Some(Arc::new(ProviderError::Cancelled))));
	updates
}

/// Diffs the next resolved value against the previously served state.
///
/// `previous` of `None` means nothing was served yet; `Some(None)` means
/// the entry was served as known-empty.
fn diff<T: Clone + PartialEq>(
	previous: Option<&Option<T>>,
	next: Option<&T>,
	force: bool,
) -> Option<Change<T>> {
	match (previous, next) {
		(None, Some(value)) => Some(Change::Insert(value.clone())),
		(Some(None), Some(value)) => Some(Change::Insert(value.clone())),
		(Some(Some(_)), Some(value)) if force => Some(Change::Update(value.clone())),
		(Some(Some(old)), Some(value)) if old != value => Some(Change::Update(value.clone())),
		(Some(Some(_)), Some(_)) => None,
		(Some(Some(_)), None) => Some(Change::Delete),
		(None, None) | (Some(None), None) => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_policy_refreshes_on_init_and_observers() {
		let policy = TriggerPolicy::default();
		assert!(policy.on_init());
		assert!(policy.on_add_observer());
		assert!(!policy.on_subscription());
		assert!(!TriggerPolicy::manual().on_init());
	}

	#[test]
	fn observers_emit_current_by_default() {
		assert!(ObserverOptions::default().emit_current());
		assert!(!ObserverOptions::default().with_emit_current(false).emit_current());
	}

	#[test]
	fn first_value_is_an_insert() {
		assert_eq!(diff::<u32>(None, Some(&5), false), Some(Change::Insert(5)));
		assert_eq!(diff::<u32>(Some(&None), Some(&5), false), Some(Change::Insert(5)));
	}

	#[test]
	fn equal_values_produce_no_event() {
		assert_eq!(diff::<u32>(Some(&Some(5)), Some(&5), false), None);
	}

	#[test]
	fn changed_values_are_updates() {
		assert_eq!(diff::<u32>(Some(&Some(5)), Some(&6), false), Some(Change::Update(6)));
	}

	#[test]
	fn forced_diffs_update_even_when_equal() {
		assert_eq!(diff::<u32>(Some(&Some(5)), Some(&5), true), Some(Change::Update(5)));
	}

	#[test]
	fn disappearing_values_are_deletes() {
		assert_eq!(diff::<u32>(Some(&Some(5)), None, false), Some(Change::Delete));
	}

	#[test]
	fn empty_stays_silent() {
		assert_eq!(diff::<u32>(None, None, false), None);
		assert_eq!(diff::<u32>(Some(&None), None, false), None);
		// Even forced: there is no value to report for an empty entry.
		assert_eq!(diff::<u32>(Some(&None), None, true), None);
	}
}
