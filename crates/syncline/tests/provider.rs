// SPDX-License-Identifier: GPL-3.0

//! End-to-end provider flows over a mock node and a shared cache.

use std::{sync::Arc, time::Duration};
use syncline::{
	CacheRepository, Change, KeyParam, ObserverOptions, ProviderError, ProviderEvent,
	RuntimeService, StoragePath, StorageValueProvider, TriggerPolicy,
	dev::{self, ALICE, AccountLayout, BOB, MockSource},
	types::{AccountInfo, FLAGS_NEW_LOGIC},
};
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_WAIT: Duration = Duration::from_secs(5);
const SILENCE_WAIT: Duration = Duration::from_millis(300);

struct TestEnv {
	source: Arc<MockSource>,
	cache: Arc<CacheRepository>,
	runtime: Arc<RuntimeService>,
	alice_key: Vec<u8>,
}

impl TestEnv {
	async fn new() -> Self {
		Self::with_layout(AccountLayout::Current).await
	}

	async fn with_layout(layout: AccountLayout) -> Self {
		let _ = env_logger::try_init();
		let source = Arc::new(MockSource::new(layout));
		let cache = Arc::new(CacheRepository::in_memory().await.expect("in-memory cache"));
		let runtime = Arc::new(RuntimeService::new(source.clone()));
		Self { source, cache, runtime, alice_key: dev::account_storage_key(&ALICE) }
	}

	async fn provider(&self, trigger: TriggerPolicy) -> Arc<StorageValueProvider<AccountInfo>> {
		self.provider_for(&ALICE, trigger).await
	}

	async fn provider_for(
		&self,
		account: &[u8; 32],
		trigger: TriggerPolicy,
	) -> Arc<StorageValueProvider<AccountInfo>> {
		StorageValueProvider::new(
			self.source.clone(),
			self.cache.clone(),
			self.runtime.clone(),
			"westend",
			StoragePath::new("System", "Account"),
			vec![KeyParam::raw(account.to_vec())],
			trigger,
		)
		.await
		.expect("provider")
	}
}

async fn recv(
	events: &mut UnboundedReceiver<ProviderEvent<AccountInfo>>,
) -> ProviderEvent<AccountInfo> {
	tokio::time::timeout(EVENT_WAIT, events.recv())
		.await
		.expect("timed out waiting for an event")
		.expect("event channel closed")
}

async fn assert_silent(events: &mut UnboundedReceiver<ProviderEvent<AccountInfo>>) {
	let outcome = tokio::time::timeout(SILENCE_WAIT, events.recv()).await;
	assert!(outcome.is_err(), "expected no event, got {outcome:?}");
}

async fn wait_for_subscription(source: &MockSource) {
	tokio::time::timeout(EVENT_WAIT, async {
		while source.subscriber_count() == 0 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("subscription was never opened");
}

#[tokio::test(flavor = "multi_thread")]
async fn account_changes_flow_to_observers() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	let provider = env
		.provider(TriggerPolicy::default().with_subscription(true).with_refresh_on_add_observer(false))
		.await;
	assert_eq!(provider.fetch().await.expect("initial fetch").expect("record").data.free, 100);

	let (_id, mut events) = provider.add_observer(ObserverOptions::default()).await;
	let first = recv(&mut events).await;
	assert!(
		matches!(&first, ProviderEvent::Change(Change::Insert(info)) if info.data.free == 100),
		"unexpected first event: {first:?}"
	);

	wait_for_subscription(&env.source).await;
	env.source
		.push_update(vec![(env.alice_key.clone(), Some(dev::encode_account_info(2, 150, 0, 0)))]);
	let second = recv(&mut events).await;
	assert!(
		matches!(&second, ProviderEvent::Change(Change::Update(info)) if info.data.free == 150),
		"unexpected second event: {second:?}"
	);

	// The same bytes again: the update run happens, the diff stays empty.
	env.source
		.push_update(vec![(env.alice_key.clone(), Some(dev::encode_account_info(2, 150, 0, 0)))]);
	assert_silent(&mut events).await;

	env.source.push_update(vec![(env.alice_key.clone(), None)]);
	let third = recv(&mut events).await;
	assert!(
		matches!(&third, ProviderEvent::Change(Change::Delete)),
		"unexpected third event: {third:?}"
	);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_cold_fetches_share_one_request() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	let provider = env.provider(TriggerPolicy::manual()).await;
	env.source.set_delay(Some(Duration::from_millis(100)));

	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let provider = provider.clone();
			tokio::spawn(async move { provider.fetch().await })
		})
		.collect();
	for task in tasks {
		let fetched = task.await.expect("task").expect("fetch");
		assert_eq!(fetched.expect("record").data.free, 100);
	}
	assert_eq!(env.source.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn runtime_upgrades_switch_the_decoded_layout() {
	let env = TestEnv::with_layout(AccountLayout::Legacy).await;
	env.source.set_value(env.alice_key.clone(), dev::encode_legacy_account_info(1, 500, 40, 70));
	let provider = env.provider(TriggerPolicy::manual()).await;

	let before = provider.fetch().await.expect("fetch").expect("record");
	assert_eq!(before.data.free, 500);
	assert_eq!(before.data.frozen, 70);
	assert_eq!(before.data.flags, 0);

	let downloads = env.source.metadata_count();
	env.source.set_metadata(AccountLayout::Current, dev::CURRENT_SPEC_VERSION);
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(2, 600, 0, 80));
	provider.refresh().await.expect("refresh");

	let after = provider.fetch().await.expect("fetch").expect("record");
	assert_eq!(after.data.free, 600);
	assert_eq!(after.data.frozen, 80);
	assert_ne!(after.data.flags & FLAGS_NEW_LOGIC, 0);
	assert_eq!(env.source.metadata_count(), downloads + 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_keep_serving_the_last_value() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	let provider = env.provider(TriggerPolicy::manual()).await;
	let (_id, mut events) =
		provider.add_observer(ObserverOptions::default().with_emit_current(false)).await;

	assert_eq!(provider.fetch().await.expect("fetch").expect("record").data.free, 100);
	let first = recv(&mut events).await;
	assert!(matches!(first, ProviderEvent::Change(Change::Insert(_))));

	env.source.set_fail(true);
	let error = provider.refresh().await.expect_err("node is down");
	assert!(matches!(&error, ProviderError::Shared(_)), "unexpected error: {error:?}");

	assert_eq!(provider.fetch().await.expect("stale fetch").expect("record").data.free, 100);
	let report = recv(&mut events).await;
	assert!(matches!(&report, ProviderEvent::Error(_)), "unexpected event: {report:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn decode_failures_leave_value_and_raw_bytes_in_place() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	let provider = env.provider(TriggerPolicy::manual()).await;
	assert_eq!(provider.fetch().await.expect("fetch").expect("record").data.free, 100);

	env.source.set_value(env.alice_key.clone(), vec![1, 2, 3]);
	let error = provider.refresh().await.expect_err("undecodable bytes");
	let ProviderError::Shared(inner) = &error else {
		panic!("expected a shared run error, got {error}");
	};
	assert!(matches!(&**inner, ProviderError::Codec(_)), "unexpected error: {inner}");

	// The served value survives, and the raw bytes are kept for a build
	// that can decode them.
	assert_eq!(provider.fetch().await.expect("stale fetch").expect("record").data.free, 100);
	let entry = env.cache.fetch(provider.local_key()).await.expect("cache read").expect("entry");
	assert_eq!(entry.payload, Some(vec![1, 2, 3]));
}

#[tokio::test(flavor = "multi_thread")]
async fn observers_get_cached_values_when_the_node_is_down() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	{
		let warm = env.provider(TriggerPolicy::manual()).await;
		assert_eq!(warm.fetch().await.expect("fetch").expect("record").data.free, 100);
	}
	let cold = env.provider(TriggerPolicy::manual()).await;
	env.source.set_fail(true);

	let (_id, mut events) = cold.add_observer(ObserverOptions::default()).await;
	let first = recv(&mut events).await;
	assert!(
		matches!(&first, ProviderEvent::Change(Change::Insert(info)) if info.data.free == 100),
		"unexpected event: {first:?}"
	);
	assert_eq!(env.source.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_refreshes_reemit_unchanged_values() {
	let env = TestEnv::new().await;
	env.source.set_value(env.alice_key.clone(), dev::encode_account_info(1, 100, 0, 0));
	let provider = env.provider(TriggerPolicy::manual()).await;
	let (_id, mut events) =
		provider.add_observer(ObserverOptions::default().with_emit_current(false)).await;

	provider.refresh().await.expect("first refresh");
	let first = recv(&mut events).await;
	assert!(matches!(&first, ProviderEvent::Change(Change::Insert(info)) if info.data.free == 100));

	provider.refresh().await.expect("second refresh");
	let second = recv(&mut events).await;
	assert!(
		matches!(&second, ProviderEvent::Change(Change::Update(info)) if info.data.free == 100),
		"unexpected event: {second:?}"
	);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_entries_are_remembered() {
	let env = TestEnv::new().await;
	let provider = env.provider_for(&BOB, TriggerPolicy::manual()).await;

	assert_eq!(provider.fetch().await.expect("first fetch"), None);
	assert_eq!(env.source.fetch_count(), 1);
	assert_eq!(provider.fetch().await.expect("second fetch"), None);
	assert_eq!(env.source.fetch_count(), 1);

	let entry = env.cache.fetch(provider.local_key()).await.expect("cache read").expect("entry");
	assert_eq!(entry.payload, None);

	// A later provider for the same entry reads the known-empty marker
	// from the cache instead of asking the node again.
	let again = env.provider_for(&BOB, TriggerPolicy::manual()).await;
	assert_eq!(again.fetch().await.expect("cached fetch"), None);
	assert_eq!(env.source.fetch_count(), 1);
}
