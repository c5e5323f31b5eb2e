// SPDX-License-Identifier: GPL-3.0

//! Development and test fixtures: well-known accounts, hand-built runtime
//! metadata, and an in-process [`StorageSource`].
//!
//! The metadata is a real SCALE-encoded V14 bundle built from Rust types,
//! so everything that parses production metadata parses these fixtures
//! through the same code path. Two layouts are provided:
//! [`AccountLayout::Current`] declares the post-migration account data
//! with `frozen`/`flags`, [`AccountLayout::Legacy`] the old
//! `misc_frozen`/`fee_frozen` pair.
//!
//! [`MockSource`] keeps chain state in a map and supports scripted
//! failures, artificial latency, and pushed subscription updates, which
//! is enough to exercise every provider path without a node.

use crate::{
	error::{MetadataError, SourceError},
	keys::{self, StoragePath},
	metadata::CoderFactory,
	source::{H256, KeyPage, StorageSource, StorageUpdate, UpdateStream},
	strings::rpc::methods,
	types::{AccountData, AccountInfo, FLAGS_NEW_LOGIC},
};
use async_trait::async_trait;
use frame_metadata::{
	RuntimeMetadataPrefixed,
	v14::{
		ExtrinsicMetadata, PalletMetadata, PalletStorageMetadata, RuntimeMetadataV14,
		StorageEntryMetadata, StorageEntryModifier, StorageEntryType, StorageHasher,
	},
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use scale::Encode;
use scale_info::{TypeInfo, meta_type};
use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
	time::Duration,
};
use tokio::sync::mpsc;

/// Account id of the well-known `//Alice` dev key.
pub const ALICE: [u8; 32] = [
	0xd4, 0x35, 0x93, 0xc7, 0x15, 0xfd, 0xd3, 0x1c, 0x61, 0x14, 0x1a, 0xbd, 0x04, 0xa9, 0x9f, 0xd6,
	0x82, 0x2c, 0x85, 0x58, 0x85, 0x4c, 0xcd, 0xe3, 0x9a, 0x56, 0x84, 0xe7, 0xa5, 0x6d, 0xa2, 0x7d,
];

/// Account id of the well-known `//Bob` dev key.
pub const BOB: [u8; 32] = [
	0x8e, 0xaf, 0x04, 0x15, 0x16, 0x87, 0x73, 0x63, 0x26, 0xc9, 0xfe, 0xa1, 0x7e, 0x25, 0xfc, 0x52,
	0x87, 0x61, 0x36, 0x93, 0xc9, 0x12, 0x90, 0x9c, 0xb2, 0x26, 0xaa, 0x47, 0x94, 0xf2, 0x6a, 0x48,
];

/// Spec version reported with [`AccountLayout::Current`] metadata.
pub const CURRENT_SPEC_VERSION: u32 = 9430;

/// Spec version reported with [`AccountLayout::Legacy`] metadata.
pub const LEGACY_SPEC_VERSION: u32 = 9260;

/// Which account data layout the fixture metadata declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLayout {
	/// `free`/`reserved`/`frozen`/`flags`.
	Current,
	/// `free`/`reserved`/`misc_frozen`/`fee_frozen`.
	Legacy,
}

impl AccountLayout {
	pub fn spec_version(&self) -> u32 {
		match self {
			Self::Current => CURRENT_SPEC_VERSION,
			Self::Legacy => LEGACY_SPEC_VERSION,
		}
	}
}

/// Post-migration account data as registered in the fixture metadata.
#[derive(TypeInfo)]
pub struct DevAccountData {
	pub free: u128,
	pub reserved: u128,
	pub frozen: u128,
	pub flags: u128,
}

/// Post-migration account record.
#[derive(TypeInfo)]
pub struct DevAccountInfo {
	pub nonce: u32,
	pub consumers: u32,
	pub providers: u32,
	pub sufficients: u32,
	pub data: DevAccountData,
}

/// Pre-migration account data with split freeze buckets.
#[derive(TypeInfo)]
pub struct LegacyAccountData {
	pub free: u128,
	pub reserved: u128,
	pub misc_frozen: u128,
	pub fee_frozen: u128,
}

/// Pre-migration account record.
#[derive(TypeInfo)]
pub struct LegacyAccountInfo {
	pub nonce: u32,
	pub consumers: u32,
	pub providers: u32,
	pub sufficients: u32,
	pub data: LegacyAccountData,
}

/// SCALE-encoded V14 metadata declaring `System.Account`,
/// `System.Number`, and `Timestamp.Now`.
pub fn dev_metadata_bytes(layout: AccountLayout) -> Vec<u8> {
	// subxt's V14 ingestion refuses metadata whose registry lacks outer
	// `RuntimeCall`/`RuntimeEvent` enums or whose extrinsic type has no
	// `Address`/`Signature` parameters; register inert stand-ins.
	#[derive(TypeInfo)]
	enum RuntimeCall {}
	#[derive(TypeInfo)]
	enum RuntimeEvent {}
	#[derive(TypeInfo)]
	struct DevRuntime {
		_call: RuntimeCall,
		_event: RuntimeEvent,
	}
	#[derive(TypeInfo)]
	struct DevExtrinsic<Address, Signature> {
		_address: Address,
		_signature: Signature,
	}
	let account_value = match layout {
		AccountLayout::Current => meta_type::<DevAccountInfo>(),
		AccountLayout::Legacy => meta_type::<LegacyAccountInfo>(),
	};
	let pallets = vec![
		PalletMetadata {
			name: "System",
			storage: Some(PalletStorageMetadata {
				prefix: "System",
				entries: vec![
					StorageEntryMetadata {
						name: "Account",
						modifier: StorageEntryModifier::Optional,
						ty: StorageEntryType::Map {
							hashers: vec![StorageHasher::Blake2_128Concat],
							key: meta_type::<[u8; 32]>(),
							value: account_value,
						},
						default: vec![],
						docs: vec![],
					},
					StorageEntryMetadata {
						name: "Number",
						modifier: StorageEntryModifier::Default,
						ty: StorageEntryType::Plain(meta_type::<u32>()),
						default: 0u32.encode(),
						docs: vec![],
					},
				],
			}),
			calls: None,
			event: None,
			constants: vec![],
			error: None,
			index: 0,
		},
		PalletMetadata {
			name: "Timestamp",
			storage: Some(PalletStorageMetadata {
				prefix: "Timestamp",
				entries: vec![StorageEntryMetadata {
					name: "Now",
					modifier: StorageEntryModifier::Default,
					ty: StorageEntryType::Plain(meta_type::<u64>()),
					default: 0u64.encode(),
					docs: vec![],
				}],
			}),
			calls: None,
			event: None,
			constants: vec![],
			error: None,
			index: 1,
		},
	];
	let extrinsic = ExtrinsicMetadata {
		ty: meta_type::<DevExtrinsic<[u8; 32], [u8; 64]>>(),
		version: 4,
		signed_extensions: vec![],
	};
	let metadata = RuntimeMetadataV14::new(pallets, extrinsic, meta_type::<DevRuntime>());
	RuntimeMetadataPrefixed::from(metadata).encode()
}

/// A [`CoderFactory`] over the fixture metadata.
pub fn dev_metadata(layout: AccountLayout) -> Result<CoderFactory, MetadataError> {
	CoderFactory::try_from_bytes(&dev_metadata_bytes(layout), layout.spec_version())
}

/// SCALE bytes of a current-layout account record.
pub fn encode_account_info(nonce: u32, free: u128, reserved: u128, frozen: u128) -> Vec<u8> {
	AccountInfo {
		nonce,
		consumers: 0,
		providers: 1,
		sufficients: 0,
		data: AccountData { free, reserved, frozen, flags: FLAGS_NEW_LOGIC },
	}
	.encode()
}

/// SCALE bytes of a legacy-layout account record with no reserve.
pub fn encode_legacy_account_info(
	nonce: u32,
	free: u128,
	misc_frozen: u128,
	fee_frozen: u128,
) -> Vec<u8> {
	let mut out = Vec::new();
	nonce.encode_to(&mut out);
	0u32.encode_to(&mut out);
	1u32.encode_to(&mut out);
	0u32.encode_to(&mut out);
	free.encode_to(&mut out);
	0u128.encode_to(&mut out);
	misc_frozen.encode_to(&mut out);
	fee_frozen.encode_to(&mut out);
	out
}

/// The full `System.Account` storage key of an account.
pub fn account_storage_key(account: &[u8; 32]) -> Vec<u8> {
	let mut key = keys::remote_prefix(&StoragePath::new("System", "Account"));
	key.extend_from_slice(&sp_core::blake2_128(account));
	key.extend_from_slice(account);
	key
}

/// In-process [`StorageSource`] backed by a key-value map.
pub struct MockSource {
	values: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
	metadata: RwLock<Vec<u8>>,
	spec_version: AtomicU32,
	finalized: RwLock<H256>,
	fetch_count: AtomicUsize,
	metadata_count: AtomicUsize,
	fail: AtomicBool,
	fail_after: Mutex<Option<usize>>,
	delay: RwLock<Option<Duration>>,
	subscribers: Mutex<Vec<mpsc::UnboundedSender<StorageUpdate>>>,
}

impl MockSource {
	pub fn new(layout: AccountLayout) -> Self {
		Self {
			values: RwLock::new(BTreeMap::new()),
			metadata: RwLock::new(dev_metadata_bytes(layout)),
			spec_version: AtomicU32::new(layout.spec_version()),
			finalized: RwLock::new(H256::zero()),
			fetch_count: AtomicUsize::new(0),
			metadata_count: AtomicUsize::new(0),
			fail: AtomicBool::new(false),
			fail_after: Mutex::new(None),
			delay: RwLock::new(None),
			subscribers: Mutex::new(Vec::new()),
		}
	}

	pub fn set_value(&self, key: Vec<u8>, value: Vec<u8>) {
		self.values.write().insert(key, value);
	}

	pub fn clear_value(&self, key: &[u8]) {
		self.values.write().remove(key);
	}

	/// Simulates a runtime upgrade: new metadata and spec version.
	pub fn set_metadata(&self, layout: AccountLayout, spec_version: u32) {
		*self.metadata.write() = dev_metadata_bytes(layout);
		self.spec_version.store(spec_version, Ordering::SeqCst);
	}

	/// Makes every request fail until reset.
	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	/// Makes the request after the next `calls` requests fail, once.
	pub fn set_fail_after(&self, calls: usize) {
		*self.fail_after.lock() = Some(calls);
	}

	/// Adds latency to every request.
	pub fn set_delay(&self, delay: Option<Duration>) {
		*self.delay.write() = delay;
	}

	/// Storage reads attempted so far (`fetch_one` and `fetch_values`).
	pub fn fetch_count(&self) -> usize {
		self.fetch_count.load(Ordering::SeqCst)
	}

	/// Metadata downloads attempted so far.
	pub fn metadata_count(&self) -> usize {
		self.metadata_count.load(Ordering::SeqCst)
	}

	/// Live subscriptions opened through [`StorageSource::subscribe`].
	pub fn subscriber_count(&self) -> usize {
		self.subscribers.lock().len()
	}

	/// Applies changes to the map and notifies subscribers.
	pub fn push_update(&self, changes: Vec<(Vec<u8>, Option<Vec<u8>>)>) {
		{
			let mut values = self.values.write();
			for (key, value) in &changes {
				match value {
					Some(value) => {
						values.insert(key.clone(), value.clone());
					},
					None => {
						values.remove(key);
					},
				}
			}
		}
		let update = StorageUpdate { block: H256::zero(), changes };
		self.subscribers.lock().retain(|tx| tx.send(update.clone()).is_ok());
	}

	async fn pause_and_check(&self, method: &'static str) -> Result<(), SourceError> {
		let delay = *self.delay.read();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		{
			let mut fail_after = self.fail_after.lock();
			if let Some(remaining) = *fail_after {
				if remaining == 0 {
					*fail_after = None;
					return Err(Self::unavailable(method));
				}
				*fail_after = Some(remaining - 1);
			}
		}
		if self.fail.load(Ordering::SeqCst) {
			return Err(Self::unavailable(method));
		}
		Ok(())
	}

	fn unavailable(method: &'static str) -> SourceError {
		SourceError::ConnectionUnavailable {
			endpoint: "mock".to_string(),
			message: format!("{method} disabled"),
		}
	}
}

#[async_trait]
impl StorageSource for MockSource {
	async fn fetch_one(&self, key: &[u8], _at: Option<H256>) -> Result<Option<Vec<u8>>, SourceError> {
		self.fetch_count.fetch_add(1, Ordering::SeqCst);
		self.pause_and_check(methods::STATE_GET_STORAGE).await?;
		Ok(self.values.read().get(key).cloned())
	}

	async fn fetch_values(
		&self,
		keys: &[Vec<u8>],
		_at: Option<H256>,
	) -> Result<Vec<Option<Vec<u8>>>, SourceError> {
		self.fetch_count.fetch_add(1, Ordering::SeqCst);
		self.pause_and_check(methods::STATE_QUERY_STORAGE_AT).await?;
		let values = self.values.read();
		Ok(keys.iter().map(|key| values.get(key).cloned()).collect())
	}

	async fn fetch_page(
		&self,
		prefix: &[u8],
		count: u32,
		start: Option<&[u8]>,
		_at: Option<H256>,
	) -> Result<KeyPage, SourceError> {
		self.pause_and_check(methods::STATE_GET_KEYS_PAGED).await?;
		let values = self.values.read();
		let keys: Vec<Vec<u8>> = values
			.keys()
			.filter(|key| key.starts_with(prefix))
			.filter(|key| start.is_none_or(|start| key.as_slice() > start))
			.take(count as usize)
			.cloned()
			.collect();
		Ok(KeyPage::from_keys(keys, count))
	}

	async fn subscribe(&self, _keys: &[Vec<u8>]) -> Result<UpdateStream, SourceError> {
		self.pause_and_check(methods::STATE_SUBSCRIBE_STORAGE).await?;
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribers.lock().push(tx);
		let stream = futures::stream::unfold(rx, |mut rx| async move {
			rx.recv().await.map(|update| (Ok(update), rx))
		})
		.boxed();
		Ok(stream)
	}

	async fn finalized_head(&self) -> Result<H256, SourceError> {
		self.pause_and_check(methods::CHAIN_GET_FINALIZED_HEAD).await?;
		Ok(*self.finalized.read())
	}

	async fn runtime_metadata(&self, _at: Option<H256>) -> Result<Vec<u8>, SourceError> {
		self.metadata_count.fetch_add(1, Ordering::SeqCst);
		self.pause_and_check(methods::STATE_GET_METADATA).await?;
		Ok(self.metadata.read().clone())
	}

	async fn runtime_spec_version(&self, _at: Option<H256>) -> Result<u32, SourceError> {
		self.pause_and_check(methods::STATE_GET_RUNTIME_VERSION).await?;
		Ok(self.spec_version.load(Ordering::SeqCst))
	}
}
