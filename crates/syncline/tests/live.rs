// SPDX-License-Identifier: GPL-3.0

//! Tests against a public Westend node.
//!
//! Run with: `cargo test -p syncline --features live-tests`

#![cfg(feature = "live-tests")]

use syncline::{CoderFactory, StoragePath, StorageSource, WsStorageSource, keys};
use url::Url;

const WESTEND: &str = "wss://westend-rpc.polkadot.io";

async fn connect() -> WsStorageSource {
	let url = Url::parse(WESTEND).expect("endpoint URL");
	WsStorageSource::connect(url).await.expect("connect to westend")
}

#[tokio::test(flavor = "multi_thread")]
async fn downloads_and_decodes_live_metadata() {
	let source = connect().await;
	let spec_version = source.runtime_spec_version(None).await.expect("spec version");
	assert!(spec_version > 0);

	let bytes = source.runtime_metadata(None).await.expect("metadata");
	let factory = CoderFactory::try_from_bytes(&bytes, spec_version).expect("factory");
	let hashers = factory.storage_hashers(&StoragePath::new("System", "Account")).expect("hashers");
	assert_eq!(hashers.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pages_through_live_account_keys() {
	let source = connect().await;
	let prefix = keys::remote_prefix(&StoragePath::new("System", "Account"));
	let page = source.fetch_page(&prefix, 5, None, None).await.expect("page");
	assert!(!page.keys.is_empty());
	for key in &page.keys {
		assert!(key.starts_with(&prefix));
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_the_finalized_head() {
	let source = connect().await;
	let head = source.finalized_head().await.expect("finalized head");
	let value = source.fetch_one(&[0u8; 32], Some(head)).await.expect("storage read");
	assert!(value.is_none());
}
