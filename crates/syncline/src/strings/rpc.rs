// SPDX-License-Identifier: GPL-3.0

//! RPC-related string constants.

/// JSON-RPC method names, used for subscriptions and error reporting.
pub mod methods {
	pub const CHAIN_GET_FINALIZED_HEAD: &str = "chain_getFinalizedHead";
	pub const STATE_GET_KEYS_PAGED: &str = "state_getKeysPaged";
	pub const STATE_GET_METADATA: &str = "state_getMetadata";
	pub const STATE_GET_RUNTIME_VERSION: &str = "state_getRuntimeVersion";
	pub const STATE_GET_STORAGE: &str = "state_getStorage";
	pub const STATE_QUERY_STORAGE_AT: &str = "state_queryStorageAt";
	pub const STATE_SUBSCRIBE_STORAGE: &str = "state_subscribeStorage";
	pub const STATE_UNSUBSCRIBE_STORAGE: &str = "state_unsubscribeStorage";
}
