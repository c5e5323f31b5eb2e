// SPDX-License-Identifier: GPL-3.0

//! Deterministic derivation of remote and local storage keys.
//!
//! Every storage item is addressed two ways. The *remote* key is the byte
//! string the chain itself indexes storage by; the *local* key is a
//! readable string identifying the same item in the cache, scoped to one
//! chain:
//!
//! ```text
//! remote = twox128(pallet) ++ twox128(item) ++ hasher_0(p_0) ++ hasher_1(p_1) ...
//! local  = "{chain}:{Pallet}.{Item}"                  (plain items)
//! local  = "{chain}:{Pallet}.{Item}:{hex(suffix)}"    (map entries)
//! ```
//!
//! Parameter hashers come from the runtime metadata via
//! [`CoderFactory`](crate::metadata::CoderFactory), so keys derived here
//! match what the runtime computes. The local key embeds the hashed
//! parameter suffix rather than the raw parameters: it stays derivable
//! from a remote key alone, which lets bulk synchronization index
//! enumerated keys without decoding them.
//!
//! # Example
//!
//! ```ignore
//! let path = StoragePath::new("System", "Account");
//! let key = keys::remote_key(&factory, &path, &[KeyParam::raw(account_id)])?;
//! let id = keys::local_key_for(&factory, "westend", &path, &[KeyParam::raw(account_id)])?;
//! ```

use crate::{error::KeyError, metadata::CoderFactory};
use sp_core::{blake2_128, blake2_256, twox_128, twox_256, twox_64};
use std::fmt;
use subxt::ext::scale_value::{Value, scale::encode_as_type};

/// A storage item addressed as `Pallet.Item`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath {
	pallet: String,
	item: String,
}

impl StoragePath {
	pub fn new(pallet: impl Into<String>, item: impl Into<String>) -> Self {
		Self { pallet: pallet.into(), item: item.into() }
	}

	pub fn pallet(&self) -> &str {
		&self.pallet
	}

	pub fn item(&self) -> &str {
		&self.item
	}
}

impl fmt::Display for StoragePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.pallet, self.item)
	}
}

/// Hash algorithms a runtime can declare for storage map parameters.
///
/// The `Concat` variants append the plain encoded parameter after the
/// hash, which is what makes those maps enumerable and their keys
/// reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageHasher {
	Blake2_128,
	Blake2_256,
	Blake2_128Concat,
	Twox128,
	Twox256,
	Twox64Concat,
	Identity,
}

impl StorageHasher {
	/// Hashes one SCALE-encoded parameter the way the runtime does.
	pub fn apply(&self, encoded: &[u8]) -> Vec<u8> {
		match self {
			Self::Blake2_128 => blake2_128(encoded).to_vec(),
			Self::Blake2_256 => blake2_256(encoded).to_vec(),
			Self::Blake2_128Concat => {
				let mut out = blake2_128(encoded).to_vec();
				out.extend_from_slice(encoded);
				out
			},
			Self::Twox128 => twox_128(encoded).to_vec(),
			Self::Twox256 => twox_256(encoded).to_vec(),
			Self::Twox64Concat => {
				let mut out = twox_64(encoded).to_vec();
				out.extend_from_slice(encoded);
				out
			},
			Self::Identity => encoded.to_vec(),
		}
	}
}

/// One parameter of a storage map key.
#[derive(Debug, Clone)]
pub enum KeyParam {
	/// Already SCALE-encoded bytes, used as-is.
	Raw(Vec<u8>),
	/// A dynamic value, encoded against the runtime's registry type for
	/// the parameter position it occupies.
	Dynamic(Value),
}

impl KeyParam {
	pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
		Self::Raw(bytes.into())
	}

	pub fn dynamic(value: Value) -> Self {
		Self::Dynamic(value)
	}

	fn encode(&self, ty: u32, factory: &CoderFactory, path: &StoragePath, index: usize) -> Result<Vec<u8>, KeyError> {
		match self {
			Self::Raw(bytes) => Ok(bytes.clone()),
			Self::Dynamic(value) => {
				let mut out = Vec::new();
				encode_as_type(value, ty, factory.types(), &mut out).map_err(|e| KeyError::InvalidParameter {
					path: path.to_string(),
					index,
					message: e.to_string(),
				})?;
				Ok(out)
			},
		}
	}
}

/// The pallet and item hash prefix shared by all entries of a storage item.
///
/// This needs no metadata, so prefix scans work even while the runtime's
/// coding factory is unavailable.
pub fn remote_prefix(path: &StoragePath) -> Vec<u8> {
	let mut prefix = twox_128(path.pallet().as_bytes()).to_vec();
	prefix.extend_from_slice(&twox_128(path.item().as_bytes()));
	prefix
}

/// SCALE-encodes map parameters against the registry types the item
/// declares.
pub fn encode_params(factory: &CoderFactory, path: &StoragePath, params: &[KeyParam]) -> Result<Vec<Vec<u8>>, KeyError> {
	let key_types = factory.key_types(path)?;
	if key_types.len() != params.len() {
		return Err(KeyError::ParameterCount {
			path: path.to_string(),
			expected: key_types.len(),
			got: params.len(),
		});
	}
	params
		.iter()
		.zip(key_types)
		.enumerate()
		.map(|(index, (param, ty))| param.encode(ty, factory, path, index))
		.collect()
}

/// The hashed parameter suffix appended to the remote prefix.
pub fn param_suffix(factory: &CoderFactory, path: &StoragePath, encoded: &[Vec<u8>]) -> Result<Vec<u8>, KeyError> {
	let hashers = factory.storage_hashers(path)?;
	if hashers.len() != encoded.len() {
		return Err(KeyError::ParameterCount {
			path: path.to_string(),
			expected: hashers.len(),
			got: encoded.len(),
		});
	}
	let mut suffix = Vec::new();
	for (hasher, bytes) in hashers.iter().zip(encoded) {
		suffix.extend_from_slice(&hasher.apply(bytes));
	}
	Ok(suffix)
}

/// The full remote key for a storage item and its parameters.
pub fn remote_key(factory: &CoderFactory, path: &StoragePath, params: &[KeyParam]) -> Result<Vec<u8>, KeyError> {
	let encoded = encode_params(factory, path, params)?;
	let mut key = remote_prefix(path);
	key.extend_from_slice(&param_suffix(factory, path, &encoded)?);
	Ok(key)
}

/// The local cache identifier for a storage entry.
///
/// `suffix` is the hashed parameter portion of the remote key, empty for
/// plain items. Hex keeps the identifier printable and preserves byte
/// ordering, so range scans over local keys mirror scans over remote keys.
pub fn local_key(chain_id: &str, path: &StoragePath, suffix: &[u8]) -> String {
	if suffix.is_empty() {
		format!("{chain_id}:{path}")
	} else {
		format!("{chain_id}:{path}:{}", hex::encode(suffix))
	}
}

/// The local identifier for a storage item and its parameters.
pub fn local_key_for(
	factory: &CoderFactory,
	chain_id: &str,
	path: &StoragePath,
	params: &[KeyParam],
) -> Result<String, KeyError> {
	let encoded = encode_params(factory, path, params)?;
	let suffix = param_suffix(factory, path, &encoded)?;
	Ok(local_key(chain_id, path, &suffix))
}

/// The prefix shared by every local key of one storage map on one chain.
pub fn local_prefix(chain_id: &str, path: &StoragePath) -> String {
	format!("{chain_id}:{path}:")
}
