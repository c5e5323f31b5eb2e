// SPDX-License-Identifier: GPL-3.0

//! Runtime metadata access and the versioned coding factory.
//!
//! All decoding and key derivation is driven by a [`CoderFactory`]: an
//! immutable snapshot of the runtime's type registry pinned to the spec
//! version it was fetched under. Pipelines hold one factory for their whole
//! run, so a runtime upgrade landing mid-update cannot mix type
//! information from two runtimes.
//!
//! [`RuntimeService`] owns the factory lifecycle. It compares the chain's
//! spec version on every request and only refetches the (large) metadata
//! blob when the version moved, which makes it self-correcting across
//! runtime upgrades without any explicit invalidation hook.

use crate::{
	error::{KeyError, MetadataError},
	keys::{StorageHasher, StoragePath},
	source::StorageSource,
};
use parking_lot::Mutex;
use scale_info::{PortableRegistry, TypeDef};
use std::sync::Arc;
use subxt::{
	Metadata,
	metadata::types::{StorageEntryMetadata, StorageEntryType, StorageHasher as RuntimeHasher},
};

/// A snapshot of one runtime's type information.
///
/// Cloning is cheap: the underlying metadata is reference counted.
#[derive(Debug, Clone)]
pub struct CoderFactory {
	metadata: Metadata,
	spec_version: u32,
}

impl CoderFactory {
	pub fn new(metadata: Metadata, spec_version: u32) -> Self {
		Self { metadata, spec_version }
	}

	/// Decodes a factory from raw SCALE metadata bytes.
	pub fn try_from_bytes(bytes: &[u8], spec_version: u32) -> Result<Self, MetadataError> {
		use scale::Decode;
		let metadata = Metadata::decode(&mut &bytes[..]).map_err(|e| MetadataError::Decode(e.to_string()))?;
		Ok(Self::new(metadata, spec_version))
	}

	/// The spec version this snapshot was taken under.
	pub fn spec_version(&self) -> u32 {
		self.spec_version
	}

	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	/// The runtime's portable type registry.
	pub fn types(&self) -> &PortableRegistry {
		self.metadata.types()
	}

	fn storage_entry(&self, path: &StoragePath) -> Result<&StorageEntryMetadata, KeyError> {
		let unknown = || KeyError::UnknownItem { path: path.to_string() };
		let pallet = self.metadata.pallet_by_name(path.pallet()).ok_or_else(unknown)?;
		pallet.storage().and_then(|storage| storage.entry_by_name(path.item())).ok_or_else(unknown)
	}

	/// The hashers a storage item declares, in parameter order. Empty for
	/// plain items.
	pub fn storage_hashers(&self, path: &StoragePath) -> Result<Vec<StorageHasher>, KeyError> {
		match self.storage_entry(path)?.entry_type() {
			StorageEntryType::Plain(_) => Ok(Vec::new()),
			StorageEntryType::Map { hashers, .. } => Ok(hashers.iter().map(convert_hasher).collect()),
		}
	}

	/// Registry type ids of a storage item's key parameters, in order.
	///
	/// A map with several hashers keys by a tuple; its fields are split so
	/// each parameter encodes against its own type.
	pub fn key_types(&self, path: &StoragePath) -> Result<Vec<u32>, KeyError> {
		match self.storage_entry(path)?.entry_type() {
			StorageEntryType::Plain(_) => Ok(Vec::new()),
			StorageEntryType::Map { hashers, key_ty, .. } => {
				if hashers.len() <= 1 {
					return Ok(vec![*key_ty]);
				}
				let ty = self
					.types()
					.resolve(*key_ty)
					.ok_or_else(|| KeyError::UnknownItem { path: path.to_string() })?;
				match &ty.type_def {
					TypeDef::Tuple(tuple) => Ok(tuple.fields.iter().map(|field| field.id).collect()),
					// Some runtimes declare a single composite key even
					// with several hashers; treat it as one parameter.
					_ => Ok(vec![*key_ty]),
				}
			},
		}
	}

	/// Registry type id of a storage item's value.
	pub fn value_type(&self, path: &StoragePath) -> Result<u32, KeyError> {
		match self.storage_entry(path)?.entry_type() {
			StorageEntryType::Plain(ty) => Ok(*ty),
			StorageEntryType::Map { value_ty, .. } => Ok(*value_ty),
		}
	}
}

fn convert_hasher(hasher: &RuntimeHasher) -> StorageHasher {
	match hasher {
		RuntimeHasher::Blake2_128 => StorageHasher::Blake2_128,
		RuntimeHasher::Blake2_256 => StorageHasher::Blake2_256,
		RuntimeHasher::Blake2_128Concat => StorageHasher::Blake2_128Concat,
		RuntimeHasher::Twox128 => StorageHasher::Twox128,
		RuntimeHasher::Twox256 => StorageHasher::Twox256,
		RuntimeHasher::Twox64Concat => StorageHasher::Twox64Concat,
		RuntimeHasher::Identity => StorageHasher::Identity,
	}
}

/// Fetches and caches the runtime's coding factory.
pub struct RuntimeService {
	source: Arc<dyn StorageSource>,
	cached: Mutex<Option<CoderFactory>>,
}

impl RuntimeService {
	pub fn new(source: Arc<dyn StorageSource>) -> Self {
		Self { source, cached: Mutex::new(None) }
	}

	/// Returns a factory for the chain's current runtime.
	///
	/// The spec version is checked on every call; the metadata blob is
	/// only refetched when the version moved or nothing is cached yet.
	pub async fn coder_factory(&self) -> Result<CoderFactory, MetadataError> {
		let spec_version = self.source.runtime_spec_version(None).await?;
		if let Some(cached) = self.cached.lock().as_ref() &&
			cached.spec_version() == spec_version
		{
			return Ok(cached.clone());
		}
		log::debug!("runtime spec version {spec_version}: fetching metadata");
		let bytes = self.source.runtime_metadata(None).await?;
		let factory = CoderFactory::try_from_bytes(&bytes, spec_version)?;
		*self.cached.lock() = Some(factory.clone());
		Ok(factory)
	}

	/// Drops the cached factory; the next call fetches fresh metadata.
	pub fn invalidate(&self) {
		*self.cached.lock() = None;
	}
}
