// SPDX-License-Identifier: GPL-3.0

//! Runtime-aware decoding of storage values.
//!
//! Decoding is pure: bytes plus a [`CoderFactory`] in, value out, no
//! clocks and no I/O. The factory pins the type registry for the whole
//! operation, so concurrent runtime upgrades cannot produce values decoded
//! half under one runtime and half under another.
//!
//! Layouts change across runtime versions while cached bytes stay as they
//! were written, so typed decoding runs through an ordered list of
//! [`DecodeStrategy`] entries: the current layout is attempted first and
//! older layouts after it, with the first success winning. A value that
//! decodes under no strategy reports the final attempt's failure.

use crate::{
	error::CodecError,
	keys::StoragePath,
	metadata::CoderFactory,
};
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef, scale::decode_as_type};

/// Decodes raw storage bytes into a dynamic value.
///
/// Trailing bytes are an error: storage values occupy their whole byte
/// string, so leftovers mean the type registry disagrees with the bytes.
pub fn decode_value(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<Value, CodecError> {
	let ty = factory.value_type(path)?;
	let mut cursor = bytes;
	let value = decode_as_type(&mut cursor, ty, factory.types())
		.map_err(|e| CodecError::Decode { path: path.to_string(), reason: e.to_string() })?;
	if !cursor.is_empty() {
		return Err(CodecError::Decode {
			path: path.to_string(),
			reason: format!("{} trailing byte(s) after value", cursor.len()),
		});
	}
	Ok(value.remove_context())
}

/// Decodes a batch of values of the same storage item.
pub fn decode_list(items: &[Vec<u8>], path: &StoragePath, factory: &CoderFactory) -> Result<Vec<Value>, CodecError> {
	items.iter().map(|bytes| decode_value(bytes, path, factory)).collect()
}

/// One named way of decoding a storage value into `T`.
pub type DecodeStrategy<T> = (&'static str, fn(&[u8], &StoragePath, &CoderFactory) -> Result<T, CodecError>);

/// Runs strategies in order and returns the first success.
///
/// Strategy misses are traced; succeeding through a fallback is logged
/// since it usually means the cache holds bytes from an older runtime.
pub fn decode_first<T>(
	strategies: &[DecodeStrategy<T>],
	bytes: &[u8],
	path: &StoragePath,
	factory: &CoderFactory,
) -> Result<T, CodecError> {
	let mut last_error = None;
	for (name, decode) in strategies {
		match decode(bytes, path, factory) {
			Ok(value) => {
				if last_error.is_some() {
					log::debug!("decoded {path} with fallback strategy '{name}'");
				}
				return Ok(value);
			},
			Err(error) => {
				log::trace!("decode strategy '{name}' failed for {path}: {error}");
				last_error = Some(error);
			},
		}
	}
	Err(last_error.unwrap_or_else(|| CodecError::Decode {
		path: path.to_string(),
		reason: "no decode strategies registered".to_string(),
	}))
}

/// A typed view over raw storage bytes.
///
/// The snapshot hooks let the cache keep an already-decoded
/// representation next to the raw bytes; types without a stable owned
/// encoding keep the defaults and are re-decoded from raw on every load.
pub trait StorageDecode: Sized + Send + Sync + 'static {
	/// Decodes the value stored at `path`.
	fn decode_storage(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<Self, CodecError>;

	/// Encodes a cache snapshot of the decoded value.
	fn encode_snapshot(&self) -> Option<Vec<u8>> {
		None
	}

	/// Restores a value from a cache snapshot.
	fn decode_snapshot(_bytes: &[u8]) -> Option<Self> {
		None
	}
}

impl StorageDecode for Value {
	fn decode_storage(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<Self, CodecError> {
		decode_value(bytes, path, factory)
	}
}

/// Looks up a field of a composite value by name, falling back to its
/// position. The fallback covers runtimes that renamed a field without
/// changing the layout, and unnamed (tuple-like) composites.
pub fn composite_field<'a>(value: &'a Value, name: &str, position: usize) -> Option<&'a Value> {
	match &value.value {
		ValueDef::Composite(Composite::Named(fields)) => fields
			.iter()
			.find(|(field, _)| field == name)
			.map(|(_, field)| field)
			.or_else(|| fields.get(position).map(|(_, field)| field)),
		ValueDef::Composite(Composite::Unnamed(fields)) => fields.get(position),
		_ => None,
	}
}

/// Reads a composite field as an unsigned integer.
pub fn composite_u128(value: &Value, name: &str, position: usize) -> Option<u128> {
	match &composite_field(value, name, position)?.value {
		ValueDef::Primitive(Primitive::U128(n)) => Some(*n),
		_ => None,
	}
}
