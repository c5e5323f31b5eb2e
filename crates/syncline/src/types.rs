// SPDX-License-Identifier: GPL-3.0

//! Typed views of frequently used storage values.
//!
//! [`AccountInfo`] is the `System.Account` record in its current
//! four-field balance shape. Chains migrated to it from a layout with two
//! freeze buckets (`misc_frozen` and `fee_frozen`); both occupy the same
//! eighty bytes, so the byte length alone cannot tell them apart. The
//! current pallet sets a high bit in `flags` on every record it writes,
//! and decoding keys off that bit: a record without it is read as the
//! historical layout, with the effective freeze being the larger bucket.

use crate::{
	codec::{self, DecodeStrategy, StorageDecode},
	error::CodecError,
	keys::{KeyParam, StoragePath},
	metadata::CoderFactory,
};
use scale::{Decode, Encode};
use subxt::ext::scale_value::Value;

/// Bit set in [`AccountData::flags`] by every runtime that writes the
/// current balance layout.
pub const FLAGS_NEW_LOGIC: u128 = 1 << 127;

/// A 32-byte account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl From<[u8; 32]> for AccountId {
	fn from(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}
}

impl TryFrom<&[u8]> for AccountId {
	type Error = std::array::TryFromSliceError;

	fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
		Ok(Self(<[u8; 32]>::try_from(bytes)?))
	}
}

impl From<&AccountId> for KeyParam {
	fn from(id: &AccountId) -> Self {
		// A fixed-size byte array SCALE-encodes as its raw bytes.
		KeyParam::raw(id.0.to_vec())
	}
}

/// Balance bookkeeping of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccountData {
	pub free: u128,
	pub reserved: u128,
	pub frozen: u128,
	pub flags: u128,
}

impl AccountData {
	/// Everything the account holds.
	pub fn total(&self) -> u128 {
		self.free.saturating_add(self.reserved)
	}

	/// What can be spent right now.
	pub fn transferable(&self) -> u128 {
		self.free.saturating_sub(self.frozen)
	}
}

/// The `System.Account` storage record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccountInfo {
	pub nonce: u32,
	pub consumers: u32,
	pub providers: u32,
	pub sufficients: u32,
	pub data: AccountData,
}

/// Layouts in the order they are attempted: the current runtime's view
/// first, the historical two-bucket layout second, and last a raw decode
/// of the current shape for bytes the registry cannot explain.
const ACCOUNT_STRATEGIES: &[DecodeStrategy<AccountInfo>] =
	&[("current", decode_current), ("legacy-frozen", decode_legacy), ("raw", decode_raw)];

impl StorageDecode for AccountInfo {
	fn decode_storage(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<Self, CodecError> {
		codec::decode_first(ACCOUNT_STRATEGIES, bytes, path, factory)
	}

	fn encode_snapshot(&self) -> Option<Vec<u8>> {
		Some(self.encode())
	}

	fn decode_snapshot(bytes: &[u8]) -> Option<Self> {
		Decode::decode(&mut &bytes[..]).ok()
	}
}

fn decode_current(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<AccountInfo, CodecError> {
	let value = codec::decode_value(bytes, path, factory)?;
	let info = from_dynamic(&value, path, false)?;
	if info.data.flags & FLAGS_NEW_LOGIC == 0 {
		return Err(CodecError::Decode {
			path: path.to_string(),
			reason: "missing new-logic flag, not a current-layout record".to_string(),
		});
	}
	Ok(info)
}

fn decode_legacy(bytes: &[u8], path: &StoragePath, factory: &CoderFactory) -> Result<AccountInfo, CodecError> {
	let value = codec::decode_value(bytes, path, factory)?;
	from_dynamic(&value, path, true)
}

fn decode_raw(bytes: &[u8], path: &StoragePath, _factory: &CoderFactory) -> Result<AccountInfo, CodecError> {
	AccountInfo::decode(&mut &bytes[..])
		.map_err(|e| CodecError::Decode { path: path.to_string(), reason: e.to_string() })
}

/// Maps a dynamically decoded record onto [`AccountInfo`].
///
/// With `legacy` set, the third and fourth balance fields are the two
/// historical freeze buckets: the effective frozen amount is their
/// maximum and `flags` is cleared.
fn from_dynamic(value: &Value, path: &StoragePath, legacy: bool) -> Result<AccountInfo, CodecError> {
	let read = |target: &Value, name: &str, position: usize| {
		codec::composite_u128(target, name, position).ok_or_else(|| CodecError::Decode {
			path: path.to_string(),
			reason: format!("missing account field '{name}'"),
		})
	};
	let narrow = |name: &str, n: u128| {
		u32::try_from(n).map_err(|_| CodecError::Decode {
			path: path.to_string(),
			reason: format!("account field '{name}' out of range"),
		})
	};

	let nonce = narrow("nonce", read(value, "nonce", 0)?)?;
	let consumers = narrow("consumers", read(value, "consumers", 1)?)?;
	let providers = narrow("providers", read(value, "providers", 2)?)?;
	let sufficients = narrow("sufficients", read(value, "sufficients", 3)?)?;
	let balances = codec::composite_field(value, "data", 4).ok_or_else(|| CodecError::Decode {
		path: path.to_string(),
		reason: "missing account field 'data'".to_string(),
	})?;

	let free = read(balances, "free", 0)?;
	let reserved = read(balances, "reserved", 1)?;
	let data = if legacy {
		let misc_frozen = read(balances, "misc_frozen", 2)?;
		let fee_frozen = read(balances, "fee_frozen", 3)?;
		AccountData { free, reserved, frozen: misc_frozen.max(fee_frozen), flags: 0 }
	} else {
		AccountData {
			free,
			reserved,
			frozen: read(balances, "frozen", 2)?,
			flags: read(balances, "flags", 3)?,
		}
	};

	Ok(AccountInfo { nonce, consumers, providers, sufficients, data })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dev::{self, AccountLayout};

	fn account_path() -> StoragePath {
		StoragePath::new("System", "Account")
	}

	#[test]
	fn balance_arithmetic_saturates() {
		let data = AccountData { free: 100, reserved: 20, frozen: 30, flags: FLAGS_NEW_LOGIC };
		assert_eq!(data.total(), 120);
		assert_eq!(data.transferable(), 70);
		let overdrawn = AccountData { free: 10, reserved: 0, frozen: 50, flags: 0 };
		assert_eq!(overdrawn.transferable(), 0);
		let huge = AccountData { free: u128::MAX, reserved: u128::MAX, frozen: 0, flags: 0 };
		assert_eq!(huge.total(), u128::MAX);
	}

	#[test]
	fn account_id_conversions() {
		let id = AccountId::try_from(dev::ALICE.as_slice()).unwrap();
		assert_eq!(id.as_bytes(), &dev::ALICE);
		assert!(AccountId::try_from([0u8; 31].as_slice()).is_err());
		let param: KeyParam = (&id).into();
		assert!(matches!(param, KeyParam::Raw(bytes) if bytes == dev::ALICE.to_vec()));
	}

	#[test]
	fn decodes_the_current_layout() {
		let factory = dev::dev_metadata(AccountLayout::Current).unwrap();
		let bytes = dev::encode_account_info(7, 1_000, 50, 200);
		let info = AccountInfo::decode_storage(&bytes, &account_path(), &factory).unwrap();
		assert_eq!(info.nonce, 7);
		assert_eq!(info.data.free, 1_000);
		assert_eq!(info.data.reserved, 50);
		assert_eq!(info.data.frozen, 200);
		assert_ne!(info.data.flags & FLAGS_NEW_LOGIC, 0);
	}

	#[test]
	fn decodes_the_legacy_layout_with_matching_metadata() {
		let factory = dev::dev_metadata(AccountLayout::Legacy).unwrap();
		let bytes = dev::encode_legacy_account_info(3, 500, 120, 80);
		let info = AccountInfo::decode_storage(&bytes, &account_path(), &factory).unwrap();
		assert_eq!(info.nonce, 3);
		assert_eq!(info.data.free, 500);
		// The larger freeze bucket wins.
		assert_eq!(info.data.frozen, 120);
		assert_eq!(info.data.flags, 0);
	}

	#[test]
	fn legacy_bytes_fall_through_under_current_metadata() {
		// Bytes written before the balance migration, read with metadata
		// of an upgraded runtime. The current strategy decodes but fails
		// the flag check; the legacy strategy recovers positionally.
		let factory = dev::dev_metadata(AccountLayout::Current).unwrap();
		let bytes = dev::encode_legacy_account_info(1, 900, 40, 70);
		let info = AccountInfo::decode_storage(&bytes, &account_path(), &factory).unwrap();
		assert_eq!(info.data.free, 900);
		assert_eq!(info.data.frozen, 70);
		assert_eq!(info.data.flags, 0);
	}

	#[test]
	fn garbage_bytes_report_the_path() {
		let factory = dev::dev_metadata(AccountLayout::Current).unwrap();
		let error = AccountInfo::decode_storage(&[1, 2, 3], &account_path(), &factory).unwrap_err();
		assert!(error.to_string().contains("System.Account"), "{error}");
	}

	#[test]
	fn snapshot_roundtrip() {
		let info = AccountInfo {
			nonce: 2,
			consumers: 0,
			providers: 1,
			sufficients: 0,
			data: AccountData { free: 10, reserved: 1, frozen: 2, flags: FLAGS_NEW_LOGIC },
		};
		let snapshot = info.encode_snapshot().unwrap();
		assert_eq!(AccountInfo::decode_snapshot(&snapshot), Some(info));
		assert_eq!(AccountInfo::decode_snapshot(&[0xde, 0xad]), None);
	}
}
