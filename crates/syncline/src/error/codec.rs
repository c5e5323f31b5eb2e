// SPDX-License-Identifier: GPL-3.0

use crate::error::KeyError;
use thiserror::Error;

/// Errors when decoding storage values.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The value bytes did not decode at the given storage path.
	#[error("Failed to decode value at {path}: {reason}")]
	Decode {
		/// The `Pallet.Item` path of the value.
		path: String,
		/// Why decoding failed.
		reason: String,
	},
	/// The storage path could not be resolved in the runtime metadata.
	#[error("Key error: {0}")]
	Key(#[from] KeyError),
}
