// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors when deriving storage keys.
#[derive(Debug, Error)]
pub enum KeyError {
	/// The runtime metadata has no such storage item.
	#[error("Unknown storage item: {path}")]
	UnknownItem {
		/// The `Pallet.Item` path that was looked up.
		path: String,
	},
	/// The number of parameters does not match the storage map.
	#[error("Storage item {path} expects {expected} parameter(s), got {got}")]
	ParameterCount {
		/// The `Pallet.Item` path that was keyed.
		path: String,
		/// Parameters the map declares.
		expected: usize,
		/// Parameters that were supplied.
		got: usize,
	},
	/// A parameter could not be encoded against the runtime's registry.
	#[error("Invalid parameter {index} for {path}: {message}")]
	InvalidParameter {
		/// The `Pallet.Item` path that was keyed.
		path: String,
		/// Zero-based position of the offending parameter.
		index: usize,
		/// Details of the encoding failure.
		message: String,
	},
}
