// SPDX-License-Identifier: GPL-3.0

use crate::error::SourceError;
use thiserror::Error;

/// Errors when obtaining or decoding runtime metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
	/// The metadata could not be fetched from the source.
	#[error("Runtime metadata unavailable: {0}")]
	Unavailable(#[from] SourceError),
	/// The metadata bytes did not decode.
	#[error("Failed to decode runtime metadata: {0}")]
	Decode(String),
}
