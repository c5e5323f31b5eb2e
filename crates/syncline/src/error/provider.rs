// SPDX-License-Identifier: GPL-3.0

use crate::error::{CacheError, CodecError, KeyError, MetadataError, SourceError};
use std::sync::Arc;
use syncline_graph::GraphError;
use thiserror::Error;

/// Umbrella error returned by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
	/// The local cache failed.
	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),
	/// A storage value did not decode.
	#[error("Codec error: {0}")]
	Codec(#[from] CodecError),
	/// A storage key could not be derived.
	#[error("Key error: {0}")]
	Key(#[from] KeyError),
	/// Runtime metadata was unavailable or malformed.
	#[error("Metadata error: {0}")]
	Metadata(#[from] MetadataError),
	/// The remote source failed.
	#[error("Source error: {0}")]
	Source(#[from] SourceError),
	/// The update pipeline was torn down before finishing.
	#[error("Update pipeline was cancelled")]
	Cancelled,
	/// A failure first reported to a concurrent caller of the same
	/// provider; the originating error is shared.
	#[error("{0}")]
	Shared(Arc<ProviderError>),
}

impl From<GraphError> for ProviderError {
	fn from(_: GraphError) -> Self {
		Self::Cancelled
	}
}

impl From<Arc<ProviderError>> for ProviderError {
	fn from(shared: Arc<ProviderError>) -> Self {
		Self::Shared(shared)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_cancelled() {
		assert_eq!(ProviderError::Cancelled.to_string(), "Update pipeline was cancelled");
	}

	#[test]
	fn error_display_shared_is_transparent() {
		let origin = Arc::new(ProviderError::Cancelled);
		assert_eq!(ProviderError::Shared(origin).to_string(), "Update pipeline was cancelled");
	}

	#[test]
	fn graph_cancellation_maps_to_cancelled() {
		let error: ProviderError = GraphError::ParentCancelled.into();
		assert!(matches!(error, ProviderError::Cancelled));
	}

	#[test]
	fn error_display_wraps_source() {
		let error = ProviderError::from(SourceError::Timeout { method: "state_getStorage" });
		assert_eq!(error.to_string(), "Source error: Request state_getStorage timed out");
	}
}
