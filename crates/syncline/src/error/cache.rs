// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors from the local cache.
#[derive(Debug, Error)]
pub enum CacheError {
	/// A database operation failed.
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),
	/// A filesystem operation failed while opening the cache.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Stored data was malformed.
	#[error("Cache corruption detected: {0}")]
	Corrupt(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_corrupt() {
		let error = CacheError::Corrupt("negative spec version".to_string());
		assert_eq!(error.to_string(), "Cache corruption detected: negative spec version");
	}

	#[test]
	fn error_display_io() {
		let error = CacheError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read only"));
		assert_eq!(error.to_string(), "IO error: read only");
	}
}
