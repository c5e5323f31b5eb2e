// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors from remote storage and history sources.
#[derive(Debug, Error)]
pub enum SourceError {
	/// The endpoint could not be reached or the connection was lost.
	#[error("Connection unavailable for {endpoint}: {message}")]
	ConnectionUnavailable {
		/// The endpoint that was contacted.
		endpoint: String,
		/// Details of the failure.
		message: String,
	},
	/// A request reached the source but failed.
	#[error("Request {method} failed: {message}")]
	RequestFailed {
		/// The method that was called.
		method: &'static str,
		/// Details of the failure.
		message: String,
	},
	/// A request did not complete within the configured deadline.
	#[error("Request {method} timed out")]
	Timeout {
		/// The method that was called.
		method: &'static str,
	},
	/// A response arrived but did not have the expected shape.
	#[error("Unexpected response format: {0}")]
	UnexpectedFormat(String),
}

impl SourceError {
	/// Whether the source cannot currently be reached.
	///
	/// Timeouts count: a request that never completes is indistinguishable
	/// from a dead connection for callers deciding to serve stale data.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::ConnectionUnavailable { .. } | Self::Timeout { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_connection_unavailable() {
		let error = SourceError::ConnectionUnavailable {
			endpoint: "wss://rpc.example.com".to_string(),
			message: "refused".to_string(),
		};
		assert_eq!(error.to_string(), "Connection unavailable for wss://rpc.example.com: refused");
		assert!(error.is_unavailable());
	}

	#[test]
	fn error_display_request_failed() {
		let error = SourceError::RequestFailed { method: "state_getStorage", message: "bad params".to_string() };
		assert_eq!(error.to_string(), "Request state_getStorage failed: bad params");
		assert!(!error.is_unavailable());
	}

	#[test]
	fn timeout_counts_as_unavailable() {
		let error = SourceError::Timeout { method: "state_getStorage" };
		assert_eq!(error.to_string(), "Request state_getStorage timed out");
		assert!(error.is_unavailable());
	}

	#[test]
	fn unexpected_format_is_not_unavailable() {
		let error = SourceError::UnexpectedFormat("missing field".to_string());
		assert_eq!(error.to_string(), "Unexpected response format: missing field");
		assert!(!error.is_unavailable());
	}
}
