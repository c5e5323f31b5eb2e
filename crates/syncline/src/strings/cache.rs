// SPDX-License-Identifier: GPL-3.0

//! Cache-related string constants.

/// SQLite pragmas applied to every pool.
pub mod pragmas {
	/// Wait up to five seconds for a locked database before failing.
	pub const BUSY_TIMEOUT: &str = "PRAGMA busy_timeout=5000;";
	/// Write-ahead logging lets readers proceed during writes.
	pub const JOURNAL_MODE_WAL: &str = "PRAGMA journal_mode=WAL;";
}

/// Database connection URLs.
pub mod urls {
	/// An in-memory database that lives as long as its connection.
	pub const MEMORY: &str = "sqlite::memory:";
}
