// SPDX-License-Identifier: GPL-3.0

//! Local persistence of fetched storage values.
//!
//! The cache is a small SQLite database with one row per storage entry,
//! keyed by the [`local key`](crate::keys::local_key) string. Rows mirror
//! what the chain last returned, including "the chain returned nothing":
//! a key that was fetched and found empty is stored with `is_empty` set,
//! which is different from the key never having been fetched at all.
//!
//! A second table holds decoded snapshots for value types with a stable
//! owned encoding, so a restart can serve typed values without touching
//! the runtime metadata.
//!
//! # Concurrency
//!
//! Writes go through transactions on a small connection pool with WAL
//! journaling, giving single-writer semantics with concurrent readers.
//! [`CacheRepository::save`] and [`CacheRepository::replace`] are atomic:
//! readers observe the state before or after, never in between.

use crate::{error::CacheError, strings::cache::{pragmas, urls}};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

/// Maximum connections for a file-backed pool.
///
/// SQLite serializes writes internally, so a handful of connections is
/// enough to let readers overlap the writer without exhausting file
/// handles when many providers share one cache.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// Connections for an in-memory pool.
///
/// Must be 1: every `sqlite::memory:` connection opens its own private
/// database, so a second connection would see empty tables.
const MEMORY_POOL_CONNECTIONS: u32 = 1;

const CREATE_STORAGE_SQL: &str = "CREATE TABLE IF NOT EXISTS storage_items (
	identifier TEXT PRIMARY KEY,
	payload BLOB,
	is_empty INTEGER NOT NULL DEFAULT 0
)";

const CREATE_DECODED_SQL: &str = "CREATE TABLE IF NOT EXISTS decoded_items (
	identifier TEXT PRIMARY KEY,
	spec_version INTEGER NOT NULL,
	payload BLOB NOT NULL
)";

/// One cached storage entry.
///
/// `payload` of `None` means the chain was asked and returned nothing;
/// absence of the whole entry means the key was never fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
	pub identifier: String,
	pub payload: Option<Vec<u8>>,
}

/// A decoded snapshot stored next to the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
	/// Runtime version the snapshot was decoded under.
	pub spec_version: u32,
	pub payload: Vec<u8>,
}

/// SQLite-backed storage cache.
#[derive(Debug, Clone)]
pub struct CacheRepository {
	pool: SqlitePool,
}

impl CacheRepository {
	/// Opens (or creates) a file-backed cache.
	pub async fn open(path: &Path) -> Result<Self, CacheError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let url = format!("sqlite:{}?mode=rwc", path.display());
		let pool = SqlitePoolOptions::new().max_connections(MAX_POOL_CONNECTIONS).connect(&url).await?;
		log::debug!("opened cache at {}", path.display());
		Self::initialize(pool).await
	}

	/// Opens a cache that lives only as long as this repository.
	pub async fn in_memory() -> Result<Self, CacheError> {
		let pool =
			SqlitePoolOptions::new().max_connections(MEMORY_POOL_CONNECTIONS).connect(urls::MEMORY).await?;
		Self::initialize(pool).await
	}

	async fn initialize(pool: SqlitePool) -> Result<Self, CacheError> {
		sqlx::query(pragmas::BUSY_TIMEOUT).execute(&pool).await?;
		sqlx::query(pragmas::JOURNAL_MODE_WAL).execute(&pool).await?;
		sqlx::query(CREATE_STORAGE_SQL).execute(&pool).await?;
		sqlx::query(CREATE_DECODED_SQL).execute(&pool).await?;
		Ok(Self { pool })
	}

	/// Reads one entry. `None` means the identifier was never stored.
	pub async fn fetch(&self, identifier: &str) -> Result<Option<CacheEntry>, CacheError> {
		let row: Option<(Option<Vec<u8>>, bool)> =
			sqlx::query_as("SELECT payload, is_empty FROM storage_items WHERE identifier = ?")
				.bind(identifier)
				.fetch_optional(&self.pool)
				.await?;
		Ok(row.map(|(payload, is_empty)| CacheEntry {
			identifier: identifier.to_string(),
			payload: if is_empty { None } else { payload },
		}))
	}

	/// Reads every entry whose identifier starts with `prefix`, ordered by
	/// identifier.
	pub async fn fetch_all(&self, prefix: &str) -> Result<Vec<CacheEntry>, CacheError> {
		let rows: Vec<(String, Option<Vec<u8>>, bool)> = sqlx::query_as(
			"SELECT identifier, payload, is_empty FROM storage_items \
			 WHERE identifier LIKE ? ESCAPE '\\' ORDER BY identifier",
		)
		.bind(like_pattern(prefix))
		.fetch_all(&self.pool)
		.await?;
		Ok(rows
			.into_iter()
			.map(|(identifier, payload, is_empty)| CacheEntry {
				identifier,
				payload: if is_empty { None } else { payload },
			})
			.collect())
	}

	/// Writes and removes entries in one transaction.
	///
	/// Removed identifiers lose their decoded snapshots too. Readers see
	/// either none or all of the changes.
	pub async fn save(&self, inserts: &[CacheEntry], remove: &[String]) -> Result<(), CacheError> {
		let mut tx = self.pool.begin().await?;
		for entry in inserts {
			sqlx::query("INSERT OR REPLACE INTO storage_items (identifier, payload, is_empty) VALUES (?, ?, ?)")
				.bind(&entry.identifier)
				.bind(entry.payload.as_deref())
				.bind(entry.payload.is_none())
				.execute(&mut *tx)
				.await?;
		}
		for identifier in remove {
			sqlx::query("DELETE FROM storage_items WHERE identifier = ?")
				.bind(identifier)
				.execute(&mut *tx)
				.await?;
			sqlx::query("DELETE FROM decoded_items WHERE identifier = ?")
				.bind(identifier)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	/// Replaces everything under `prefix` with `items` in one transaction.
	///
	/// Entries under the prefix that are not part of `items` disappear,
	/// which is what whole-map rewrites such as era re-indexing need.
	pub async fn replace(&self, prefix: &str, items: &[CacheEntry]) -> Result<(), CacheError> {
		let pattern = like_pattern(prefix);
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM storage_items WHERE identifier LIKE ? ESCAPE '\\'")
			.bind(&pattern)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM decoded_items WHERE identifier LIKE ? ESCAPE '\\'")
			.bind(&pattern)
			.execute(&mut *tx)
			.await?;
		for entry in items {
			sqlx::query("INSERT OR REPLACE INTO storage_items (identifier, payload, is_empty) VALUES (?, ?, ?)")
				.bind(&entry.identifier)
				.bind(entry.payload.as_deref())
				.bind(entry.payload.is_none())
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	/// Reads a decoded snapshot.
	pub async fn fetch_decoded(&self, identifier: &str) -> Result<Option<DecodedEntry>, CacheError> {
		let row: Option<(i64, Vec<u8>)> =
			sqlx::query_as("SELECT spec_version, payload FROM decoded_items WHERE identifier = ?")
				.bind(identifier)
				.fetch_optional(&self.pool)
				.await?;
		let Some((spec_version, payload)) = row else {
			return Ok(None);
		};
		let spec_version = u32::try_from(spec_version)
			.map_err(|_| CacheError::Corrupt(format!("invalid spec version {spec_version} for {identifier}")))?;
		Ok(Some(DecodedEntry { spec_version, payload }))
	}

	/// Writes a decoded snapshot.
	pub async fn save_decoded(&self, identifier: &str, spec_version: u32, payload: &[u8]) -> Result<(), CacheError> {
		sqlx::query("INSERT OR REPLACE INTO decoded_items (identifier, spec_version, payload) VALUES (?, ?, ?)")
			.bind(identifier)
			.bind(spec_version)
			.bind(payload)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Removes a decoded snapshot, if any.
	pub async fn delete_decoded(&self, identifier: &str) -> Result<(), CacheError> {
		sqlx::query("DELETE FROM decoded_items WHERE identifier = ?")
			.bind(identifier)
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

/// Escapes LIKE wildcards in `prefix` and appends the trailing `%`.
fn like_pattern(prefix: &str) -> String {
	let mut pattern = String::with_capacity(prefix.len() + 1);
	for c in prefix.chars() {
		if matches!(c, '\\' | '%' | '_') {
			pattern.push('\\');
		}
		pattern.push(c);
	}
	pattern.push('%');
	pattern
}
