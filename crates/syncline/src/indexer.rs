// SPDX-License-Identifier: GPL-3.0

//! Transaction history from an off-chain indexer.
//!
//! Chains do not keep a per-account transfer log in storage, so history
//! comes from an HTTP indexer instead. The indexer serves pages of
//! records newest-first with an opaque cursor; [`HistorySource::fetch_new`]
//! walks pages until it meets a record the caller already has, which
//! keeps incremental syncs to one request in the common case.
//!
//! Failures use the same [`SourceError`] taxonomy as the chain source,
//! so callers degrade to cached history the same way they degrade to
//! cached storage.

use crate::{error::SourceError, source::DEFAULT_REQUEST_TIMEOUT};
use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

/// Path of the history endpoint, also used as the method label in errors.
const HISTORY_ENDPOINT: &str = "history";

/// Records requested per page.
const DEFAULT_PAGE_SIZE: u32 = 100;

/// One indexed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryRecord {
	/// Indexer-assigned identifier, unique per record.
	pub id: String,
	#[serde(rename = "blockNumber")]
	pub block_number: u64,
	pub module: String,
	pub call: String,
	/// Amount as a decimal string, absent for calls without one.
	pub amount: Option<String>,
	pub success: bool,
	pub timestamp: u64,
}

/// One page of history, newest records first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryPage {
	pub records: Vec<HistoryRecord>,
	/// Cursor for the next page, absent on the last one.
	#[serde(rename = "nextCursor")]
	pub next_cursor: Option<String>,
}

/// HTTP client for a history indexer.
///
/// `base` should end with a slash; the endpoint path is joined onto it.
#[derive(Debug, Clone)]
pub struct HistorySource {
	client: reqwest::Client,
	base: Url,
	page_size: u32,
}

impl HistorySource {
	pub fn new(base: Url) -> Self {
		Self { client: reqwest::Client::new(), base, page_size: DEFAULT_PAGE_SIZE }
	}

	/// Overrides the page size, keeping it at least 1.
	pub fn with_page_size(mut self, page_size: u32) -> Self {
		self.page_size = page_size.max(1);
		self
	}

	/// Fetches one page of history for `address`.
	pub async fn fetch_history(
		&self,
		address: &str,
		cursor: Option<&str>,
	) -> Result<HistoryPage, SourceError> {
		let mut url = self
			.base
			.join(HISTORY_ENDPOINT)
			.map_err(|error| SourceError::UnexpectedFormat(format!("history endpoint: {error}")))?;
		url.query_pairs_mut()
			.append_pair("address", address)
			.append_pair("limit", &self.page_size.to_string());
		if let Some(cursor) = cursor {
			url.query_pairs_mut().append_pair("cursor", cursor);
		}

		let response =
			self.client.get(url).timeout(DEFAULT_REQUEST_TIMEOUT).send().await.map_err(|error| {
				if error.is_timeout() {
					SourceError::Timeout { method: HISTORY_ENDPOINT }
				} else {
					SourceError::ConnectionUnavailable {
						endpoint: self.base.to_string(),
						message: error.to_string(),
					}
				}
			})?;
		if !response.status().is_success() {
			return Err(SourceError::ConnectionUnavailable {
				endpoint: self.base.to_string(),
				message: format!("HTTP {}", response.status()),
			});
		}
		let body = response.text().await.map_err(|error| SourceError::ConnectionUnavailable {
			endpoint: self.base.to_string(),
			message: error.to_string(),
		})?;
		serde_json::from_str(&body)
			.map_err(|error| SourceError::UnexpectedFormat(format!("history response: {error}")))
	}

	/// Fetches records newer than `known_newest`.
	///
	/// Pages are walked newest-first and the walk stops as soon as the
	/// known record appears, or when the indexer runs out of pages.
	pub async fn fetch_new(
		&self,
		address: &str,
		known_newest: Option<&str>,
	) -> Result<Vec<HistoryRecord>, SourceError> {
		let mut collected = Vec::new();
		let mut cursor: Option<String> = None;
		loop {
			let page = self.fetch_history(address, cursor.as_deref()).await?;
			for record in page.records {
				if known_newest.is_some_and(|id| id == record.id) {
					return Ok(collected);
				}
				collected.push(record);
			}
			match page.next_cursor {
				Some(next) => cursor = Some(next),
				None => return Ok(collected),
			}
		}
	}
}

/// Merges freshly fetched records into an existing list.
///
/// Fetched records win on identifier collisions. The result is sorted
/// newest block first.
pub fn merge_records(existing: Vec<HistoryRecord>, fetched: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
	let mut merged = fetched;
	let seen: HashSet<String> = merged.iter().map(|record| record.id.clone()).collect();
	merged.extend(existing.into_iter().filter(|record| !seen.contains(&record.id)));
	merged.sort_by(|a, b| b.block_number.cmp(&a.block_number));
	merged
}

#[cfg(test)]
mod tests {
	use super::*;
	use mockito::{Matcher, Server};

	fn record(id: &str, block: u64) -> HistoryRecord {
		HistoryRecord {
			id: id.to_string(),
			block_number: block,
			module: "Balances".to_string(),
			call: "transfer".to_string(),
			amount: Some("1000".to_string()),
			success: true,
			timestamp: 1_700_000_000,
		}
	}

	fn record_json(id: &str, block: u64) -> String {
		format!(
			r#"{{"id":"{id}","blockNumber":{block},"module":"Balances","call":"transfer","amount":"1000","success":true,"timestamp":1700000000}}"#
		)
	}

	#[tokio::test]
	async fn pages_until_the_indexer_runs_out() {
		let mut server = Server::new_async().await;
		let first = server
			.mock("GET", "/history")
			.match_query(Matcher::Exact("address=addr&limit=2".to_string()))
			.with_body(format!(
				r#"{{"records":[{},{}],"nextCursor":"page-2"}}"#,
				record_json("tx-3", 30),
				record_json("tx-2", 20)
			))
			.create_async()
			.await;
		let second = server
			.mock("GET", "/history")
			.match_query(Matcher::Exact("address=addr&limit=2&cursor=page-2".to_string()))
			.with_body(format!(r#"{{"records":[{}],"nextCursor":null}}"#, record_json("tx-1", 10)))
			.create_async()
			.await;

		let source = HistorySource::new(Url::parse(&server.url()).unwrap()).with_page_size(2);
		let records = source.fetch_new("addr", None).await.unwrap();
		assert_eq!(records, vec![record("tx-3", 30), record("tx-2", 20), record("tx-1", 10)]);
		first.assert_async().await;
		second.assert_async().await;
	}

	#[tokio::test]
	async fn stops_at_the_known_record() {
		let mut server = Server::new_async().await;
		server
			.mock("GET", "/history")
			.match_query(Matcher::Exact("address=addr&limit=100".to_string()))
			.with_body(format!(
				r#"{{"records":[{},{},{}],"nextCursor":"page-2"}}"#,
				record_json("tx-3", 30),
				record_json("tx-2", 20),
				record_json("tx-1", 10)
			))
			.create_async()
			.await;

		// No page-2 mock: reaching for it would fail the fetch.
		let source = HistorySource::new(Url::parse(&server.url()).unwrap());
		let records = source.fetch_new("addr", Some("tx-2")).await.unwrap();
		assert_eq!(records, vec![record("tx-3", 30)]);
	}

	#[tokio::test]
	async fn server_errors_surface_as_unavailable() {
		let mut server = Server::new_async().await;
		server.mock("GET", "/history").match_query(Matcher::Any).with_status(500).create_async().await;

		let source = HistorySource::new(Url::parse(&server.url()).unwrap());
		let error = source.fetch_history("addr", None).await.unwrap_err();
		assert!(matches!(error, SourceError::ConnectionUnavailable { .. }), "got {error}");
		assert!(error.is_unavailable());
	}

	#[tokio::test]
	async fn malformed_payloads_are_rejected() {
		let mut server = Server::new_async().await;
		server
			.mock("GET", "/history")
			.match_query(Matcher::Any)
			.with_body("not json")
			.create_async()
			.await;

		let source = HistorySource::new(Url::parse(&server.url()).unwrap());
		let error = source.fetch_history("addr", None).await.unwrap_err();
		assert!(matches!(error, SourceError::UnexpectedFormat(_)), "got {error}");
	}

	#[test]
	fn merge_dedupes_and_sorts_newest_first() {
		let existing = vec![record("tx-2", 20), record("tx-1", 10)];
		let fetched = vec![record("tx-3", 30), record("tx-2", 21)];
		let merged = merge_records(existing, fetched);
		// The fetched copy of tx-2 wins.
		assert_eq!(merged, vec![record("tx-3", 30), record("tx-2", 21), record("tx-1", 10)]);
	}
}
