// SPDX-License-Identifier: GPL-3.0

//! Error types used across the crate.
//!
//! Errors are organized by concern:
//!
//! - [`SourceError`]: remote source failures (unreachable endpoint,
//!   request failures, timeouts, malformed responses).
//! - [`MetadataError`]: runtime metadata that cannot be fetched or decoded.
//! - [`KeyError`]: storage key derivation failures (unknown items, bad
//!   parameters).
//! - [`CodecError`]: storage value decoding failures.
//! - [`CacheError`]: local cache failures (database, filesystem,
//!   corruption).
//! - [`ProviderError`]: umbrella type returned by provider operations,
//!   wrapping all of the above plus cancellation.

mod cache;
mod codec;
mod keys;
mod metadata;
mod provider;
mod source;

pub use cache::CacheError;
pub use codec::CodecError;
pub use keys::KeyError;
pub use metadata::MetadataError;
pub use provider::ProviderError;
pub use source::SourceError;
