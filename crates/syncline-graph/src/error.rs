// SPDX-License-Identifier: GPL-3.0

//! Error types for task graph execution.

use thiserror::Error;

/// Errors surfaced when reading a task's result slot.
///
/// The graph layer does not model domain failures: a task that wants to
/// report an application error returns a `Result` as its output value, and
/// downstream tasks inspect it when they read the slot.
/// The only failure the graph itself produces is cancellation, which leaves
/// the slot without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
	/// The task this slot belongs to was cancelled before it produced a
	/// value, either individually or as part of a graph-wide teardown.
	#[error("parent task was cancelled before producing a result")]
	ParentCancelled,
}
