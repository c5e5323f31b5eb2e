// SPDX-License-Identifier: GPL-3.0

//! Handles to submitted tasks and the result slots behind them.
//!
//! Every task submitted to a [`TaskGraph`](crate::TaskGraph) owns a single
//! write-once slot. The wrapper driving the task writes either the produced
//! value or a cancellation marker into the slot exactly once; any number of
//! [`TaskHandle`] clones observe it through a watch channel, so results can
//! be awaited from several places without re-running the task.

use crate::error::GraphError;
use tokio::sync::watch;

/// Identifier assigned to a task when it is submitted.
///
/// Identifiers are unique within one graph and meaningless across graphs.
pub(crate) type NodeId = u64;

/// The state of a task's result slot.
#[derive(Debug, Clone)]
pub(crate) enum Slot<T> {
	/// The task has not finished yet.
	Pending,
	/// The task ran to completion and produced this value.
	Ready(T),
	/// The task was cancelled and will never produce a value.
	Cancelled,
}

/// An edge declaration passed to [`TaskGraph::submit`](crate::TaskGraph::submit).
///
/// Obtained from [`TaskHandle::dependency`]; the new task is only admitted
/// for execution once the referenced task has finished. Finishing means the
/// slot resolved, successfully or not, so a dependent always gets a chance
/// to inspect its parents and decide how to propagate failures.
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
	pub(crate) id: NodeId,
}

/// A cloneable handle to one task's result slot.
///
/// Reading the slot never unblocks the task early and never re-runs it:
/// `result` waits until the slot resolves, while `peek` inspects it without
/// waiting. Dropping every handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
	pub(crate) id: NodeId,
	pub(crate) rx: watch::Receiver<Slot<T>>,
}

// Manual impl: watch receivers clone regardless of `T: Clone`.
impl<T> Clone for TaskHandle<T> {
	fn clone(&self) -> Self {
		Self { id: self.id, rx: self.rx.clone() }
	}
}

impl<T: Clone> TaskHandle<T> {
	/// Waits for the task to finish and returns a clone of its output.
	///
	/// Returns [`GraphError::ParentCancelled`] if the task was cancelled
	/// before producing a value, including when the whole graph was torn
	/// down while the task was still pending.
	pub async fn result(&self) -> Result<T, GraphError> {
		let mut rx = self.rx.clone();
		let slot = rx
			.wait_for(|slot| !matches!(slot, Slot::Pending))
			.await
			.map_err(|_| GraphError::ParentCancelled)?;
		match &*slot {
			Slot::Ready(value) => Ok(value.clone()),
			_ => Err(GraphError::ParentCancelled),
		}
	}

	/// Inspects the slot without waiting.
	///
	/// Returns `None` while the task is still pending.
	pub fn peek(&self) -> Option<Result<T, GraphError>> {
		match &*self.rx.borrow() {
			Slot::Pending => None,
			Slot::Ready(value) => Some(Ok(value.clone())),
			Slot::Cancelled => Some(Err(GraphError::ParentCancelled)),
		}
	}

	/// Declares an edge from this task to a yet-to-be-submitted task.
	pub fn dependency(&self) -> Dependency {
		Dependency { id: self.id }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn handle<T>(initial: Slot<T>) -> (watch::Sender<Slot<T>>, TaskHandle<T>) {
		let (tx, rx) = watch::channel(initial);
		(tx, TaskHandle { id: 0, rx })
	}

	#[test]
	fn peek_reports_slot_state() {
		let (tx, h) = handle::<u32>(Slot::Pending);
		assert!(h.peek().is_none());
		tx.send(Slot::Ready(7)).unwrap();
		assert_eq!(h.peek(), Some(Ok(7)));
	}

	#[test]
	fn peek_reports_cancellation() {
		let (tx, h) = handle::<u32>(Slot::Pending);
		tx.send(Slot::Cancelled).unwrap();
		assert_eq!(h.peek(), Some(Err(GraphError::ParentCancelled)));
	}

	#[tokio::test]
	async fn result_waits_for_resolution() {
		let (tx, h) = handle::<&'static str>(Slot::Pending);
		let waiter = tokio::spawn(async move { h.result().await });
		tx.send(Slot::Ready("done")).unwrap();
		assert_eq!(waiter.await.unwrap(), Ok("done"));
	}

	#[tokio::test]
	async fn result_maps_dropped_sender_to_cancellation() {
		let (tx, h) = handle::<u32>(Slot::Pending);
		drop(tx);
		assert_eq!(h.result().await, Err(GraphError::ParentCancelled));
	}

	#[tokio::test]
	async fn clones_observe_the_same_slot() {
		let (tx, h) = handle::<u32>(Slot::Pending);
		let other = h.clone();
		tx.send(Slot::Ready(3)).unwrap();
		assert_eq!(h.result().await, Ok(3));
		assert_eq!(other.result().await, Ok(3));
	}
}
