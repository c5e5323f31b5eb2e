// SPDX-License-Identifier: GPL-3.0

//! Task graph construction and priority-based admission.
//!
//! A [`TaskGraph`] accepts async work units together with explicit
//! dependency edges and runs them on the tokio runtime, admitting at most a
//! configured number of tasks at a time. Dependents are admitted once every
//! parent has *finished*, not once it has *succeeded*: domain failures
//! travel inside the result values, and each task decides for itself how to
//! react to a failed parent.
//!
//! # Design Decision: Single Dispatcher Task
//!
//! All bookkeeping lives in one spawned dispatcher task fed by an unbounded
//! command channel, rather than in a shared mutex-guarded state:
//!
//! 1. Submissions and completions are serialized by the channel, so edge
//!    accounting needs no locks and no atomics beyond the id counter.
//! 2. The ready queue is a priority heap ordered by (priority, submission
//!    sequence), which gives strict priority admission with FIFO ordering
//!    inside each priority level.
//! 3. Cancellation is a token shared with every task wrapper. The wrapper
//!    checks it before running the user future and races it while running,
//!    so pending slots resolve promptly on teardown instead of leaking
//!    waiters.
//!
//! # Example
//!
//! ```ignore
//! let graph = TaskGraph::new(GraphConfig::default());
//! let parent = graph.submit("load", Priority::Normal, vec![], async { 21u32 });
//! let edge = parent.dependency();
//! let child = {
//!     let parent = parent.clone();
//!     graph.submit("double", Priority::Normal, vec![edge], async move {
//!         parent.result().await.map(|n| n * 2)
//!     })
//! };
//! assert_eq!(child.result().await??, 42);
//! ```

use crate::{
	error::GraphError,
	handle::{Dependency, NodeId, Slot, TaskHandle},
};
use futures::{FutureExt, future::BoxFuture};
use std::{
	cmp::Ordering,
	collections::{BinaryHeap, HashMap, HashSet},
	future::Future,
	sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Default number of tasks admitted concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Admission priority of a task.
///
/// Higher priorities are admitted first when several tasks are ready at the
/// same time; tasks of equal priority are admitted in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
	Low,
	Normal,
	High,
}

/// Configuration for a [`TaskGraph`].
#[derive(Debug, Clone)]
pub struct GraphConfig {
	max_concurrency: usize,
}

impl GraphConfig {
	/// Limits how many tasks may run at the same time. Clamped to at
	/// least one.
	pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
		self.max_concurrency = max_concurrency.max(1);
		self
	}

	/// The configured admission width.
	pub fn max_concurrency(&self) -> usize {
		self.max_concurrency
	}
}

impl Default for GraphConfig {
	fn default() -> Self {
		Self { max_concurrency: DEFAULT_MAX_CONCURRENCY }
	}
}

/// Messages from graph handles and task wrappers to the dispatcher.
enum Command {
	Submit(NodeSpec),
	Completed(NodeId),
}

/// A submitted task before admission.
struct NodeSpec {
	id: NodeId,
	label: String,
	priority: Priority,
	dependencies: Vec<NodeId>,
	run: BoxFuture<'static, ()>,
}

/// Dispatcher-side record of a task that has not finished yet.
struct Node {
	label: String,
	priority: Priority,
	/// Parents that have not finished.
	remaining: usize,
	/// Children waiting on this task.
	dependents: Vec<NodeId>,
	/// Taken exactly once when the task is admitted.
	run: Option<BoxFuture<'static, ()>>,
}

/// Heap key ordering ready tasks by priority, then submission sequence.
#[derive(PartialEq, Eq)]
struct ReadyKey {
	priority: Priority,
	seq: u64,
	id: NodeId,
}

impl Ord for ReadyKey {
	fn cmp(&self, other: &Self) -> Ordering {
		// Max-heap: higher priority wins, lower sequence (earlier) wins.
		self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
	}
}

impl PartialOrd for ReadyKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// A dependency-aware scheduler for async work units.
///
/// Dropping the graph cancels every task that has not finished, resolving
/// all pending result slots with cancellation.
#[derive(Debug)]
pub struct TaskGraph {
	commands: mpsc::UnboundedSender<Command>,
	token: CancellationToken,
	next_id: AtomicU64,
}

impl TaskGraph {
	/// Creates a graph and spawns its dispatcher on the current runtime.
	pub fn new(config: GraphConfig) -> Self {
		let (commands, receiver) = mpsc::unbounded_channel();
		let token = CancellationToken::new();
		tokio::spawn(dispatch(receiver, config.max_concurrency(), token.clone()));
		Self { commands, token, next_id: AtomicU64::new(0) }
	}

	/// Submits a task with explicit dependency edges.
	///
	/// The future starts only after every dependency has finished and a
	/// worker slot is free. Its output is written to the task's result
	/// slot, where any number of [`TaskHandle`] clones can read it.
	///
	/// Dependencies obtained from tasks of a *different* graph are treated
	/// as already satisfied.
	pub fn submit<T, F>(
		&self,
		label: impl Into<String>,
		priority: Priority,
		dependencies: Vec<Dependency>,
		future: F,
	) -> TaskHandle<T>
	where
		T: Clone + Send + Sync + 'static,
		F: Future<Output = T> + Send + 'static,
	{
		let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
		let label = label.into();
		let (slot, rx) = watch::channel(Slot::Pending);
		let token = self.token.clone();
		let completions = self.commands.clone();
		let run = {
			let label = label.clone();
			async move {
				if token.is_cancelled() {
					let _ = slot.send(Slot::Cancelled);
				} else {
					tokio::select! {
						biased;
						_ = token.cancelled() => {
							log::trace!("task '{label}' cancelled while running");
							let _ = slot.send(Slot::Cancelled);
						},
						value = future => {
							let _ = slot.send(Slot::Ready(value));
						},
					}
				}
				let _ = completions.send(Command::Completed(id));
			}
			.boxed()
		};
		let spec = NodeSpec { id, label, priority, dependencies: dependencies.iter().map(|d| d.id).collect(), run };
		if let Err(mpsc::error::SendError(command)) = self.commands.send(Command::Submit(spec)) &&
			let Command::Submit(spec) = command
		{
			// Dispatcher is gone, which only happens after teardown; run the
			// wrapper so the slot still resolves to cancelled.
			tokio::spawn(spec.run);
		}
		TaskHandle { id, rx }
	}

	/// Cancels every task that has not finished.
	///
	/// Running tasks stop at their next await point; pending tasks never
	/// start. All unresolved slots resolve to cancellation. The graph stays
	/// usable, but later submissions are cancelled immediately.
	pub fn cancel(&self) {
		log::debug!("cancelling task graph");
		self.token.cancel();
	}

	/// Whether [`cancel`](Self::cancel) has been called.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// A token observing this graph's cancellation.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.token.clone()
	}
}

impl Drop for TaskGraph {
	fn drop(&mut self) {
		self.token.cancel();
	}
}

/// Dispatcher loop: owns all edge accounting and the ready queue.
async fn dispatch(mut commands: mpsc::UnboundedReceiver<Command>, max_concurrency: usize, token: CancellationToken) {
	let mut nodes: HashMap<NodeId, Node> = HashMap::new();
	let mut completed: HashSet<NodeId> = HashSet::new();
	let mut ready: BinaryHeap<ReadyKey> = BinaryHeap::new();
	let mut running: HashSet<NodeId> = HashSet::new();
	let mut next_seq = 0u64;
	let mut drained = false;

	loop {
		tokio::select! {
			biased;
			_ = token.cancelled(), if !drained => {
				drained = true;
				// Spawn every held wrapper; each observes the cancelled
				// token and resolves its slot without running user code.
				ready.clear();
				for node in nodes.values_mut() {
					if let Some(run) = node.run.take() {
						tokio::spawn(run);
					}
				}
			},
			command = commands.recv() => {
				let Some(command) = command else { break };
				match command {
					Command::Submit(spec) => {
						if token.is_cancelled() {
							tokio::spawn(spec.run);
							continue;
						}
						let NodeSpec { id, label, priority, dependencies, run } = spec;
						let mut remaining = 0;
						for dependency in dependencies {
							// Finished or foreign parents count as satisfied.
							if !completed.contains(&dependency) &&
								let Some(parent) = nodes.get_mut(&dependency)
							{
								parent.dependents.push(id);
								remaining += 1;
							}
						}
						let satisfied = remaining == 0;
						nodes.insert(id, Node { label, priority, remaining, dependents: Vec::new(), run: Some(run) });
						if satisfied {
							ready.push(ReadyKey { priority, seq: next_seq, id });
							next_seq += 1;
						}
					},
					Command::Completed(id) => {
						completed.insert(id);
						running.remove(&id);
						if let Some(node) = nodes.remove(&id) {
							log::trace!("task '{}' finished", node.label);
							for dependent in node.dependents {
								if let Some(child) = nodes.get_mut(&dependent) {
									child.remaining -= 1;
									if child.remaining == 0 {
										ready.push(ReadyKey { priority: child.priority, seq: next_seq, id: dependent });
										next_seq += 1;
									}
								}
							}
						}
					},
				}
				admit(&mut nodes, &mut ready, &mut running, max_concurrency, &token);
			},
		}
	}
}

/// Starts ready tasks while worker slots are free.
fn admit(
	nodes: &mut HashMap<NodeId, Node>,
	ready: &mut BinaryHeap<ReadyKey>,
	running: &mut HashSet<NodeId>,
	max_concurrency: usize,
	token: &CancellationToken,
) {
	// After cancellation the wrappers are no-ops, so width no longer matters.
	let unlimited = token.is_cancelled();
	while unlimited || running.len() < max_concurrency {
		let Some(key) = ready.pop() else { break };
		if let Some(node) = nodes.get_mut(&key.id) &&
			let Some(run) = node.run.take()
		{
			log::trace!("admitting task '{}' ({:?})", node.label, node.priority);
			running.insert(key.id);
			tokio::spawn(run);
		}
	}
}
