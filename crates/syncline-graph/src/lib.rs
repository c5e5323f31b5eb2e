// SPDX-License-Identifier: GPL-3.0

//! Priority-scheduled task graphs with explicit dependencies and shared
//! result slots.
//!
//! The crate models a unit of async work as a *task*: a future whose output
//! is written once into a result slot that any number of handles can read.
//! Edges between tasks are declared explicitly at submission time, and the
//! scheduler admits a task only after all of its parents have finished,
//! keeping at most a configured number of tasks running at once.
//!
//! ```text
//!   submit(label, priority, deps, future)
//!            |
//!            v
//!   +------------------+     ready      +-----------------+
//!   |    dispatcher    | -------------> |  worker slots   |
//!   |  (edge counting) |   (by prio)    |  (max N tasks)  |
//!   +------------------+                +-----------------+
//!            ^                                   |
//!            |  completed                        v
//!            +----------------------------- result slot
//!                                                |
//!                                                v
//!                                      TaskHandle::result()
//! ```
//!
//! Finishing is completion, not success: a task that wants to signal a
//! domain failure returns a `Result` as its output, and dependents read it
//! and propagate it however they see fit. The only error the graph itself
//! introduces is [`GraphError::ParentCancelled`], surfaced to anyone
//! reading a slot whose task was cancelled.

mod error;
mod handle;
mod scheduler;

pub use error::GraphError;
pub use handle::{Dependency, TaskHandle};
pub use scheduler::{DEFAULT_MAX_CONCURRENCY, GraphConfig, Priority, TaskGraph};
