//! The signal pipeline.
//!
//! Concurrent analysis, serialized execution: W worker tasks scan
//! disjoint instrument subsets and enqueue candidates into one bounded
//! priority queue; exactly one executor task drains it and is the only
//! code path that submits orders. Account state is therefore mutated
//! from a single task and needs no cross-thread coordination.

pub mod executor;
pub mod queue;
pub mod worker;

pub use executor::{Executor, ExecutorConfig, ExecutorDeps};
pub use queue::{PushOutcome, SignalQueue};
pub use worker::{spawn_workers, WorkerConfig};
