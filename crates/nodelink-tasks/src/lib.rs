//! Nodelink Tasks - dependency-ordered task execution
//!
//! This crate provides a dependency graph with cycle detection, a bounded
//! FIFO executor pool, and a scheduler that runs one asynchronous action per
//! graph node once all of the node's dependencies have completed.

pub mod dag;
pub mod pool;
pub mod reporter;
pub mod scheduler;

pub use dag::{CycleError, DagError, DependencyGraph, Node};
pub use pool::{default_concurrency, Completion, ExecutorPool, PoolError, RequestId};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TracingReporter};
pub use scheduler::{
    plural, DependencyScheduler, ExecutionState, NodeCompletion, NodeFailure, RunError,
    RunSummary, ScheduledRun, SchedulerOptions,
};
