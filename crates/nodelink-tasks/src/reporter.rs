//! Scheduler event reporting

use std::sync::Mutex;
use std::time::Duration;

/// Events emitted while a dependency graph is being run
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A node's dependencies completed and its action was submitted to the pool
    Queued { id: String },
    /// A node's action started running
    Started { id: String },
    /// A node's action completed successfully
    Completed { id: String, duration: Duration },
    /// A node's action failed
    Failed {
        id: String,
        duration: Duration,
        error: String,
    },
    /// A node was never run because a dependency did not complete
    Skipped { id: String, blocked_by: String },
    /// Every node has settled
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting scheduler progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Queued { id } => {
                tracing::debug!(node = %id, "dependencies satisfied, queued");
            }
            TaskEvent::Started { id } => {
                tracing::info!("Starting {}", id);
            }
            TaskEvent::Completed { id, duration } => {
                tracing::info!("{} completed in {:.1}s", id, duration.as_secs_f64());
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
            }
            TaskEvent::Skipped { id, blocked_by } => {
                tracing::warn!("{} skipped: dependency {} did not complete", id, blocked_by);
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "All tasks settled: {}/{} succeeded, {} failed, {} skipped ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Node identifiers in the order their actions started
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Started { id } => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
