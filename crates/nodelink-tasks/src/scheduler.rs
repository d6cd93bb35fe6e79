//! Dependency scheduler: runs one action per graph node on a bounded pool
//!
//! Every node gets a completion future that resolves once its action has
//! run. A node's action is submitted to the pool only after the completion
//! futures of all its dependencies have resolved successfully; if any of them
//! fails, the node fails immediately without running and without taking a
//! pool slot. Nodes that do not depend on a failed node are unaffected.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{join_all, try_join_all, BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::dag::{DependencyGraph, Node};
use crate::pool::{default_concurrency, ExecutorPool, PoolError};
use crate::reporter::{TaskEvent, TaskReporter};

/// Completion future of a single node, observable by any number of waiters
pub type NodeCompletion<V> = Shared<BoxFuture<'static, Result<V, NodeFailure>>>;

/// Execution state of a node within a run.
///
/// A node whose dependency failed stays `Pending` forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a node did not complete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeFailure {
    /// The node's own action failed
    #[error("{node} failed: {reason}")]
    Failed { node: String, reason: String },

    /// A dependency did not complete, so the action never ran
    #[error("{node} skipped: dependency {blocked_by} did not complete")]
    Blocked {
        node: String,
        /// The direct dependency whose failure blocked this node
        blocked_by: String,
        /// The node whose action failed and started the chain
        root: String,
    },
}

impl NodeFailure {
    /// The node this failure belongs to
    pub fn node(&self) -> &str {
        match self {
            Self::Failed { node, .. } | Self::Blocked { node, .. } => node,
        }
    }

    /// The node whose action actually failed
    pub fn root(&self) -> &str {
        match self {
            Self::Failed { node, .. } => node,
            Self::Blocked { root, .. } => root,
        }
    }

    /// Check if the node's action was never invoked
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Result of a fully successful run
#[derive(Debug, Clone)]
pub struct RunSummary<V> {
    /// Every node with its action's value, in topological order
    pub completed: Vec<(String, V)>,
    /// Wall time from scheduling until the last node settled
    pub duration: Duration,
}

/// Failure of an overall run, aggregating every failed and skipped node
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error(
        "{} task{} failed, {} skipped: {}",
        .failed.len(),
        plural(.failed.len()),
        .skipped.len(),
        describe(.failed)
    )]
    Failed {
        /// Nodes whose action failed
        failed: Vec<NodeFailure>,
        /// Nodes never run because a dependency failed
        skipped: Vec<NodeFailure>,
        /// Nodes that completed successfully
        completed: Vec<String>,
    },
}

/// "s" unless `count` is one
pub fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn describe(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Options for the dependency scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent actions
    pub concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Per-node execution states shared between the run handle and the actions
#[derive(Clone, Default)]
struct StateTable(Arc<Mutex<HashMap<String, ExecutionState>>>);

impl StateTable {
    fn set(&self, id: &str, state: ExecutionState) {
        let mut table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        table.insert(id.to_string(), state);
    }

    fn get(&self, id: &str) -> Option<ExecutionState> {
        let table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        table.get(id).copied()
    }
}

/// Runs a dependency graph's actions in dependency order on a bounded pool
pub struct DependencyScheduler {
    pool: ExecutorPool,
    reporter: Arc<dyn TaskReporter>,
}

impl DependencyScheduler {
    /// Create a new scheduler
    pub fn new(options: SchedulerOptions, reporter: Arc<dyn TaskReporter>) -> Result<Self, PoolError> {
        Ok(Self {
            pool: ExecutorPool::new(options.concurrency)?,
            reporter,
        })
    }

    /// The pool actions are submitted to
    pub fn pool(&self) -> &ExecutorPool {
        &self.pool
    }

    /// Run `action` for every node of `graph` and wait for all of them to
    /// settle.
    pub async fn run<T, V, E, F, Fut>(
        &self,
        graph: &DependencyGraph<T>,
        action: F,
    ) -> Result<RunSummary<V>, RunError>
    where
        T: Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(Arc<Node<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.schedule(graph, action).wait().await
    }

    /// Wire up completion futures for every node and start driving them.
    ///
    /// Must be called from within a tokio runtime. Nodes progress in the
    /// background whether or not the returned handle is awaited.
    #[instrument(skip_all, fields(nodes = graph.len(), capacity = self.pool.capacity()))]
    pub fn schedule<T, V, E, F, Fut>(&self, graph: &DependencyGraph<T>, action: F) -> ScheduledRun<V>
    where
        T: Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(Arc<Node<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let started = Instant::now();
        let action = Arc::new(action);
        let states = StateTable::default();
        let mut completions: HashMap<String, NodeCompletion<V>> = HashMap::new();

        // Topological order guarantees every dependency's completion exists
        // by the time its dependents are wired.
        for node in graph.iter() {
            states.set(&node.id, ExecutionState::Pending);

            let dependencies: Vec<NodeCompletion<V>> = graph
                .dependencies_in_graph(&node.id)
                .into_iter()
                .filter_map(|dep| completions.get(dep).cloned())
                .collect();

            let completion = run_node(
                Arc::clone(node),
                dependencies,
                self.pool.clone(),
                Arc::clone(&action),
                states.clone(),
                Arc::clone(&self.reporter),
            )
            .boxed()
            .shared();

            tokio::spawn(completion.clone());
            completions.insert(node.id.clone(), completion);
        }

        debug!(nodes = completions.len(), "all nodes scheduled");

        ScheduledRun {
            order: graph.sorted().to_vec(),
            completions,
            states,
            reporter: Arc::clone(&self.reporter),
            started,
        }
    }
}

/// Wait for a node's dependencies, then run its action on the pool
async fn run_node<T, V, E, F, Fut>(
    node: Arc<Node<T>>,
    dependencies: Vec<NodeCompletion<V>>,
    pool: ExecutorPool,
    action: Arc<F>,
    states: StateTable,
    reporter: Arc<dyn TaskReporter>,
) -> Result<V, NodeFailure>
where
    T: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + 'static,
    F: Fn(Arc<Node<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    let id = node.id.clone();

    if let Err(failure) = try_join_all(dependencies).await {
        reporter.report(&TaskEvent::Skipped {
            id: id.clone(),
            blocked_by: failure.node().to_string(),
        });
        return Err(NodeFailure::Blocked {
            node: id,
            blocked_by: failure.node().to_string(),
            root: failure.root().to_string(),
        });
    }

    reporter.report(&TaskEvent::Queued { id: id.clone() });

    let submitted = {
        let id = id.clone();
        let reporter = Arc::clone(&reporter);
        let states = states.clone();
        pool.submit(move || async move {
            states.set(&id, ExecutionState::Running);
            reporter.report(&TaskEvent::Started { id: id.clone() });
            let start = Instant::now();

            let result = action(node).await;
            let duration = start.elapsed();

            match result {
                Ok(value) => {
                    states.set(&id, ExecutionState::Completed);
                    reporter.report(&TaskEvent::Completed { id, duration });
                    Ok(value)
                }
                Err(e) => {
                    let reason = e.to_string();
                    states.set(&id, ExecutionState::Failed);
                    reporter.report(&TaskEvent::Failed {
                        id,
                        duration,
                        error: reason.clone(),
                    });
                    Err(reason)
                }
            }
        })
    };

    match submitted.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(reason)) => Err(NodeFailure::Failed { node: id, reason }),
        Err(abandoned) => {
            let reason = abandoned.to_string();
            states.set(&id, ExecutionState::Failed);
            reporter.report(&TaskEvent::Failed {
                id: id.clone(),
                duration: Duration::ZERO,
                error: reason.clone(),
            });
            Err(NodeFailure::Failed { node: id, reason })
        }
    }
}

/// Handle to a scheduled run
pub struct ScheduledRun<V> {
    order: Vec<String>,
    completions: HashMap<String, NodeCompletion<V>>,
    states: StateTable,
    reporter: Arc<dyn TaskReporter>,
    started: Instant,
}

impl<V> ScheduledRun<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Completion future of a single node
    pub fn completion(&self, id: &str) -> Option<NodeCompletion<V>> {
        self.completions.get(id).cloned()
    }

    /// Current execution state of a node
    pub fn state(&self, id: &str) -> Option<ExecutionState> {
        self.states.get(id)
    }

    /// Number of scheduled nodes
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the run has no nodes
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Wait for every node to settle.
    ///
    /// Independent branches are never cancelled: by the time this returns,
    /// every node has either completed, failed, or been skipped.
    pub async fn wait(self) -> Result<RunSummary<V>, RunError> {
        let pending: Vec<_> = self
            .order
            .iter()
            .filter_map(|id| self.completions.get(id).cloned().map(|c| (id.clone(), c)))
            .collect();
        let (ids, futures): (Vec<String>, Vec<NodeCompletion<V>>) = pending.into_iter().unzip();
        let results = join_all(futures).await;

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(value) => completed.push((id, value)),
                Err(failure) if failure.is_blocked() => skipped.push(failure),
                Err(failure) => failed.push(failure),
            }
        }

        let duration = self.started.elapsed();
        self.reporter.report(&TaskEvent::AllCompleted {
            total: self.order.len(),
            succeeded: completed.len(),
            failed: failed.len(),
            skipped: skipped.len(),
            duration,
        });

        if failed.is_empty() && skipped.is_empty() {
            Ok(RunSummary {
                completed,
                duration,
            })
        } else {
            Err(RunError::Failed {
                failed,
                skipped,
                completed: completed.into_iter().map(|(id, _)| id).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Node payload: how long the action takes and whether it fails
    #[derive(Debug, Clone, Copy)]
    struct Work {
        millis: u64,
        fails: bool,
    }

    fn ok(id: &str, deps: &[&str]) -> Node<Work> {
        Node::new(id, Work { millis: 10, fails: false }).with_dependencies(deps.iter().copied())
    }

    fn failing(id: &str, deps: &[&str]) -> Node<Work> {
        Node::new(id, Work { millis: 10, fails: true }).with_dependencies(deps.iter().copied())
    }

    fn scheduler(concurrency: usize) -> (DependencyScheduler, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let scheduler =
            DependencyScheduler::new(SchedulerOptions { concurrency }, reporter.clone()).unwrap();
        (scheduler, reporter)
    }

    /// Records invocations and the peak number of concurrently running actions
    #[derive(Default)]
    struct Recorder {
        invoked: Mutex<Vec<String>>,
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl Recorder {
        fn invoked(&self) -> Vec<String> {
            self.invoked.lock().unwrap().clone()
        }

        fn action(
            recorder: &Arc<Recorder>,
        ) -> impl Fn(Arc<Node<Work>>) -> BoxFuture<'static, Result<String, String>> + Send + Sync
        {
            let recorder = Arc::clone(recorder);
            move |node: Arc<Node<Work>>| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.invoked.lock().unwrap().push(node.id.clone());
                    let now = recorder.current.fetch_add(1, Ordering::SeqCst) + 1;
                    recorder.max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(node.payload.millis)).await;
                    recorder.current.fetch_sub(1, Ordering::SeqCst);
                    if node.payload.fails {
                        Err(format!("{} exploded", node.id))
                    } else {
                        Ok(format!("{} done", node.id))
                    }
                }
                .boxed()
            }
        }
    }

    fn index_of(events: &[TaskEvent], wanted: &TaskEvent) -> usize {
        events
            .iter()
            .position(|e| match (e, wanted) {
                (TaskEvent::Started { id: a }, TaskEvent::Started { id: b }) => a == b,
                (TaskEvent::Completed { id: a, .. }, TaskEvent::Completed { id: b, .. }) => a == b,
                _ => false,
            })
            .unwrap()
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(0), "s");
        assert_eq!(plural(1), "");
        assert_eq!(plural(2), "s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_runs_after_its_dependency_with_single_slot() {
        let graph = DependencyGraph::build(vec![ok("A", &[]), ok("B", &["A"]), ok("C", &[])])
            .unwrap();
        let (scheduler, reporter) = scheduler(1);
        let recorder = Arc::new(Recorder::default());

        let summary = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap();

        assert_eq!(summary.completed.len(), 3);
        assert_eq!(recorder.invoked(), vec!["A", "C", "B"]);
        assert_eq!(reporter.started(), vec!["A", "C", "B"]);

        let events = reporter.events();
        let a_done = index_of(
            &events,
            &TaskEvent::Completed {
                id: "A".into(),
                duration: Duration::ZERO,
            },
        );
        let b_started = index_of(&events, &TaskEvent::Started { id: "B".into() });
        assert!(a_done < b_started);
        assert_eq!(recorder.max.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_nodes_run_together() {
        let graph = DependencyGraph::build(vec![ok("A", &[]), ok("B", &[])]).unwrap();
        let (scheduler, _) = scheduler(2);
        let recorder = Arc::new(Recorder::default());

        let start = Instant::now();
        let summary = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap();

        assert_eq!(summary.completed.len(), 2);
        assert_eq!(recorder.max.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_skips_dependents() {
        let graph = DependencyGraph::build(vec![failing("A", &[]), ok("B", &["A"])]).unwrap();
        let (scheduler, reporter) = scheduler(2);
        let recorder = Arc::new(Recorder::default());

        let run = scheduler.schedule(&graph, Recorder::action(&recorder));
        let a = run.completion("A").unwrap();
        let b = run.completion("B").unwrap();
        let result = run.wait().await;

        assert_eq!(
            a.await,
            Err(NodeFailure::Failed {
                node: "A".into(),
                reason: "A exploded".into()
            })
        );
        assert_eq!(
            b.await,
            Err(NodeFailure::Blocked {
                node: "B".into(),
                blocked_by: "A".into(),
                root: "A".into()
            })
        );
        assert_eq!(recorder.invoked(), vec!["A"]);

        match result {
            Err(RunError::Failed {
                failed,
                skipped,
                completed,
            }) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].node(), "A");
                assert_eq!(skipped.len(), 1);
                assert_eq!(skipped[0].node(), "B");
                assert!(completed.is_empty());
            }
            Ok(_) => panic!("run should fail"),
        }

        assert!(reporter.events().contains(&TaskEvent::Skipped {
            id: "B".into(),
            blocked_by: "A".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_quarantines_only_its_lineage() {
        let graph = DependencyGraph::build(vec![
            failing("A", &[]),
            ok("B", &["A"]),
            ok("E", &["B"]),
            ok("C", &[]),
            ok("D", &["C"]),
        ])
        .unwrap();
        let (scheduler, _) = scheduler(2);
        let recorder = Arc::new(Recorder::default());

        let run = scheduler.schedule(&graph, Recorder::action(&recorder));
        let e = run.completion("E").unwrap();
        let err = run.wait().await.unwrap_err();

        let mut invoked = recorder.invoked();
        invoked.sort();
        assert_eq!(invoked, vec!["A", "C", "D"]);

        let RunError::Failed {
            skipped, completed, ..
        } = err;
        assert_eq!(completed, vec!["C", "D"]);
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|f| f.root() == "A"));

        match e.await {
            Err(NodeFailure::Blocked { blocked_by, root, .. }) => {
                assert_eq!(blocked_by, "B");
                assert_eq!(root, "A");
            }
            other => panic!("unexpected outcome for E: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_independent_failures_are_reported() {
        let graph =
            DependencyGraph::build(vec![failing("A", &[]), failing("B", &[]), ok("C", &[])])
                .unwrap();
        let (scheduler, _) = scheduler(4);
        let recorder = Arc::new(Recorder::default());

        let err = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap_err();
        let RunError::Failed { failed, .. } = &err;
        let nodes: Vec<_> = failed.iter().map(|f| f.node()).collect();

        assert_eq!(nodes, vec!["A", "B"]);
        assert!(err.to_string().starts_with("2 tasks failed, 0 skipped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_respected() {
        let nodes = (0..5).map(|i| ok(&format!("n{}", i), &[])).collect::<Vec<_>>();
        let graph = DependencyGraph::build(nodes).unwrap();
        let (scheduler, _) = scheduler(2);
        let recorder = Arc::new(Recorder::default());

        let summary = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap();

        assert_eq!(summary.completed.len(), 5);
        assert_eq!(recorder.max.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diamond_runs_each_node_once() {
        let graph = DependencyGraph::build(vec![
            ok("base", &[]),
            ok("left", &["base"]),
            ok("right", &["base"]),
            ok("top", &["left", "right"]),
        ])
        .unwrap();
        let (scheduler, _) = scheduler(4);
        let recorder = Arc::new(Recorder::default());

        let summary = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap();
        let invoked = recorder.invoked();

        assert_eq!(invoked.len(), 4);
        assert_eq!(invoked.first().map(String::as_str), Some("base"));
        assert_eq!(invoked.last().map(String::as_str), Some("top"));
        assert_eq!(
            summary.completed.last(),
            Some(&("top".to_string(), "top done".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_graph_completes_immediately() {
        let graph = DependencyGraph::<Work>::build(Vec::new()).unwrap();
        let (scheduler, reporter) = scheduler(1);
        let recorder = Arc::new(Recorder::default());

        let summary = scheduler.run(&graph, Recorder::action(&recorder)).await.unwrap();

        assert!(summary.completed.is_empty());
        assert!(recorder.invoked().is_empty());
        assert!(matches!(
            reporter.events().as_slice(),
            [TaskEvent::AllCompleted { total: 0, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_states() {
        let graph = DependencyGraph::build(vec![
            ok("ok", &[]),
            failing("bad", &[]),
            ok("blocked", &["bad"]),
        ])
        .unwrap();
        let (scheduler, _) = scheduler(2);
        let recorder = Arc::new(Recorder::default());

        let run = scheduler.schedule(&graph, Recorder::action(&recorder));
        assert_eq!(run.state("ok"), Some(ExecutionState::Pending));
        assert_eq!(run.len(), 3);

        run.completion("ok").unwrap().await.unwrap();
        run.completion("blocked").unwrap().await.unwrap_err();

        assert_eq!(run.state("ok"), Some(ExecutionState::Completed));
        assert_eq!(run.state("bad"), Some(ExecutionState::Failed));
        assert_eq!(run.state("blocked"), Some(ExecutionState::Pending));
        assert_eq!(run.state("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_progress_without_waiting_on_the_run() {
        let graph = DependencyGraph::build(vec![ok("a", &[]), ok("b", &["a"])]).unwrap();
        let (scheduler, _) = scheduler(1);
        let recorder = Arc::new(Recorder::default());

        let run = scheduler.schedule(&graph, Recorder::action(&recorder));
        let b = run.completion("b").unwrap();

        assert_eq!(b.await, Ok("b done".to_string()));
        assert_eq!(recorder.invoked(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let reporter = Arc::new(CollectingReporter::default());
        let result = DependencyScheduler::new(SchedulerOptions { concurrency: 0 }, reporter);
        assert!(matches!(result, Err(PoolError::ZeroCapacity)));
    }

    #[test]
    fn test_scheduler_options_default() {
        assert!(SchedulerOptions::default().concurrency > 0);
    }
}
