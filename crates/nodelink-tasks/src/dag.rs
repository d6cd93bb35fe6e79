//! Dependency graph construction and topological ordering

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

/// A node in the dependency graph
#[derive(Debug, Clone, Serialize)]
pub struct Node<T> {
    /// Unique identifier
    pub id: String,
    /// Identifiers this node depends on. Identifiers that are not nodes of
    /// the graph are treated as already satisfied.
    pub dependencies: BTreeSet<String>,
    /// Opaque payload handed to the node's action
    pub payload: T,
}

impl<T> Node<T> {
    /// Create a node without dependencies
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            payload,
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Add several dependencies
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Read-only dependency graph with a precomputed topological order
#[derive(Debug)]
pub struct DependencyGraph<T> {
    /// All nodes, indexed by identifier
    nodes: HashMap<String, Arc<Node<T>>>,
    /// Reverse edges, restricted to nodes of the graph
    dependents: HashMap<String, BTreeSet<String>>,
    /// Topologically sorted order (dependencies before dependents)
    sorted_order: Vec<String>,
}

impl<T> DependencyGraph<T> {
    /// Build a graph from a set of nodes.
    ///
    /// Nodes are visited in the order given, so the resulting order is
    /// deterministic for a given input. Fails with [`DagError::Cycle`] if the
    /// nodes do not form a DAG; the error names every node on the cycle.
    #[instrument(skip_all)]
    pub fn build<I>(nodes: I) -> Result<Self, DagError>
    where
        I: IntoIterator<Item = Node<T>>,
    {
        let mut index: HashMap<String, Arc<Node<T>>> = HashMap::new();
        let mut insertion_order: Vec<String> = Vec::new();

        for node in nodes {
            if index.contains_key(&node.id) {
                return Err(DagError::DuplicateNode(node.id));
            }
            insertion_order.push(node.id.clone());
            index.insert(node.id.clone(), Arc::new(node));
        }

        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();
        for node in index.values() {
            for dep in &node.dependencies {
                if index.contains_key(dep) {
                    dependents
                        .entry(dep.clone())
                        .or_default()
                        .insert(node.id.clone());
                }
            }
        }

        let sorted_order = TopologicalSort::new(&index).run(&insertion_order)?;

        info!(node_count = index.len(), "dependency graph built");

        Ok(Self {
            nodes: index,
            dependents,
            sorted_order,
        })
    }

    /// Get a node by identifier
    pub fn get(&self, id: &str) -> Option<&Arc<Node<T>>> {
        self.nodes.get(id)
    }

    /// Check whether a node exists
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node identifiers in topological order (dependencies first)
    pub fn sorted(&self) -> &[String] {
        &self.sorted_order
    }

    /// Nodes in topological order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node<T>>> + '_ {
        self.sorted_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Direct dependencies of a node that are themselves nodes of the graph
    pub fn dependencies_in_graph(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter(|dep| self.nodes.contains_key(*dep))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct dependents of a node
    pub fn dependents(&self, id: &str) -> HashSet<String> {
        self.dependents
            .get(id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All nodes that depend on the given node, directly or transitively
    pub fn transitive_dependents(&self, id: &str) -> HashSet<String> {
        let mut affected = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            if let Some(direct) = self.dependents.get(current) {
                for dependent in direct {
                    if affected.insert(dependent.clone()) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        affected
    }

    /// Human-readable execution order, one node per line
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, id) in self.sorted_order.iter().enumerate() {
            let deps = self.dependencies_in_graph(id);
            if deps.is_empty() {
                plan.push_str(&format!("{:>3}. {}\n", i + 1, id));
            } else {
                plan.push_str(&format!(
                    "{:>3}. {} (after: {})\n",
                    i + 1,
                    id,
                    deps.join(", ")
                ));
            }
        }
        plan
    }
}

/// Depth-first, post-order topological sort.
///
/// `in_progress` holds the nodes on the current recursion path and `visited`
/// the nodes already emitted. A dependency found in `in_progress` is a back
/// edge, reported upwards as a [`Visit::Partial`] trace until the frame of the
/// node that closes the cycle turns it into a complete [`CycleError`].
struct TopologicalSort<'a, T> {
    nodes: &'a HashMap<String, Arc<Node<T>>>,
    in_progress: HashSet<&'a str>,
    visited: HashSet<&'a str>,
    sorted: Vec<String>,
}

/// Outcome of a failed visit
enum Visit {
    /// A back edge to `closing` was found; `path` holds the frames unwound so
    /// far, starting with `closing` itself.
    Partial { closing: String, path: Vec<String> },
    /// The cycle has been fully described
    Complete(CycleError),
}

impl<'a, T> TopologicalSort<'a, T> {
    fn new(nodes: &'a HashMap<String, Arc<Node<T>>>) -> Self {
        Self {
            nodes,
            in_progress: HashSet::new(),
            visited: HashSet::new(),
            sorted: Vec::with_capacity(nodes.len()),
        }
    }

    fn run(mut self, roots: &'a [String]) -> Result<Vec<String>, DagError> {
        for id in roots {
            match self.visit(id) {
                Ok(()) => {}
                Err(Visit::Complete(cycle)) => return Err(DagError::Cycle(cycle)),
                // The closing node is always an ancestor on the same path,
                // so a partial trace never reaches a root.
                Err(Visit::Partial { closing, mut path }) => {
                    path[1..].reverse();
                    debug!(%closing, "unterminated cycle trace");
                    return Err(DagError::Cycle(CycleError { path }));
                }
            }
        }
        Ok(self.sorted)
    }

    fn visit(&mut self, id: &'a str) -> Result<(), Visit> {
        if self.visited.contains(id) {
            return Ok(());
        }
        if self.in_progress.contains(id) {
            return Err(Visit::Partial {
                closing: id.to_string(),
                path: vec![id.to_string()],
            });
        }

        let nodes = self.nodes;
        let node = match nodes.get(id) {
            Some(node) => node,
            None => return Ok(()),
        };

        self.in_progress.insert(id);
        for dep in &node.dependencies {
            if !nodes.contains_key(dep) {
                continue;
            }
            match self.visit(dep) {
                Ok(()) => {}
                Err(Visit::Partial { closing, mut path }) if closing == id => {
                    // path is [closing, deepest, ..., shallowest]; flip the
                    // tail so it reads in dependency direction.
                    path[1..].reverse();
                    return Err(Visit::Complete(CycleError { path }));
                }
                Err(Visit::Partial { closing, mut path }) => {
                    path.push(id.to_string());
                    return Err(Visit::Partial { closing, path });
                }
                Err(complete) => return Err(complete),
            }
        }
        self.in_progress.remove(id);
        self.visited.insert(id);
        self.sorted.push(id.to_string());
        Ok(())
    }
}

/// A dependency cycle.
///
/// `path` lists the nodes of the cycle in dependency order: each node depends
/// on the next one, and the last depends on the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl CycleError {
    /// Identifiers forming the cycle
    pub fn members(&self) -> BTreeSet<&str> {
        self.path.iter().map(String::as_str).collect()
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join(" -> "))?;
        if let Some(first) = self.path.first() {
            write!(f, " -> {}", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// The nodes contain a dependency cycle
    #[error("Cyclic dependency detected: {0}")]
    Cycle(CycleError),

    /// Two nodes share an identifier
    #[error("Node '{0}' is defined more than once")]
    DuplicateNode(String),
}
