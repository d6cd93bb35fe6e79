//! Dependency graph for local packages

use nodelink_tasks::{DependencyGraph, Node};
use tracing::debug;

use crate::error::Result;

use super::discovery::DiscoveredPackage;

/// Dependency graph whose nodes carry the discovered packages
pub type PackageGraph = DependencyGraph<DiscoveredPackage>;

/// Build the dependency graph of the given packages.
///
/// Only dependencies on other packages of the set become edges; registry
/// dependencies are left to the install step.
pub fn package_graph(packages: Vec<DiscoveredPackage>) -> Result<PackageGraph> {
    let nodes = packages.into_iter().map(|package| {
        Node::new(package.name.clone(), package.clone())
            .with_dependencies(package.dependencies.iter().cloned())
    });
    let graph = DependencyGraph::build(nodes)?;
    debug!(packages = graph.len(), "package graph built");
    Ok(graph)
}

/// Local packages the given package depends on directly
pub fn local_dependencies<'a>(
    graph: &'a PackageGraph,
    package: &DiscoveredPackage,
) -> Vec<&'a DiscoveredPackage> {
    graph
        .dependencies_in_graph(&package.name)
        .into_iter()
        .filter_map(|name| graph.get(name))
        .map(|node| &node.payload)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodelinkError;
    use nodelink_tasks::DagError;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;

    fn package(name: &str, deps: &[&str]) -> DiscoveredPackage {
        DiscoveredPackage {
            name: name.to_string(),
            version: Some("1.0.0".to_string()),
            path: PathBuf::from("packages").join(name),
            manifest_path: PathBuf::from("packages").join(name).join("package.json"),
            dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            bin: BTreeMap::new(),
            private: false,
        }
    }

    #[test]
    fn test_package_graph_orders_dependencies_first() {
        let graph = package_graph(vec![
            package("app", &["ui", "react"]),
            package("core", &[]),
            package("ui", &["core"]),
        ])
        .unwrap();

        assert_eq!(graph.sorted(), ["core", "ui", "app"]);
        assert_eq!(graph.dependencies_in_graph("app"), vec!["ui"]);
    }

    #[test]
    fn test_local_dependencies() {
        let app = package("app", &["core", "ui", "lodash"]);
        let graph = package_graph(vec![
            app.clone(),
            package("core", &[]),
            package("ui", &["core"]),
        ])
        .unwrap();

        let deps: Vec<&str> = local_dependencies(&graph, &app)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(deps, vec!["core", "ui"]);
    }

    #[test]
    fn test_package_cycle_is_reported() {
        let err = package_graph(vec![package("a", &["b"]), package("b", &["a"])]).unwrap_err();
        match err {
            NodelinkError::Graph(DagError::Cycle(cycle)) => {
                assert_eq!(cycle.members(), BTreeSet::from(["a", "b"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
