use std::collections::HashMap;

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::dependency_resolver::DependencyNode;
use crate::unit::UnitId;

/// Build a graph with an edge from every dependency to its dependent.
/// Dependencies naming unknown units are left out.
pub fn dependency_graph(nodes: &[DependencyNode]) -> DiGraph<String, ()> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut node_map: HashMap<&UnitId, NodeIndex> = HashMap::new();

    for node in nodes {
        let idx = graph.add_node(node.id().to_string());
        node_map.insert(node.id(), idx);
    }

    for node in nodes {
        let Some(&to_idx) = node_map.get(node.id()) else {
            continue;
        };

        let mut dependencies: Vec<&UnitId> = node.dependencies.iter().collect();
        dependencies.sort();
        for dependency in dependencies {
            if let Some(&from_idx) = node_map.get(dependency) {
                graph.update_edge(from_idx, to_idx, ());
            }
        }
    }

    graph
}

/// Render the dependency graph in Graphviz DOT format.
pub fn to_dot(nodes: &[DependencyNode]) -> String {
    let graph = dependency_graph(nodes);
    format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Source, SourceFormat, Unit};
    use petgraph::algo::toposort;

    fn node(id: &str, deps: &[&str]) -> DependencyNode {
        let unit = Unit::new(id, "test", Source::new(id, Vec::new(), SourceFormat::Text));
        DependencyNode::new(unit, deps.iter().map(|d| UnitId::from(*d)))
    }

    #[test]
    fn test_dependency_graph_edges() {
        let nodes = vec![
            node("app", &["db", "cache"]),
            node("db", &[]),
            node("cache", &["db"]),
        ];

        let graph = dependency_graph(&nodes);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);

        let order: Vec<&str> = toposort(&graph, None)
            .unwrap()
            .into_iter()
            .map(|idx| graph[idx].as_str())
            .collect();
        let position = |id: &str| order.iter().position(|n| *n == id).unwrap();
        assert!(position("db") < position("cache"));
        assert!(position("cache") < position("app"));
    }

    #[test]
    fn test_missing_dependencies_are_skipped() {
        let graph = dependency_graph(&[node("app", &["ghost"])]);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_cycles_are_still_rendered() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        let graph = dependency_graph(&nodes);
        assert!(toposort(&graph, None).is_err());

        let dot = to_dot(&nodes);
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("\"a\""));
        assert!(dot.contains("->"));
    }
}
