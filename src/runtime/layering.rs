/// Execution planning over the workflow DAG
///
/// Builds a petgraph `DiGraph` from the workflow and groups nodes into layers
/// with Kahn's algorithm: each layer is every node whose remaining in-degree is
/// zero. Nodes in one layer have no path between them and run concurrently;
/// layers run strictly in order.

use crate::error::EngineError;
use crate::workflow::Workflow;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Layered plan; nodes within a layer keep declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub layers: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn build(workflow: &Workflow) -> Result<Self, EngineError> {
        let graph = build_graph(workflow)?;
        let layers = layer(&graph)?;
        tracing::debug!("📋 Execution plan for '{}': {:?}", workflow.code, layers);
        Ok(Self { layers })
    }

    pub fn total_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn node_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Layer index of each node key
    pub fn layer_of(&self) -> HashMap<&str, usize> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.iter().map(move |key| (key.as_str(), i)))
            .collect()
    }
}

/// Flat topological order, for callers that only need a valid sequence
pub fn topological_order(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    let graph = build_graph(workflow)?;
    let order = toposort(&graph, None).map_err(|_| EngineError::Cycle)?;
    Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
}

fn build_graph(workflow: &Workflow) -> Result<DiGraph<String, ()>, EngineError> {
    let mut graph = DiGraph::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();

    for node in &workflow.nodes {
        if index_of.contains_key(node.key.as_str()) {
            return Err(EngineError::DuplicateNode(node.key.clone()));
        }
        let idx = graph.add_node(node.key.clone());
        index_of.insert(node.key.as_str(), idx);
    }

    for edge in &workflow.edges {
        let from = index_of
            .get(edge.source.as_str())
            .ok_or_else(|| EngineError::UnknownNode(edge.source.clone()))?;
        let to = index_of
            .get(edge.target.as_str())
            .ok_or_else(|| EngineError::UnknownNode(edge.target.clone()))?;
        graph.add_edge(*from, *to, ());
    }

    Ok(graph)
}

fn layer(graph: &DiGraph<String, ()>) -> Result<Vec<Vec<String>>, EngineError> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.edges_directed(idx, Direction::Incoming).count())
        .collect();
    let mut placed = vec![false; graph.node_count()];
    let mut remaining = graph.node_count();
    let mut layers = Vec::new();

    while remaining > 0 {
        let ready: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|idx| !placed[idx.index()] && in_degree[idx.index()] == 0)
            .collect();

        if ready.is_empty() {
            tracing::error!("❌ Workflow contains cycles - must be a DAG");
            return Err(EngineError::Cycle);
        }

        for idx in &ready {
            placed[idx.index()] = true;
            remaining -= 1;
            for edge in graph.edges_directed(*idx, Direction::Outgoing) {
                let target = edge.target().index();
                in_degree[target] = in_degree[target].saturating_sub(1);
            }
        }

        layers.push(ready.into_iter().map(|idx| graph[idx].clone()).collect());
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Edge, Node};
    use uuid::Uuid;

    fn workflow(keys: &[&str], edges: &[(&str, &str)]) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            tenant_id: None,
            code: "test".into(),
            name: "test".into(),
            nodes: keys
                .iter()
                .map(|k| Node {
                    key: k.to_string(),
                    node_type: String::new(),
                    operator_id: None,
                    config: None,
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(s, t)| Edge {
                    source: s.to_string(),
                    target: t.to_string(),
                    condition: None,
                })
                .collect(),
            context_spec: None,
        }
    }

    #[test]
    fn diamond_yields_three_layers() {
        let wf = workflow(&["A", "B", "C", "D"], &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        let plan = ExecutionPlan::build(&wf).unwrap();
        assert_eq!(plan.layers, vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn fan_out_fan_in_has_wide_middle() {
        let wf = workflow(
            &["src", "w1", "w2", "w3", "w4", "sink"],
            &[
                ("src", "w1"),
                ("src", "w2"),
                ("src", "w3"),
                ("src", "w4"),
                ("w1", "sink"),
                ("w2", "sink"),
                ("w3", "sink"),
                ("w4", "sink"),
            ],
        );
        let plan = ExecutionPlan::build(&wf).unwrap();
        assert_eq!(plan.total_layers(), 3);
        assert_eq!(plan.layers[1].len(), 4);
    }

    #[test]
    fn every_edge_points_to_a_later_layer() {
        let edges = [("a", "c"), ("b", "c"), ("c", "e"), ("d", "e"), ("a", "e"), ("b", "d")];
        let wf = workflow(&["e", "d", "c", "b", "a"], &edges);
        let plan = ExecutionPlan::build(&wf).unwrap();

        assert_eq!(plan.node_count(), 5);
        let layer_of = plan.layer_of();
        assert_eq!(layer_of.len(), 5);
        for (s, t) in edges {
            assert!(layer_of[s] < layer_of[t], "{} -> {}", s, t);
        }
    }

    #[test]
    fn independent_nodes_share_the_first_layer() {
        let wf = workflow(&["x", "y", "z"], &[]);
        let plan = ExecutionPlan::build(&wf).unwrap();
        assert_eq!(plan.layers, vec![vec!["x", "y", "z"]]);
    }

    #[test]
    fn cycle_is_rejected() {
        let wf = workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]);
        let err = ExecutionPlan::build(&wf).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(topological_order(&wf).unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let wf = workflow(&["a"], &[("a", "a")]);
        assert!(matches!(ExecutionPlan::build(&wf), Err(EngineError::Cycle)));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let wf = workflow(&["a"], &[("a", "ghost")]);
        assert!(matches!(ExecutionPlan::build(&wf), Err(EngineError::UnknownNode(k)) if k == "ghost"));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let wf = workflow(&["a", "a"], &[]);
        assert!(matches!(ExecutionPlan::build(&wf), Err(EngineError::DuplicateNode(_))));
    }

    #[test]
    fn topological_order_respects_edges() {
        let wf = workflow(&["c", "b", "a"], &[("a", "b"), ("b", "c")]);
        assert_eq!(topological_order(&wf).unwrap(), vec!["a", "b", "c"]);
    }
}
