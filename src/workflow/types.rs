/// Core workflow type definitions
///
/// Defines the graph a task executes: nodes keyed by a stable string, directed
/// edges with optional conditions, and the optional context contract that
/// governs which shared context paths nodes may write. Loaded from JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// A complete workflow definition containing nodes and their connections
///
/// Immutable for the duration of a run. Edge endpoints must reference node keys;
/// cycles are detected by the scheduler rather than prevented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    /// Short stable code (e.g., "video-highlights")
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Declares context variables and writable shared keys
    #[serde(default)]
    pub context_spec: Option<ContextSpec>,
}

impl Workflow {
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.key == key)
    }

    /// Edges whose target is `key`
    pub fn incoming<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.target == key)
    }
}

/// A single vertex in the workflow DAG
///
/// A node without an operator is a structural pass-through that always succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique key within the workflow (e.g., "extract", "detect")
    pub key: String,
    /// Free-form type label used by editors (e.g., "operator", "start")
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub operator_id: Option<Uuid>,
    #[serde(default)]
    pub config: Option<NodeConfig>,
}

impl Node {
    pub fn retry_count(&self) -> u32 {
        self.config.as_ref().map_or(0, |c| c.retry_count)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.config.as_ref().map_or(0, |c| c.timeout_seconds)
    }
}

/// Per-node overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Parameters overriding task-level input params
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Extra attempts after the first failure (0 = single attempt)
    #[serde(default)]
    pub retry_count: u32,
    /// Budget in seconds for all attempts of the node, backoff included; 0 disables it
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Input param name -> dotted path into the task context
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    /// Dotted context path -> dotted selector into the node output
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
}

/// A directed dependency between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Absent means `always`
    #[serde(default)]
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    pub fn condition(&self) -> EdgeCondition {
        self.condition.unwrap_or(EdgeCondition::Always)
    }
}

/// Gate evaluated against the source node's terminal status
///
/// Serialized as `{"type": "on_success"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    OnSuccess,
    OnFailure,
}

/// Context contract declared by a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSpec {
    /// Variables seeded into `vars.*` (defaults, overlaid by task input params)
    #[serde(default)]
    pub vars: HashMap<String, ContextVarSpec>,
    /// Shared paths nodes may write outside their own `nodes.<key>.*` subtree
    #[serde(default)]
    pub shared_keys: HashMap<String, SharedKeySpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextVarSpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedKeySpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    /// "reject" | "overwrite" | "merge" | "append"
    #[serde(default)]
    pub conflict_policy: String,
    /// Writers must go through the versioned patch path
    #[serde(default)]
    pub cas: bool,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_condition_defaults_to_always() {
        let edge: Edge = serde_json::from_value(json!({"source": "a", "target": "b"})).unwrap();
        assert_eq!(edge.condition(), EdgeCondition::Always);

        let edge: Edge = serde_json::from_value(json!({
            "source": "a", "target": "b", "condition": {"type": "on_failure"}
        }))
        .unwrap();
        assert_eq!(edge.condition(), EdgeCondition::OnFailure);
    }

    #[test]
    fn node_config_accessors_fall_back_to_zero() {
        let node: Node = serde_json::from_value(json!({"key": "n1"})).unwrap();
        assert_eq!(node.retry_count(), 0);
        assert_eq!(node.timeout_seconds(), 0);
        assert!(node.operator_id.is_none());
    }
}
