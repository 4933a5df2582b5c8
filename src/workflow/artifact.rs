/// Artifacts: typed, persisted outputs of a node execution
///
/// One artifact per non-empty output category, never mutated after creation.

use crate::operator::{AnalysisResult, OperatorOutput, OutputAsset, TimelineEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Asset,
    Result,
    Timeline,
    Report,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Result => "result",
            Self::Timeline => "timeline",
            Self::Report => "report",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<OutputAsset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub diagnostics: Map<String, Value>,
    /// Always carries `node_key`
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub task_id: Uuid,
    pub kind: ArtifactType,
    pub data: ArtifactData,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    fn new(task_id: Uuid, kind: ArtifactType, node_key: &str, mut data: ArtifactData) -> Self {
        data.metadata.insert("node_key".to_string(), json!(node_key));
        Self {
            id: Uuid::new_v4(),
            task_id,
            kind,
            data,
            created_at: Utc::now(),
        }
    }

    /// Fan a node output out into one artifact per non-empty category
    pub fn from_output(task_id: Uuid, node_key: &str, output: &OperatorOutput) -> Vec<Artifact> {
        let mut artifacts = Vec::new();

        if !output.output_assets.is_empty() {
            let data = ArtifactData {
                assets: output.output_assets.clone(),
                ..Default::default()
            };
            artifacts.push(Self::new(task_id, ArtifactType::Asset, node_key, data));
        }
        if !output.results.is_empty() {
            let data = ArtifactData {
                results: output.results.clone(),
                ..Default::default()
            };
            artifacts.push(Self::new(task_id, ArtifactType::Result, node_key, data));
        }
        if !output.timeline.is_empty() {
            let data = ArtifactData {
                timeline: output.timeline.clone(),
                ..Default::default()
            };
            artifacts.push(Self::new(task_id, ArtifactType::Timeline, node_key, data));
        }
        if !output.diagnostics.is_empty() {
            let data = ArtifactData {
                diagnostics: output.diagnostics.clone(),
                ..Default::default()
            };
            artifacts.push(Self::new(task_id, ArtifactType::Report, node_key, data));
        }

        artifacts
    }

    pub fn node_key(&self) -> Option<&str> {
        self.data.metadata.get("node_key").and_then(Value::as_str)
    }
}
