/// Operator Layer
///
/// An operator is an abstract unit of work; its active version says how to run it
/// (execution mode plus backend configuration) and what structured input/output
/// it exchanges with the engine.

// Operator, version, execution config and I/O value types
pub mod types;

pub use types::{
    AiModelExecConfig, AnalysisResult, CliExecConfig, ExecConfig, ExecMode, HttpExecConfig,
    McpExecConfig, Operator, OperatorInput, OperatorOutput, OperatorVersion, OutputAsset,
    TimelineEvent, VersionStatus,
};
