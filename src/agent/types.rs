//! Agent configuration, per-run context, and run results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::PipelineState;
use crate::tools::ToolRegistry;

/// Static configuration of one agent. Shared read-only across runs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Display name, also used as `AgentResult::agent_name`
    pub name: String,

    pub description: String,

    /// Target model identifier
    pub model: String,

    pub system_prompt: String,

    pub tools: ToolRegistry,

    /// Upper bound on model round-trips per run
    pub max_iterations: usize,

    pub temperature: f32,

    /// Output token cap per model call
    pub max_tokens: u32,
}

/// Per-run inputs handed to tool handlers.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// Subject of the work (the patient id).
    pub subject_id: String,

    /// Who requested the work (the clinician / user id).
    pub actor_id: String,

    /// Snapshot of the enclosing pipeline, if the run is part of one.
    pub pipeline: Option<Arc<PipelineState>>,

    /// Caller-supplied extra context.
    pub extra: Map<String, Value>,
}

impl AgentContext {
    pub fn new(subject_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            actor_id: actor_id.into(),
            pipeline: None,
            extra: Map::new(),
        }
    }

    pub fn with_pipeline(mut self, state: Arc<PipelineState>) -> Self {
        self.pipeline = Some(state);
        self
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Look up an artifact, preferring explicit extra context over the
    /// pipeline's well-known slots.
    pub fn artifact(&self, key: &str) -> Option<Value> {
        self.extra
            .get(key)
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| self.pipeline.as_ref().and_then(|p| p.artifacts.get(key)))
    }

    pub fn artifact_str(&self, key: &str) -> Option<String> {
        self.artifact(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

/// Audit record for one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    /// Call id issued by the model
    pub call_id: String,
    pub input: Value,
    pub output: Option<Value>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one agent run. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub success: bool,
    /// Final text of the model's last reply
    pub output: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Artifacts collected from tool outputs, keyed by artifact name
    pub artifacts: Map<String, Value>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
