//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Query string for `POST /api/pipelines`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunPipelineQuery {
    /// Start the pipeline in the background and return its initial state
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

/// Request to run one agent outside a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct RunAgentRequest {
    pub subject_id: String,

    pub actor_id: String,

    /// Optional request text appended to the step instruction
    #[serde(default)]
    pub task: Option<String>,

    /// Extra context visible to the agent and its tools
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Model the built-in agents run on
    pub model: String,

    /// Steps with a configured agent
    pub steps: Vec<String>,
}
