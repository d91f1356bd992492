//! Tool contract and registry.
//!
//! A tool is a named capability with a JSON input schema and an async handler.
//! Handlers return a [`ToolOutput`]: the payload the model sees, plus artifacts
//! that only the orchestrator sees.

mod documents;
mod patient;
mod records;
mod workflow;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agent::AgentContext;
use crate::llm::ToolSpec;

pub use documents::{GetDocument, SaveDocument};
pub use patient::GetPatientContext;
pub use records::{
    DocumentKind, InMemoryRecordStore, NewDocument, NewWorkflowTask, PatientRecord, RecordStore,
    StoredDocument, TaskPriority, WorkflowTask,
};
pub use workflow::{CreateWorkflowTask, ListWorkflowTasks};

/// Reserved key a raw JSON handler result may use to carry artifacts.
pub const ARTIFACTS_KEY: &str = "_artifacts";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Invalid input schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Result of a successful tool execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Relayed back to the model.
    pub payload: Value,
    /// Side channel to the orchestrator; never shown to the model.
    pub artifacts: Map<String, Value>,
}

impl ToolOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            artifacts: Map::new(),
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Split a raw handler result, lifting a top-level `_artifacts` object out
    /// of the payload.
    pub fn from_value(mut value: Value) -> Self {
        let artifacts = match value.as_object_mut().and_then(|obj| obj.remove(ARTIFACTS_KEY)) {
            Some(Value::Object(artifacts)) => artifacts,
            Some(other) => {
                tracing::warn!("Ignoring non-object {} value: {}", ARTIFACTS_KEY, other);
                Map::new()
            }
            None => Map::new(),
        };
        Self {
            payload: value,
            artifacts,
        }
    }
}

impl ToolOutput {
    /// Model-visible payload and artifacts, with any `_artifacts` still left
    /// in the payload lifted out. Explicit artifacts win over lifted ones.
    pub fn into_parts(self) -> (Value, Map<String, Value>) {
        let lifted = Self::from_value(self.payload);
        let mut artifacts = lifted.artifacts;
        artifacts.extend(self.artifacts);
        (lifted.payload, artifacts)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// A capability an agent can ask the model to invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Sent to the model to guide tool selection.
    fn description(&self) -> &str;

    /// JSON schema of the input object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput>;
}

/// Summary used for listings and prompts.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Name-keyed set of tools owned by one agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    // Registration order, which is also the order tools are declared to the model.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, validating every tool.
    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        validate_schema(&name, &tool.parameters_schema())?;
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.ordered()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    /// Declarations sent with every model request.
    pub fn get_tool_schemas(&self) -> Vec<ToolSpec> {
        self.ordered()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}

fn validate_schema(tool: &str, schema: &Value) -> Result<(), ToolError> {
    let invalid = |reason: &str| ToolError::InvalidSchema {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };

    let obj = schema
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object"))?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("top-level type must be \"object\""));
    }
    if let Some(required) = obj.get("required") {
        let props = obj.get("properties").and_then(Value::as_object);
        let required = required
            .as_array()
            .ok_or_else(|| invalid("\"required\" must be an array"))?;
        for field in required {
            let field = field
                .as_str()
                .ok_or_else(|| invalid("\"required\" entries must be strings"))?;
            if !props.is_some_and(|p| p.contains_key(field)) {
                return Err(invalid(&format!("required field '{}' is not declared", field)));
            }
        }
    }
    Ok(())
}
