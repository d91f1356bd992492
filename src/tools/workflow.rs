//! Care-team workflow tasks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use super::records::{NewWorkflowTask, RecordStore, TaskPriority};
use super::{Tool, ToolOutput};
use crate::agent::AgentContext;

/// Create a follow-up task for the care team.
pub struct CreateWorkflowTask {
    records: Arc<dyn RecordStore>,
}

impl CreateWorkflowTask {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for CreateWorkflowTask {
    fn name(&self) -> &str {
        "create_workflow_task"
    }

    fn description(&self) -> &str {
        "Create a follow-up task for the care team (referral, lab order, callback, education). One call per task."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Short actionable title"},
                "description": {"type": "string"},
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"],
                    "description": "Default: normal"
                },
                "due_in_days": {"type": "integer", "description": "Days from now until the task is due"}
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
        let title = args["title"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'title' argument"))?;
        let priority = match args["priority"].as_str() {
            Some(raw) => TaskPriority::parse(raw)
                .ok_or_else(|| anyhow::anyhow!("Unknown priority '{}'", raw))?,
            None => TaskPriority::Normal,
        };
        let due_at = match args["due_in_days"].as_i64() {
            Some(days) if days < 0 => {
                return Err(anyhow::anyhow!("due_in_days must not be negative"));
            }
            Some(days) => Some(Utc::now() + Duration::days(days)),
            None => None,
        };

        let task = self
            .records
            .create_task(NewWorkflowTask {
                patient_id: ctx.subject_id.clone(),
                created_by: ctx.actor_id.clone(),
                title: title.to_string(),
                description: args["description"].as_str().map(str::to_string),
                priority,
                due_at,
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create task: {}", e))?;

        Ok(ToolOutput::new(json!({
            "task_id": task.id.clone(),
            "status": "created",
            "priority": task.priority,
        }))
        .with_artifact("workflow_task_ids", json!([task.id])))
    }
}

/// List existing tasks so the agent does not create duplicates.
pub struct ListWorkflowTasks {
    records: Arc<dyn RecordStore>,
}

impl ListWorkflowTasks {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for ListWorkflowTasks {
    fn name(&self) -> &str {
        "list_workflow_tasks"
    }

    fn description(&self) -> &str {
        "List the care-team tasks already open for the current patient."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
        let tasks = self
            .records
            .list_tasks(&ctx.subject_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list tasks: {}", e))?;
        Ok(ToolOutput::new(json!({
            "count": tasks.len(),
            "tasks": tasks,
        })))
    }
}
