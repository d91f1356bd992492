//! Pipeline steps, run configuration and per-run state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::agent::AgentResult;

/// One stage of the clinical pipeline. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    ClinicalDocumentation,
    MedicalTranslator,
    PredictiveAnalytics,
    ResearchSynthesis,
    WorkflowAutomation,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 5] = [
        Self::ClinicalDocumentation,
        Self::MedicalTranslator,
        Self::PredictiveAnalytics,
        Self::ResearchSynthesis,
        Self::WorkflowAutomation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClinicalDocumentation => "clinical-documentation",
            Self::MedicalTranslator => "medical-translator",
            Self::PredictiveAnalytics => "predictive-analytics",
            Self::ResearchSynthesis => "research-synthesis",
            Self::WorkflowAutomation => "workflow-automation",
        }
    }

    /// The user turn that starts this step's agent run.
    pub fn instruction(&self, subject_id: &str, task: Option<&str>) -> String {
        let base = match self {
            Self::ClinicalDocumentation => format!(
                "Review the record for patient {subject_id} and write a structured clinical note. Save it with save_clinical_note."
            ),
            Self::MedicalTranslator => format!(
                "Translate the latest clinical note for patient {subject_id} into plain, patient-friendly language. Save it with save_translation."
            ),
            Self::PredictiveAnalytics => format!(
                "Assess clinical risk for patient {subject_id} using their record and latest note. Save the assessment with save_risk_assessment."
            ),
            Self::ResearchSynthesis => format!(
                "Summarise current evidence relevant to the risk assessment for patient {subject_id}. Save it with save_research_summary."
            ),
            Self::WorkflowAutomation => format!(
                "Create the follow-up care-team tasks for patient {subject_id} based on the assessment and research. Avoid duplicating open tasks."
            ),
        };
        match task.map(str::trim).filter(|t| !t.is_empty()) {
            Some(task) => format!("{base}\n\nRequest from the care team:\n{task}"),
            None => base,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Unknown pipeline step: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
    /// Reserved; no transition enters it.
    Paused,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Caller input for a pipeline or single-agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub subject_id: String,
    pub actor_id: String,
    #[serde(default)]
    pub task: Option<String>,
    /// Restrict the run to these step names. Order given here is ignored.
    #[serde(default)]
    pub steps: Option<Vec<String>>,
    /// Extra context handed to every agent's tools.
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Well-known artifact slots carried between steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_summary_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflow_task_ids: Vec<String>,
}

impl PipelineArtifacts {
    /// Apply one step's artifacts. Unknown keys are ignored; string slots
    /// overwrite, `workflow_task_ids` appends.
    pub fn merge(&mut self, artifacts: &Map<String, Value>) {
        for (key, value) in artifacts {
            match key.as_str() {
                "note_id" => set_id(&mut self.note_id, value),
                "translation_id" => set_id(&mut self.translation_id, value),
                "risk_assessment_id" => set_id(&mut self.risk_assessment_id, value),
                "research_summary_id" => set_id(&mut self.research_summary_id, value),
                "workflow_task_ids" => match value {
                    Value::Array(ids) => self
                        .workflow_task_ids
                        .extend(ids.iter().filter_map(Value::as_str).map(str::to_string)),
                    Value::String(id) => self.workflow_task_ids.push(id.clone()),
                    _ => {}
                },
                other => tracing::debug!(key = other, "Artifact has no pipeline slot"),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "note_id" => self.note_id.as_ref().map(|v| json!(v)),
            "translation_id" => self.translation_id.as_ref().map(|v| json!(v)),
            "risk_assessment_id" => self.risk_assessment_id.as_ref().map(|v| json!(v)),
            "research_summary_id" => self.research_summary_id.as_ref().map(|v| json!(v)),
            "workflow_task_ids" if !self.workflow_task_ids.is_empty() => {
                Some(json!(self.workflow_task_ids))
            }
            _ => None,
        }
    }

    /// Populated slots only.
    pub fn to_map(&self) -> Map<String, Value> {
        const KEYS: [&str; 5] = [
            "note_id",
            "translation_id",
            "risk_assessment_id",
            "research_summary_id",
            "workflow_task_ids",
        ];
        KEYS.iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}

fn set_id(slot: &mut Option<String>, value: &Value) {
    if let Some(id) = value.as_str() {
        *slot = Some(id.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: PipelineStep,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// The orchestrator's record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub id: Uuid,
    pub subject_id: String,
    pub actor_id: String,
    pub task: Option<String>,
    pub steps: Vec<PipelineStep>,
    pub step_results: BTreeMap<PipelineStep, AgentResult>,
    pub artifacts: PipelineArtifacts,
    pub errors: Vec<StepFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: Option<PipelineStep>,
    pub status: PipelineStatus,
}

impl PipelineState {
    /// A fresh `running` state. `steps` must already be validated and ordered.
    pub fn new(config: &PipelineConfig, steps: Vec<PipelineStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: config.subject_id.clone(),
            actor_id: config.actor_id.clone(),
            task: config.task.clone(),
            current_step: steps.first().copied(),
            steps,
            step_results: BTreeMap::new(),
            artifacts: PipelineArtifacts::default(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            status: PipelineStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a successful step, publish its artifacts and advance.
    pub fn record_success(&mut self, step: PipelineStep, result: AgentResult) {
        self.artifacts.merge(&result.artifacts);
        self.step_results.insert(step, result);
        self.current_step = self
            .steps
            .iter()
            .copied()
            .skip_while(|s| *s != step)
            .nth(1);
    }

    /// Record a failed step and stop the pipeline.
    pub fn record_failure(&mut self, step: PipelineStep, result: AgentResult) {
        let now = Utc::now();
        self.errors.push(StepFailure {
            step,
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "Agent execution failed".to_string()),
            timestamp: now,
        });
        self.step_results.insert(step, result);
        self.current_step = Some(step);
        self.status = PipelineStatus::Failed;
        self.completed_at = Some(now);
    }

    /// Fail a run that ended without a step result. No-op once terminal.
    pub fn abort(&mut self, error: &str) {
        if self.is_terminal() {
            return;
        }
        let now = Utc::now();
        if let Some(step) = self.current_step.or_else(|| self.steps.first().copied()) {
            self.errors.push(StepFailure {
                step,
                error: error.to_string(),
                timestamp: now,
            });
        }
        self.status = PipelineStatus::Failed;
        self.completed_at = Some(now);
    }

    pub fn complete(&mut self) {
        self.current_step = None;
        self.status = PipelineStatus::Completed;
        self.completed_at = Some(Utc::now());
    }
}
