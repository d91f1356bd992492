//! Save/fetch tools for the documents each agent produces.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::records::{DocumentKind, NewDocument, RecordStore};
use super::{Tool, ToolOutput};
use crate::agent::AgentContext;

impl DocumentKind {
    /// Artifact key under which a saved document's id is published.
    pub fn artifact_key(&self) -> &'static str {
        match self {
            Self::ClinicalNote => "note_id",
            Self::Translation => "translation_id",
            Self::RiskAssessment => "risk_assessment_id",
            Self::ResearchSummary => "research_summary_id",
        }
    }

    /// The upstream document this kind is usually derived from.
    fn source_kind(&self) -> Option<DocumentKind> {
        match self {
            Self::ClinicalNote => None,
            Self::Translation | Self::RiskAssessment => Some(Self::ClinicalNote),
            Self::ResearchSummary => Some(Self::RiskAssessment),
        }
    }

    fn save_tool_name(&self) -> &'static str {
        match self {
            Self::ClinicalNote => "save_clinical_note",
            Self::Translation => "save_translation",
            Self::RiskAssessment => "save_risk_assessment",
            Self::ResearchSummary => "save_research_summary",
        }
    }

    fn get_tool_name(&self) -> &'static str {
        match self {
            Self::ClinicalNote => "get_clinical_note",
            Self::Translation => "get_translation",
            Self::RiskAssessment => "get_risk_assessment",
            Self::ResearchSummary => "get_research_summary",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::ClinicalNote => "clinical note",
            Self::Translation => "patient-friendly translation",
            Self::RiskAssessment => "risk assessment",
            Self::ResearchSummary => "research summary",
        }
    }

    fn content_schema(&self) -> Value {
        match self {
            Self::ClinicalNote => json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short title for the note"},
                    "note_type": {
                        "type": "string",
                        "enum": ["soap", "progress", "discharge", "consult"],
                        "description": "Note format (default: soap)"
                    },
                    "content": {"type": "string", "description": "Full note body"}
                },
                "required": ["title", "content"]
            }),
            Self::Translation => json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string", "description": "Target language, e.g. 'es' or 'English'"},
                    "reading_level": {"type": "string", "description": "Target reading level, e.g. 'grade 6'"},
                    "content": {"type": "string", "description": "Translated, plain-language text"},
                    "note_id": {"type": "string", "description": "Source note id. Defaults to the note produced earlier in the pipeline."}
                },
                "required": ["language", "content"]
            }),
            Self::RiskAssessment => json!({
                "type": "object",
                "properties": {
                    "risk_level": {"type": "string", "enum": ["low", "moderate", "high", "critical"]},
                    "risk_score": {"type": "number", "description": "Probability between 0 and 1"},
                    "factors": {"type": "array", "items": {"type": "string"}, "description": "Contributing risk factors"},
                    "recommendations": {"type": "array", "items": {"type": "string"}},
                    "note_id": {"type": "string", "description": "Source note id. Defaults to the note produced earlier in the pipeline."}
                },
                "required": ["risk_level", "factors"]
            }),
            Self::ResearchSummary => json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string"},
                    "summary": {"type": "string", "description": "Synthesis of the relevant evidence"},
                    "citations": {"type": "array", "items": {"type": "string"}},
                    "risk_assessment_id": {"type": "string", "description": "Assessment this research supports. Defaults to the one produced earlier in the pipeline."}
                },
                "required": ["topic", "summary"]
            }),
        }
    }
}

/// Persist a document and publish its id as an artifact.
pub struct SaveDocument {
    kind: DocumentKind,
    description: String,
    records: Arc<dyn RecordStore>,
}

impl SaveDocument {
    pub fn new(kind: DocumentKind, records: Arc<dyn RecordStore>) -> Self {
        Self {
            kind,
            description: format!("Save the {} for the current patient and return its id.", kind.label()),
            records,
        }
    }
}

#[async_trait]
impl Tool for SaveDocument {
    fn name(&self) -> &str {
        self.kind.save_tool_name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.kind.content_schema()
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
        let schema = self.kind.content_schema();
        for field in schema["required"].as_array().into_iter().flatten() {
            let field = field.as_str().unwrap_or_default();
            if args.get(field).map_or(true, Value::is_null) {
                return Err(anyhow::anyhow!("Missing '{}' argument", field));
            }
        }
        if let Some(score) = args.get("risk_score").and_then(Value::as_f64) {
            if !(0.0..=1.0).contains(&score) {
                return Err(anyhow::anyhow!("risk_score must be between 0 and 1, got {}", score));
            }
        }

        let source_id = self.kind.source_kind().and_then(|source| {
            let key = source.artifact_key();
            args[key]
                .as_str()
                .map(str::to_string)
                .or_else(|| ctx.artifact_str(key))
        });

        let stored = self
            .records
            .save_document(NewDocument {
                kind: self.kind,
                patient_id: ctx.subject_id.clone(),
                author_id: ctx.actor_id.clone(),
                source_id,
                content: args,
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save {}: {}", self.kind.label(), e))?;

        tracing::info!(
            document_id = %stored.id,
            kind = ?stored.kind,
            patient_id = %stored.patient_id,
            "Saved document"
        );

        let key = self.kind.artifact_key();
        let mut payload = json!({
            "status": "saved",
            "source_id": stored.source_id,
        });
        payload[key] = json!(stored.id);
        Ok(ToolOutput::new(payload).with_artifact(key, json!(stored.id)))
    }
}

/// Fetch a previously saved document, defaulting to the pipeline's artifact.
pub struct GetDocument {
    kind: DocumentKind,
    description: String,
    records: Arc<dyn RecordStore>,
}

impl GetDocument {
    pub fn new(kind: DocumentKind, records: Arc<dyn RecordStore>) -> Self {
        Self {
            kind,
            description: format!(
                "Fetch a {} by id. Without an id, returns the one produced earlier in this pipeline.",
                kind.label()
            ),
            records,
        }
    }
}

#[async_trait]
impl Tool for GetDocument {
    fn name(&self) -> &str {
        self.kind.get_tool_name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Document id (optional)"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
        let key = self.kind.artifact_key();
        let id = args["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| ctx.artifact_str(key))
            .ok_or_else(|| {
                anyhow::anyhow!("No {} id given and none available from earlier steps", self.kind.label())
            })?;

        let document = self
            .records
            .get_document(&id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", self.kind.label(), e))?
            .ok_or_else(|| anyhow::anyhow!("{} {} not found", self.kind.label(), id))?;

        if document.kind != self.kind {
            return Err(anyhow::anyhow!("Document {} is not a {}", id, self.kind.label()));
        }
        if document.patient_id != ctx.subject_id {
            return Err(anyhow::anyhow!("Document {} belongs to a different patient", id));
        }

        Ok(ToolOutput::new(serde_json::to_value(&document)?))
    }
}
