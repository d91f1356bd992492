//! Record store used by the clinical tools.
//!
//! The real system persists clinical records elsewhere; tools only see this
//! trait. The in-memory store is non-persistent and backs the default binary
//! and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Patient data exposed to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form clinical summary (demographics, problems, medications, ...).
    #[serde(default)]
    pub summary: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    ClinicalNote,
    Translation,
    RiskAssessment,
    ResearchSummary,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub patient_id: String,
    pub author_id: String,
    /// Document this one was derived from (e.g. the note a translation renders).
    pub source_id: Option<String>,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub kind: DocumentKind,
    pub patient_id: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewWorkflowTask {
    pub patient_id: String,
    pub created_by: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub patient_id: String,
    pub created_by: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, String>;

    async fn save_document(&self, document: NewDocument) -> Result<StoredDocument, String>;

    async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>, String>;

    async fn create_task(&self, task: NewWorkflowTask) -> Result<WorkflowTask, String>;

    async fn list_tasks(&self, patient_id: &str) -> Result<Vec<WorkflowTask>, String>;
}

#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    patients: Arc<RwLock<HashMap<String, PatientRecord>>>,
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
    tasks: Arc<RwLock<Vec<WorkflowTask>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_patient(&self, patient: PatientRecord) {
        self.patients
            .write()
            .await
            .insert(patient.id.clone(), patient);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, String> {
        Ok(self.patients.read().await.get(patient_id).cloned())
    }

    async fn save_document(&self, document: NewDocument) -> Result<StoredDocument, String> {
        let stored = StoredDocument {
            id: Uuid::new_v4().to_string(),
            kind: document.kind,
            patient_id: document.patient_id,
            author_id: document.author_id,
            source_id: document.source_id,
            content: document.content,
            created_at: Utc::now(),
        };
        self.documents
            .write()
            .await
            .insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>, String> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn create_task(&self, task: NewWorkflowTask) -> Result<WorkflowTask, String> {
        if task.title.trim().is_empty() {
            return Err("Task title must not be empty".to_string());
        }
        let created = WorkflowTask {
            id: Uuid::new_v4().to_string(),
            patient_id: task.patient_id,
            created_by: task.created_by,
            title: task.title,
            description: task.description,
            priority: task.priority,
            due_at: task.due_at,
            created_at: Utc::now(),
        };
        self.tasks.write().await.push(created.clone());
        Ok(created)
    }

    async fn list_tasks(&self, patient_id: &str) -> Result<Vec<WorkflowTask>, String> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.patient_id == patient_id)
            .cloned()
            .collect())
    }
}
