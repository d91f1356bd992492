//! Patient context lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::records::RecordStore;
use super::{Tool, ToolOutput};
use crate::agent::AgentContext;

/// Return the patient record for the subject of the current run.
pub struct GetPatientContext {
    records: Arc<dyn RecordStore>,
}

impl GetPatientContext {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for GetPatientContext {
    fn name(&self) -> &str {
        "get_patient_context"
    }

    fn description(&self) -> &str {
        "Get the current patient's record: demographics, active problems, medications and recent history. Call this before writing anything about the patient."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
        let patient = self
            .records
            .get_patient(&ctx.subject_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load patient record: {}", e))?;

        let mut payload = match patient {
            Some(record) => serde_json::to_value(record)?,
            None => json!({
                "id": ctx.subject_id,
                "note": "No record on file for this patient",
            }),
        };

        if let Some(clinical) = ctx.extra.get("clinical_context") {
            payload["clinical_context"] = clinical.clone();
        }

        Ok(ToolOutput::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InMemoryRecordStore, PatientRecord};

    #[tokio::test]
    async fn returns_stored_record() {
        let store = InMemoryRecordStore::new();
        store
            .upsert_patient(PatientRecord {
                id: "p-1".to_string(),
                name: Some("Ada".to_string()),
                summary: json!({"problems": ["hypertension"]}),
            })
            .await;
        let tool = GetPatientContext::new(Arc::new(store));

        let output = tool
            .execute(json!({}), &AgentContext::new("p-1", "dr-1"))
            .await
            .unwrap();
        assert_eq!(output.payload["name"], "Ada");
        assert_eq!(output.payload["summary"]["problems"][0], "hypertension");
    }

    #[tokio::test]
    async fn unknown_patient_gets_stub() {
        let tool = GetPatientContext::new(Arc::new(InMemoryRecordStore::new()));
        let output = tool
            .execute(json!({}), &AgentContext::new("p-9", "dr-1"))
            .await
            .unwrap();
        assert_eq!(output.payload["id"], "p-9");
        assert!(output.payload["note"].is_string());
    }
}
