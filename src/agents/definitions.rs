//! The five built-in clinical agents.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::AgentConfig;
use crate::config::Config;
use crate::pipeline::PipelineStep;
use crate::tools::{
    CreateWorkflowTask, DocumentKind, GetDocument, GetPatientContext, ListWorkflowTasks,
    RecordStore, SaveDocument, Tool, ToolError, ToolRegistry,
};

const CLINICAL_DOCUMENTATION_PROMPT: &str = r#"You are a clinical documentation assistant working alongside a physician.

Write accurate, concise clinical notes from the patient's record and the care team's request.
1. Call get_patient_context first. Never invent findings that are not in the record or the request.
2. Use SOAP structure unless asked otherwise.
3. Save the finished note with save_clinical_note exactly once.
4. Reply with a two-sentence summary of what you documented."#;

const MEDICAL_TRANSLATOR_PROMPT: &str = r#"You turn clinical notes into language patients understand.

1. Fetch the note with get_clinical_note.
2. Rewrite it at roughly a grade-6 reading level. Explain medical terms, keep dosages and dates exact.
3. If the context names a preferred language, translate into it; otherwise use English.
4. Save the result with save_translation and reply with a short confirmation."#;

const PREDICTIVE_ANALYTICS_PROMPT: &str = r#"You assess near-term clinical risk for a single patient.

1. Review get_patient_context and get_clinical_note.
2. Identify concrete risk factors and rate the overall risk as low, moderate, high or critical.
3. Give a risk_score between 0 and 1 only when the evidence supports one.
4. Save the assessment with save_risk_assessment, listing factors and recommendations.
State uncertainty plainly. Do not diagnose."#;

const RESEARCH_SYNTHESIS_PROMPT: &str = r#"You summarise clinical evidence that bears on a patient's risk assessment.

1. Fetch the assessment with get_risk_assessment.
2. Summarise guideline and trial evidence relevant to its main risk factors, with citations you are confident exist.
3. Save the summary with save_research_summary and reply with its key takeaway."#;

const WORKFLOW_AUTOMATION_PROMPT: &str = r#"You turn clinical findings into concrete care-team tasks.

1. Call list_workflow_tasks to see what is already open.
2. Read the risk assessment and research summary.
3. Create one task per follow-up action with create_workflow_task, choosing a priority and a due date.
4. Do not duplicate open tasks. Reply with the list of tasks you created."#;

/// Build every built-in agent over the given record store.
pub fn builtin_agents(
    config: &Config,
    records: Arc<dyn RecordStore>,
) -> Result<BTreeMap<PipelineStep, AgentConfig>, ToolError> {
    PipelineStep::ALL
        .into_iter()
        .map(|step| Ok((step, agent_for(step, config, Arc::clone(&records))?)))
        .collect()
}

/// Build the agent for one step.
pub fn agent_for(
    step: PipelineStep,
    config: &Config,
    records: Arc<dyn RecordStore>,
) -> Result<AgentConfig, ToolError> {
    let patient: Arc<dyn Tool> = Arc::new(GetPatientContext::new(records.clone()));
    let save = |kind: DocumentKind| -> Arc<dyn Tool> { Arc::new(SaveDocument::new(kind, records.clone())) };
    let get = |kind: DocumentKind| -> Arc<dyn Tool> { Arc::new(GetDocument::new(kind, records.clone())) };

    let (description, prompt, temperature, tools) = match step {
        PipelineStep::ClinicalDocumentation => (
            "Drafts structured clinical notes",
            CLINICAL_DOCUMENTATION_PROMPT,
            0.2,
            vec![patient, save(DocumentKind::ClinicalNote)],
        ),
        PipelineStep::MedicalTranslator => (
            "Rewrites notes in patient-friendly language",
            MEDICAL_TRANSLATOR_PROMPT,
            0.3,
            vec![
                patient,
                get(DocumentKind::ClinicalNote),
                save(DocumentKind::Translation),
            ],
        ),
        PipelineStep::PredictiveAnalytics => (
            "Assesses near-term clinical risk",
            PREDICTIVE_ANALYTICS_PROMPT,
            0.1,
            vec![
                patient,
                get(DocumentKind::ClinicalNote),
                save(DocumentKind::RiskAssessment),
            ],
        ),
        PipelineStep::ResearchSynthesis => (
            "Summarises supporting clinical evidence",
            RESEARCH_SYNTHESIS_PROMPT,
            0.3,
            vec![
                get(DocumentKind::RiskAssessment),
                save(DocumentKind::ResearchSummary),
            ],
        ),
        PipelineStep::WorkflowAutomation => (
            "Creates follow-up tasks for the care team",
            WORKFLOW_AUTOMATION_PROMPT,
            0.1,
            vec![
                Arc::new(ListWorkflowTasks::new(records.clone())) as Arc<dyn Tool>,
                get(DocumentKind::RiskAssessment),
                get(DocumentKind::ResearchSummary),
                Arc::new(CreateWorkflowTask::new(records.clone())) as Arc<dyn Tool>,
            ],
        ),
    };

    Ok(AgentConfig {
        name: step.as_str().to_string(),
        description: description.to_string(),
        model: config.default_model.clone(),
        system_prompt: prompt.to_string(),
        tools: ToolRegistry::from_tools(tools)?,
        max_iterations: config.max_iterations,
        temperature,
        max_tokens: config.max_output_tokens,
    })
}
