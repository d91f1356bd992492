//! Sequences agent runs into a fail-fast pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::store::{PipelineLease, PipelineStore, StoreError};
use super::types::{PipelineConfig, PipelineState, PipelineStep};
use crate::agent::{AgentConfig, AgentContext, AgentResult, AgentRuntime};
use crate::llm::LlmClient;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown pipeline step: {0}")]
    UnknownStep(String),

    #[error("No agent configured for step {0}")]
    AgentNotConfigured(PipelineStep),

    #[error("A pipeline needs at least one step")]
    NoSteps,

    #[error("Pipeline run was aborted")]
    Aborted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error recorded when a run dies without reporting a step result.
const ABORTED_STEP_ERROR: &str = "Agent execution failed";

#[derive(Clone)]
pub struct Orchestrator {
    agents: Arc<BTreeMap<PipelineStep, AgentRuntime>>,
    store: PipelineStore,
}

impl Orchestrator {
    pub fn new(
        agents: BTreeMap<PipelineStep, AgentConfig>,
        llm: Arc<dyn LlmClient>,
        store: PipelineStore,
    ) -> Self {
        let agents = agents
            .into_iter()
            .map(|(step, config)| (step, AgentRuntime::new(Arc::new(config), Arc::clone(&llm))))
            .collect();
        Self {
            agents: Arc::new(agents),
            store,
        }
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn steps(&self) -> Vec<PipelineStep> {
        self.agents.keys().copied().collect()
    }

    /// Run a pipeline to a terminal state and return it.
    ///
    /// The run itself lives on its own task, so dropping this future does not
    /// leave the pipeline stuck in `running`.
    pub async fn run_pipeline(&self, config: PipelineConfig) -> Result<PipelineState, OrchestratorError> {
        let (state, lease) = self.start(&config).await?;
        self.launch(state, lease, config.context)
            .await
            .map_err(|_| OrchestratorError::Aborted)?
    }

    /// Start a pipeline on a background task and return its initial state.
    pub async fn spawn_pipeline(&self, config: PipelineConfig) -> Result<PipelineState, OrchestratorError> {
        let (state, lease) = self.start(&config).await?;
        let initial = state.clone();
        drop(self.launch(state, lease, config.context));
        Ok(initial)
    }

    /// Run one agent outside any pipeline. No state is recorded.
    pub async fn run_single_agent(
        &self,
        step: &str,
        config: &PipelineConfig,
        extra: Map<String, Value>,
    ) -> Result<AgentResult, OrchestratorError> {
        let step: PipelineStep = step
            .parse()
            .map_err(|_| OrchestratorError::UnknownStep(step.to_string()))?;
        let runtime = self
            .agents
            .get(&step)
            .ok_or(OrchestratorError::AgentNotConfigured(step))?;

        let mut context = config.context.clone();
        context.extend(extra);
        let ctx = AgentContext::new(&config.subject_id, &config.actor_id).with_extra(context);
        let task = step.instruction(&config.subject_id, config.task.as_deref());

        tracing::info!(step = %step, subject_id = %config.subject_id, "Running single agent");
        Ok(runtime.run(&task, &ctx).await)
    }

    pub async fn get_status(&self, id: Uuid) -> Option<PipelineState> {
        self.store.get(id).await
    }

    pub async fn list_pipelines(&self) -> Vec<PipelineState> {
        self.store.list().await
    }

    /// Validate the requested steps, then insert a fresh `running` state.
    async fn start(
        &self,
        config: &PipelineConfig,
    ) -> Result<(PipelineState, PipelineLease), OrchestratorError> {
        let steps = self.resolve_steps(config.steps.as_deref())?;
        let state = PipelineState::new(config, steps);
        let lease = self.store.insert(state.clone()).await?;
        tracing::info!(
            pipeline_id = %state.id,
            subject_id = %state.subject_id,
            steps = ?state.steps,
            "Pipeline started"
        );
        Ok((state, lease))
    }

    /// Requested names in canonical order, deduplicated. `None` means every step.
    fn resolve_steps(&self, requested: Option<&[String]>) -> Result<Vec<PipelineStep>, OrchestratorError> {
        let mut steps = match requested {
            None => PipelineStep::ALL.to_vec(),
            Some(names) => names
                .iter()
                .map(|name| {
                    name.parse::<PipelineStep>()
                        .map_err(|_| OrchestratorError::UnknownStep(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        steps.sort();
        steps.dedup();

        if steps.is_empty() {
            return Err(OrchestratorError::NoSteps);
        }
        if let Some(missing) = steps.iter().find(|s| !self.agents.contains_key(*s)) {
            return Err(OrchestratorError::AgentNotConfigured(*missing));
        }
        Ok(steps)
    }

    /// Drive the pipeline on a supervised task. If the drive task dies, the
    /// pipeline is failed at its current step.
    fn launch(
        &self,
        state: PipelineState,
        lease: PipelineLease,
        extra: Map<String, Value>,
    ) -> JoinHandle<Result<PipelineState, OrchestratorError>> {
        let this = self.clone();
        let id = state.id;
        tokio::spawn(async move {
            let driver = this.clone();
            let run = tokio::spawn(async move { driver.drive(state, lease, extra).await });
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(pipeline_id = %id, "Pipeline task died: {}", e);
                    this.fail_aborted(id).await
                }
            };
            if let Err(e) = &outcome {
                tracing::error!(pipeline_id = %id, "Pipeline run aborted: {}", e);
            }
            outcome
        })
    }

    /// Move a pipeline whose driver died into `failed`.
    async fn fail_aborted(&self, id: Uuid) -> Result<PipelineState, OrchestratorError> {
        let lease = self.store.claim(id).await?;
        let state = self
            .store
            .update(&lease, |s| s.abort(ABORTED_STEP_ERROR))
            .await?;
        Ok(state)
    }

    async fn drive(
        &self,
        mut state: PipelineState,
        lease: PipelineLease,
        extra: Map<String, Value>,
    ) -> Result<PipelineState, OrchestratorError> {
        for step in state.steps.clone() {
            let runtime = self
                .agents
                .get(&step)
                .ok_or(OrchestratorError::AgentNotConfigured(step))?;

            state = self
                .store
                .update(&lease, |s| s.current_step = Some(step))
                .await?;

            let ctx = AgentContext::new(&state.subject_id, &state.actor_id)
                .with_extra(extra.clone())
                .with_pipeline(Arc::new(state.clone()));
            let task = step.instruction(&state.subject_id, state.task.as_deref());

            tracing::info!(pipeline_id = %state.id, step = %step, "Pipeline step started");
            let result = runtime.run(&task, &ctx).await;
            let success = result.success;

            state = self
                .store
                .update(&lease, move |s| {
                    if success {
                        s.record_success(step, result);
                    } else {
                        s.record_failure(step, result);
                    }
                })
                .await?;

            if !success {
                tracing::warn!(
                    pipeline_id = %state.id,
                    step = %step,
                    "Pipeline failed at step"
                );
                return Ok(state);
            }
            tracing::info!(pipeline_id = %state.id, step = %step, "Pipeline step completed");
        }

        state = self.store.update(&lease, |s| s.complete()).await?;
        tracing::info!(pipeline_id = %state.id, "Pipeline completed");
        Ok(state)
    }
}
