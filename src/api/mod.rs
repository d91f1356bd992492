//! HTTP API over the pipeline orchestrator.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/pipelines` - Run a pipeline (`?async=true` to start it in the background)
//! - `GET /api/pipelines` - List known pipelines
//! - `GET /api/pipelines/:id` - Get pipeline status
//! - `POST /api/agents/:step/run` - Run one agent in isolation

mod routes;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;

use crate::agents::builtin_agents;
use crate::config::Config;
use crate::llm::{AnthropicClient, LlmClient, RetryingClient};
use crate::pipeline::{Orchestrator, PipelineStore};
use crate::tools::{InMemoryRecordStore, RecordStore};

pub use routes::{router, AppState};

/// Build the application and serve it until the process exits.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let transport = AnthropicClient::new(config.api_key.clone(), config.api_base_url.clone());
    let llm: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
        Arc::new(transport),
        config.llm.retry_policy(),
    ));

    let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let agents = builtin_agents(&config, records)?;
    let store = PipelineStore::new();
    let orchestrator = Arc::new(Orchestrator::new(agents, llm, store.clone()));

    spawn_eviction(store, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        orchestrator,
    });
    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop finished pipelines past the retention window.
fn spawn_eviction(store: PipelineStore, config: &Config) {
    let retention = config.pipeline_retention;
    let period = config.eviction_interval.max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            store.evict_terminal_older_than(retention).await;
        }
    });
}
