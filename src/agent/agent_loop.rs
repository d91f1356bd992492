//! Core agent loop implementation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::llm::{
    ContentBlock, InferenceRequest, LlmClient, LlmError, Message, StopReason, ToolUse, Usage,
};

use super::prompt::build_system_prompt;
use super::types::{AgentConfig, AgentContext, AgentResult, ToolCallRecord};

/// Why a run ended without a final answer. The `Display` text is what callers
/// see, so it never carries provider detail.
#[derive(Debug, Error, PartialEq)]
pub enum RunFailure {
    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Agent execution failed")]
    ExecutionFailed,

    #[error("Unexpected stop reason: {0}")]
    UnexpectedStopReason(String),

    #[error("Malformed model response")]
    MalformedResponse,

    #[error("Iteration limit exceeded ({0})")]
    IterationLimit(usize),
}

impl From<&LlmError> for RunFailure {
    fn from(err: &LlmError) -> Self {
        if err.is_transient() {
            Self::ServiceUnavailable
        } else {
            Self::ExecutionFailed
        }
    }
}

/// Drives one agent's bounded conversation with the model.
pub struct AgentRuntime {
    config: Arc<AgentConfig>,
    llm: Arc<dyn LlmClient>,
}

/// Everything a run accumulates, kept so failures can still report it.
#[derive(Default)]
struct RunProgress {
    tool_calls: Vec<ToolCallRecord>,
    artifacts: Map<String, Value>,
    usage: Usage,
}

impl RunProgress {
    fn add_usage(&mut self, usage: Usage) {
        self.usage.input_tokens = self.usage.input_tokens.saturating_add(usage.input_tokens);
        self.usage.output_tokens = self.usage.output_tokens.saturating_add(usage.output_tokens);
    }

    fn merge_artifacts(&mut self, artifacts: Map<String, Value>) {
        for (key, value) in artifacts {
            match (self.artifacts.get_mut(&key), value) {
                (Some(Value::Array(existing)), Value::Array(more)) => existing.extend(more),
                (_, value) => {
                    self.artifacts.insert(key, value);
                }
            }
        }
    }
}

/// Result of executing one requested tool call.
struct ToolExecution {
    record: ToolCallRecord,
    artifacts: Map<String, Value>,
    result_block: ContentBlock,
}

impl AgentRuntime {
    pub fn new(config: Arc<AgentConfig>, llm: Arc<dyn LlmClient>) -> Self {
        Self { config, llm }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run a task to completion. Never fails: errors are reported in the result.
    pub async fn run(&self, task: &str, ctx: &AgentContext) -> AgentResult {
        let started = Instant::now();
        let mut progress = RunProgress::default();

        let outcome = self.run_loop(task, ctx, &mut progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, output, error) = match outcome {
            Ok(text) => {
                tracing::info!(
                    agent = %self.config.name,
                    tool_calls = progress.tool_calls.len(),
                    input_tokens = progress.usage.input_tokens,
                    output_tokens = progress.usage.output_tokens,
                    duration_ms,
                    "Agent run completed"
                );
                (true, text, None)
            }
            Err(failure) => {
                tracing::warn!(
                    agent = %self.config.name,
                    tool_calls = progress.tool_calls.len(),
                    duration_ms,
                    "Agent run failed: {}",
                    failure
                );
                (false, String::new(), Some(failure.to_string()))
            }
        };

        AgentResult {
            agent_name: self.config.name.clone(),
            success,
            output,
            tool_calls: progress.tool_calls,
            artifacts: progress.artifacts,
            input_tokens: progress.usage.input_tokens,
            output_tokens: progress.usage.output_tokens,
            duration_ms,
            error,
        }
    }

    async fn run_loop(
        &self,
        task: &str,
        ctx: &AgentContext,
        progress: &mut RunProgress,
    ) -> Result<String, RunFailure> {
        let system_prompt = build_system_prompt(&self.config, ctx);
        let tool_schemas = self.config.tools.get_tool_schemas();
        let mut messages = vec![Message::user(task)];

        for iteration in 0..self.config.max_iterations {
            tracing::debug!(agent = %self.config.name, "Agent iteration {}", iteration + 1);

            let request = InferenceRequest {
                model: self.config.model.clone(),
                system: system_prompt.clone(),
                messages: messages.clone(),
                tools: tool_schemas.clone(),
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
            };

            let response = self.llm.complete(&request).await.map_err(|e| {
                tracing::error!(agent = %self.config.name, error = %e, "Model call failed");
                RunFailure::from(&e)
            })?;
            progress.add_usage(response.usage);

            messages.push(Message::assistant(response.content.clone()));

            match &response.stop_reason {
                StopReason::ToolUse => {
                    let calls = response.tool_uses();
                    if calls.is_empty() {
                        tracing::error!(agent = %self.config.name, "tool_use stop without tool calls");
                        return Err(RunFailure::MalformedResponse);
                    }

                    // Handlers run concurrently; join_all keeps the model's order.
                    let executions =
                        join_all(calls.iter().map(|call| self.execute_tool_call(call, ctx))).await;

                    let mut results = Vec::with_capacity(executions.len());
                    for execution in executions {
                        progress.merge_artifacts(execution.artifacts);
                        progress.tool_calls.push(execution.record);
                        results.push(execution.result_block);
                    }
                    messages.push(Message::tool_results(results));
                }
                StopReason::EndTurn | StopReason::StopSequence | StopReason::MaxTokens => {
                    if response.stop_reason == StopReason::MaxTokens {
                        tracing::warn!(agent = %self.config.name, "Final answer truncated at max_tokens");
                    }
                    return Ok(response.text());
                }
                StopReason::Other(reason) => {
                    return Err(RunFailure::UnexpectedStopReason(reason.clone()));
                }
            }
        }

        Err(RunFailure::IterationLimit(self.config.max_iterations))
    }

    /// Execute a single tool call. Always yields a record and a result turn.
    async fn execute_tool_call(&self, call: &ToolUse, ctx: &AgentContext) -> ToolExecution {
        let Some(tool) = self.config.tools.get(&call.name) else {
            let message = format!("Unknown tool: {}", call.name);
            tracing::warn!(agent = %self.config.name, call_id = %call.id, "{}", message);
            return ToolExecution {
                record: ToolCallRecord {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                    input: call.input.clone(),
                    output: None,
                    duration_ms: 0,
                    success: false,
                    error: Some(message.clone()),
                },
                artifacts: Map::new(),
                result_block: error_block(&call.id, &message),
            };
        };

        tracing::debug!(
            agent = %self.config.name,
            tool = %call.name,
            "Calling tool with args: {}",
            truncate_for_log(&call.input.to_string(), 500)
        );

        let started = Instant::now();
        let result = AssertUnwindSafe(tool.execute(call.input.clone(), ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("Tool {} panicked", call.name)));
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let (payload, artifacts) = output.into_parts();
                ToolExecution {
                    result_block: ContentBlock::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: payload_text(&payload),
                        is_error: false,
                    },
                    record: ToolCallRecord {
                        tool_name: call.name.clone(),
                        call_id: call.id.clone(),
                        input: call.input.clone(),
                        output: Some(payload),
                        duration_ms,
                        success: true,
                        error: None,
                    },
                    artifacts,
                }
            }
            Err(e) => {
                let message = truncate_for_log(&e.to_string(), 1000);
                tracing::warn!(
                    agent = %self.config.name,
                    tool = %call.name,
                    call_id = %call.id,
                    "Tool failed: {}",
                    message
                );
                ToolExecution {
                    record: ToolCallRecord {
                        tool_name: call.name.clone(),
                        call_id: call.id.clone(),
                        input: call.input.clone(),
                        output: None,
                        duration_ms,
                        success: false,
                        error: Some(message.clone()),
                    },
                    artifacts: Map::new(),
                    result_block: error_block(&call.id, &message),
                }
            }
        }
    }
}

fn error_block(call_id: &str, message: &str) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: call_id.to_string(),
        content: json!({ "error": message }).to_string(),
        is_error: true,
    }
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{text_response, tool_use_response, usage, ScriptedLlm};
    use crate::llm::{InferenceResponse, RetryPolicy, RetryingClient, BackoffConfig};
    use crate::tools::testing::{EchoTool, FailingTool};
    use crate::tools::{Tool, ToolOutput, ToolRegistry};
    use std::time::Duration;

    fn agent_config(tools: Vec<Arc<dyn Tool>>, max_iterations: usize) -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            name: "test-agent".to_string(),
            description: "agent under test".to_string(),
            model: "test-model".to_string(),
            system_prompt: "You are a test agent.".to_string(),
            tools: ToolRegistry::from_tools(tools).unwrap(),
            max_iterations,
            temperature: 0.1,
            max_tokens: 512,
        })
    }

    fn ctx() -> AgentContext {
        AgentContext::new("p-1", "dr-1")
    }

    fn last_tool_results(llm: &ScriptedLlm) -> Vec<ContentBlock> {
        let requests = llm.requests();
        requests
            .last()
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn immediate_final_answer_has_no_tool_calls() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(text_response("All done."))]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(EchoTool::named("echo"))], 4), llm.clone());

        let result = runtime.run("Summarise", &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output, "All done.");
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.input_tokens, 10);
        assert_eq!(result.output_tokens, 5);
        assert_eq!(result.agent_name, "test-agent");

        let request = &llm.requests()[0];
        assert_eq!(request.model, "test-model");
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.messages, vec![Message::user("Summarise")]);
        assert!(request.system.starts_with("You are a test agent."));
    }

    #[tokio::test]
    async fn tool_calls_run_in_model_order_and_accumulate_tokens() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![
                ("call_a", "slow", json!({"n": 1})),
                ("call_b", "fast", json!({"n": 2})),
            ])),
            Ok(text_response("finished")),
        ]));
        let slow = EchoTool {
            name: "slow",
            artifacts: None,
            delay: Duration::from_millis(30),
        };
        let runtime = AgentRuntime::new(
            agent_config(vec![Arc::new(slow), Arc::new(EchoTool::named("fast"))], 4),
            llm.clone(),
        );

        let result = runtime.run("go", &ctx()).await;
        assert!(result.success);
        let ids: Vec<_> = result.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert!(result.tool_calls.iter().all(|r| r.success));
        assert_eq!(result.tool_calls[0].output, Some(json!({"echo": {"n": 1}})));
        assert_eq!(result.input_tokens, 30);
        assert_eq!(result.output_tokens, 13);

        let results = last_tool_results(&llm);
        let ordered: Vec<_> = results
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
                other => panic!("expected tool result, got {other:?}"),
            })
            .collect();
        assert_eq!(ordered, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn failing_tool_is_reported_to_model_and_loop_continues() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "always_fails", json!({}))])),
            Ok(text_response("I could not save the record.")),
        ]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(FailingTool)], 4), llm.clone());

        let result = runtime.run("save it", &ctx()).await;
        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 1);
        let record = &result.tool_calls[0];
        assert!(!record.success);
        assert!(record.output.is_none());
        assert!(record.error.as_deref().unwrap().contains("refused"));

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        match &requests[1].messages.last().unwrap().content[0] {
            ContentBlock::ToolResult { is_error, content, .. } => {
                assert!(*is_error);
                assert!(content.contains("refused"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_not_invoked() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "delete_everything", json!({}))])),
            Ok(text_response("ok")),
        ]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(EchoTool::named("echo"))], 3), llm);

        let result = runtime.run("go", &ctx()).await;
        assert!(result.success);
        let record = &result.tool_calls[0];
        assert_eq!(record.tool_name, "delete_everything");
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("Unknown tool: delete_everything"));
    }

    #[tokio::test]
    async fn artifacts_are_collected_but_hidden_from_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "saver", json!({"title": "x"}))])),
            Ok(text_response("saved")),
        ]));
        let saver = EchoTool {
            name: "saver",
            artifacts: Some(json!({"note_id": "note-7"})),
            delay: Duration::ZERO,
        };
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(saver)], 3), llm.clone());

        let result = runtime.run("go", &ctx()).await;
        assert_eq!(result.artifacts.get("note_id"), Some(&json!("note-7")));
        let recorded = result.tool_calls[0].output.as_ref().unwrap();
        assert!(recorded.get("_artifacts").is_none());

        for block in last_tool_results(&llm) {
            if let ContentBlock::ToolResult { content, .. } = block {
                assert!(!content.contains("_artifacts"));
                assert!(!content.contains("note-7"));
            }
        }
    }

    struct RawArtifactTool;

    #[async_trait::async_trait]
    impl Tool for RawArtifactTool {
        fn name(&self) -> &str {
            "raw"
        }
        fn description(&self) -> &str {
            "Returns artifacts inline"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value, _ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::new(
                json!({"ok": true, "_artifacts": {"note_id": "note-inline"}}),
            ))
        }
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "explodes"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value, _ctx: &AgentContext) -> anyhow::Result<ToolOutput> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn inline_artifacts_in_explicit_output_are_lifted() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "raw", json!({}))])),
            Ok(text_response("done")),
        ]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(RawArtifactTool)], 3), llm.clone());

        let result = runtime.run("go", &ctx()).await;
        assert!(result.success);
        assert_eq!(result.artifacts.get("note_id"), Some(&json!("note-inline")));
        assert_eq!(result.tool_calls[0].output, Some(json!({"ok": true})));

        match &last_tool_results(&llm)[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert!(!content.contains("_artifacts"));
                assert!(!content.contains("note-inline"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_tool_becomes_tool_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "explodes", json!({}))])),
            Ok(text_response("recovered")),
        ]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(PanickingTool)], 3), llm);

        let result = runtime.run("go", &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output, "recovered");
        let record = &result.tool_calls[0];
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("Tool explodes panicked"));
    }

    #[tokio::test]
    async fn iteration_limit_preserves_partial_progress() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response(vec![("call_1", "echo", json!({"step": 1}))])),
            Ok(tool_use_response(vec![("call_2", "echo", json!({"step": 2}))])),
            Ok(text_response("too late")),
        ]));
        let runtime = AgentRuntime::new(agent_config(vec![Arc::new(EchoTool::named("echo"))], 2), llm.clone());

        let result = runtime.run("loop", &ctx()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Iteration limit"));
        let ids: Vec<_> = result.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn unrecognized_stop_reason_fails_run() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(InferenceResponse {
            content: vec![],
            stop_reason: StopReason::Other("refusal".to_string()),
            usage: usage(3, 0),
        })]));
        let runtime = AgentRuntime::new(agent_config(vec![], 3), llm);

        let result = runtime.run("go", &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unexpected stop reason: refusal"));
        assert_eq!(result.input_tokens, 3);
    }

    #[tokio::test]
    async fn tool_use_without_calls_is_malformed() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(InferenceResponse {
            content: vec![ContentBlock::Text {
                text: "hmm".to_string(),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(1, 1),
        })]));
        let runtime = AgentRuntime::new(agent_config(vec![], 3), llm);

        let result = runtime.run("go", &ctx()).await;
        assert_eq!(result.error.as_deref(), Some("Malformed model response"));
    }

    #[tokio::test]
    async fn max_tokens_counts_as_final_answer() {
        let mut truncated = text_response("partial answer");
        truncated.stop_reason = StopReason::MaxTokens;
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(truncated)]));
        let runtime = AgentRuntime::new(agent_config(vec![], 3), llm);

        let result = runtime.run("go", &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output, "partial answer");
    }

    #[tokio::test]
    async fn transport_errors_are_sanitized() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::Unavailable(503))]));
        let runtime = AgentRuntime::new(agent_config(vec![], 3), llm);
        let result = runtime.run("go", &ctx()).await;
        assert_eq!(result.error.as_deref(), Some("Service temporarily unavailable"));

        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::Api {
            status: 401,
            message: "invalid x-api-key sk-secret".to_string(),
        })]));
        let runtime = AgentRuntime::new(agent_config(vec![], 3), llm);
        let result = runtime.run("go", &ctx()).await;
        assert_eq!(result.error.as_deref(), Some("Agent execution failed"));
        assert!(!serde_json::to_string(&result).unwrap().contains("sk-secret"));
    }

    #[tokio::test]
    async fn transient_retries_do_not_change_outcome() {
        let script = || {
            vec![
                Ok(tool_use_response(vec![("call_1", "echo", json!({"x": 1}))])),
                Ok(text_response("done")),
            ]
        };
        let policy = RetryPolicy {
            request_timeout: Duration::from_secs(1),
            max_retries: 2,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            },
        };

        let clean: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
            Arc::new(ScriptedLlm::new(script())),
            policy.clone(),
        ));
        let mut flaky_script = vec![
            Err(LlmError::RateLimited { retry_after: None }),
            Err(LlmError::ServerError(500)),
        ];
        flaky_script.extend(script());
        let flaky: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
            Arc::new(ScriptedLlm::new(flaky_script)),
            policy,
        ));

        let config = agent_config(vec![Arc::new(EchoTool::named("echo"))], 4);
        let mut a = AgentRuntime::new(config.clone(), clean).run("go", &ctx()).await;
        let mut b = AgentRuntime::new(config, flaky).run("go", &ctx()).await;

        a.duration_ms = 0;
        b.duration_ms = 0;
        for record in a.tool_calls.iter_mut().chain(b.tool_calls.iter_mut()) {
            record.duration_ms = 0;
        }
        assert_eq!(a, b);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ééééé";
        let out = truncate_for_log(s, 3);
        assert!(out.starts_with("é"));
        assert!(out.ends_with("[truncated]"));
        assert_eq!(truncate_for_log("short", 10), "short");
    }
}
