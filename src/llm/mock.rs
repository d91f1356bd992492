//! Scripted model client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ContentBlock, InferenceRequest, InferenceResponse, LlmClient, LlmError, StopReason, Usage,
};

/// Replays a fixed queue of responses and records every request it sees.
pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Result<InferenceResponse, LlmError>>>,
    delays: Mutex<VecDeque<Duration>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn new(script: Vec<Result<InferenceResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delays: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Per-call delays, consumed in call order.
    pub(crate) fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock().unwrap() = delays.into();
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }
}

pub(crate) fn usage(input_tokens: u64, output_tokens: u64) -> Usage {
    Usage {
        input_tokens,
        output_tokens,
    }
}

pub(crate) fn text_response(text: &str) -> InferenceResponse {
    InferenceResponse {
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: usage(10, 5),
    }
}

/// A tool-use turn requesting `(id, name, input)` calls in order.
pub(crate) fn tool_use_response(calls: Vec<(&str, &str, Value)>) -> InferenceResponse {
    InferenceResponse {
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            })
            .collect(),
        stop_reason: StopReason::ToolUse,
        usage: usage(20, 8),
    }
}
