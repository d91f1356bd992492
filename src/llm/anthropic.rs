//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ContentBlock, InferenceRequest, InferenceResponse, LlmClient, LlmError, StopReason, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    fn request_body(request: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": request.messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        let res = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body, retry_after));
        }

        let body: Value = res.json().await?;
        parse_response(&body)
    }
}

fn parse_response(body: &Value) -> Result<InferenceResponse, LlmError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("missing 'content' array".to_string()))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                let id = block["id"]
                    .as_str()
                    .ok_or_else(|| LlmError::InvalidResponse("tool_use without id".to_string()))?;
                let name = block["name"].as_str().ok_or_else(|| {
                    LlmError::InvalidResponse("tool_use without name".to_string())
                })?;
                content.push(ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            other => {
                tracing::debug!("Skipping unsupported content block type: {:?}", other);
            }
        }
    }

    let stop_reason = body["stop_reason"]
        .as_str()
        .map(StopReason::parse)
        .ok_or_else(|| LlmError::InvalidResponse("missing 'stop_reason'".to_string()))?;

    let usage = Usage {
        input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };

    Ok(InferenceResponse {
        content,
        stop_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, ToolSpec};

    #[test]
    fn parses_tool_use_response() {
        let body = json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Looking up the patient."},
                {"type": "tool_use", "id": "toolu_01", "name": "get_patient_context", "input": {"patient_id": "p-1"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 120, "output_tokens": 30}
        });

        let response = parse_response(&body).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.input_tokens, 120);
        assert_eq!(response.usage.output_tokens, 30);
        let calls = response.tool_uses();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_01");
        assert_eq!(calls[0].input["patient_id"], "p-1");
    }

    #[test]
    fn skips_unknown_blocks_and_rejects_missing_content() {
        let body = json!({
            "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "done"}],
            "stop_reason": "end_turn"
        });
        let response = parse_response(&body).unwrap();
        assert_eq!(response.content.len(), 1);
        assert_eq!(response.usage, Usage::default());

        let err = parse_response(&json!({"stop_reason": "end_turn"})).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn request_body_includes_tools_and_temperature() {
        let request = InferenceRequest {
            model: "claude-test".to_string(),
            system: "be brief".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolSpec {
                name: "noop".to_string(),
                description: "does nothing".to_string(),
                input_schema: json!({"type": "object", "properties": {}}),
            }],
            max_tokens: 256,
            temperature: Some(0.2),
        };

        let body = AnthropicClient::request_body(&request);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["tools"][0]["name"], "noop");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert!(body["temperature"].as_f64().is_some());
    }
}
