use std::time::Duration;

use crate::{
    http_agent, post_json_with_retry, ChatResponse, LlmClient, LlmError, LlmMessage, RetryPolicy, HUMAN_ROLE,
    MODEL_ROLE,
};

pub(crate) const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Messages API client. Histories are plain `{role, content}` turns, so no
/// tool blocks are ever sent; tool requests travel inside the text envelope.
pub(crate) struct AnthropicClient {
    url: String,
    api_key: String,
    model: String,
    max_tokens: u64,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub(crate) fn new(url: &str, api_key: &str, model: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        let url = if url.trim().is_empty() { DEFAULT_ANTHROPIC_URL } else { url.trim() };
        Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            agent: http_agent(timeout),
            retry,
        }
    }

    pub(crate) fn payload(&self, messages: &[LlmMessage]) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": to_anthropic_messages(messages),
        });
        let system_blocks = collect_system_blocks(messages);
        if !system_blocks.is_empty() {
            payload["system"] = serde_json::json!(system_blocks.join("\n\n"));
        }
        payload
    }
}

pub(crate) fn collect_system_blocks(messages: &[LlmMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == "system" && !m.content.trim().is_empty())
        .map(|m| m.content.trim().to_string())
        .collect()
}

/// The API wants strictly alternating turns, so consecutive turns with the
/// same role are merged into one message with several text blocks.
pub(crate) fn to_anthropic_messages(messages: &[LlmMessage]) -> Vec<serde_json::Value> {
    let mut out: Vec<serde_json::Value> = Vec::new();
    for msg in messages {
        let role = match msg.role.as_str() {
            "system" => continue,
            MODEL_ROLE => MODEL_ROLE,
            _ => HUMAN_ROLE,
        };
        let block = serde_json::json!({"type": "text", "text": msg.content});
        if let Some(last) = out.last_mut() {
            if last["role"] == role {
                if let Some(blocks) = last["content"].as_array_mut() {
                    blocks.push(block);
                    continue;
                }
            }
        }
        out.push(serde_json::json!({"role": role, "content": [block]}));
    }
    out
}

pub(crate) fn parse_claude_response(payload: &serde_json::Value) -> Result<ChatResponse, LlmError> {
    let content = payload
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmError::Decode("Claude response missing content".into()))?;
    let text_parts: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(|v| v.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
        .filter(|text| !text.is_empty())
        .collect();
    Ok(ChatResponse {
        message: LlmMessage::new(MODEL_ROLE, text_parts.join("\n")),
    })
}

impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn chat(&self, messages: &[LlmMessage]) -> Result<ChatResponse, LlmError> {
        let payload = self.payload(messages);
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", ANTHROPIC_VERSION),
        ];
        let body = post_json_with_retry(&self.agent, &self.url, &headers, &payload, self.retry)?;
        if let Some(stop) = body.get("stop_reason").and_then(|v| v.as_str()) {
            tracing::debug!(model = %self.model, stop_reason = stop, "claude chat complete");
        }
        parse_claude_response(&body)
    }
}
