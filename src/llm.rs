use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::{jitter_ratio, parse_retry_after, AnthropicClient, ChatResponse, Config, LlmMessage, LlmProvider, MODEL_ROLE};

#[derive(Debug, Error)]
pub(crate) enum LlmError {
    #[error("model API returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("model API transport error: {0}")]
    Transport(String),
    #[error("model API response could not be decoded: {0}")]
    Decode(String),
    #[error("model client misconfigured: {0}")]
    Config(String),
}

pub(crate) trait LlmClient: Send + Sync {
    fn model(&self) -> &str;
    fn chat(&self, messages: &[LlmMessage]) -> Result<ChatResponse, LlmError>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: usize,
    pub(crate) base_secs: f64,
    pub(crate) max_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_secs: 0.5,
            max_secs: 4.0,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: usize, retry_after: Option<f64>) -> Duration {
        let mut delay = (self.base_secs * 2.0_f64.powi(attempt as i32)).min(self.max_secs);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after);
        }
        delay *= 1.0 + jitter_ratio() * 0.2;
        Duration::from_secs_f64(delay)
    }
}

pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .build()
}

/// POSTs a JSON payload, retrying throttling, server errors and transport
/// failures with capped exponential backoff.
pub(crate) fn post_json_with_retry(
    agent: &ureq::Agent,
    url: &str,
    headers: &[(&str, &str)],
    payload: &serde_json::Value,
    policy: RetryPolicy,
) -> Result<serde_json::Value, LlmError> {
    let retryable = |status: u16| matches!(status, 429 | 500 | 502 | 503 | 504 | 529);

    for attempt in 0..=policy.max_retries {
        let mut request = agent.post(url).set("content-type", "application/json");
        for (name, value) in headers {
            request = request.set(name, value);
        }
        match request.send_json(payload.clone()) {
            Ok(resp) => {
                let body = resp
                    .into_string()
                    .map_err(|e| LlmError::Transport(e.to_string()))?;
                return serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()));
            }
            Err(ureq::Error::Status(code, resp)) => {
                let retry_after = parse_retry_after(&resp);
                let body = resp.into_string().unwrap_or_default();
                if attempt < policy.max_retries && retryable(code) {
                    let delay = policy.delay(attempt, retry_after);
                    tracing::warn!(%url, code, attempt, ?delay, "model API throttled or failing, retrying");
                    thread::sleep(delay);
                    continue;
                }
                return Err(LlmError::Status { code, body });
            }
            Err(ureq::Error::Transport(err)) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay(attempt, None);
                    tracing::warn!(%url, error = %err, attempt, ?delay, "model API transport error, retrying");
                    thread::sleep(delay);
                    continue;
                }
                return Err(LlmError::Transport(err.to_string()));
            }
        }
    }
    Err(LlmError::Transport(format!("no response from {url}")))
}

/// Chat client for an Ollama server (`/api/chat`, non-streaming).
pub(crate) struct OllamaClient {
    host: String,
    model: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub(crate) fn new(host: &str, model: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            agent: http_agent(timeout),
            retry,
        }
    }

    pub(crate) fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    pub(crate) fn payload(&self, messages: &[LlmMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        })
    }
}

pub(crate) fn parse_ollama_response(payload: &serde_json::Value) -> Result<ChatResponse, LlmError> {
    let message = payload
        .get("message")
        .ok_or_else(|| LlmError::Decode("response missing message".into()))?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LlmError::Decode("response message missing content".into()))?;
    let role = message
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or(MODEL_ROLE);
    Ok(ChatResponse {
        message: LlmMessage::new(role, content),
    })
}

impl LlmClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn chat(&self, messages: &[LlmMessage]) -> Result<ChatResponse, LlmError> {
        let started = std::time::Instant::now();
        let payload = self.payload(messages);
        let body = post_json_with_retry(&self.agent, &self.chat_url(), &[], &payload, self.retry)?;
        tracing::debug!(model = %self.model, elapsed_ms = started.elapsed().as_millis() as u64, "ollama chat complete");
        parse_ollama_response(&body)
    }
}

const MOCK_REPLIES: &[&str] = &[
    "From:Echo To:group I hear you, tell me more.",
    "From:Echo To:group That sounds like a question for the whole group.",
    "From:Echo To:group Let me think about that for a moment.",
    "From:Echo To:group helpdesk staff need a lesson on what's funny and what's not.",
    "From:Echo To:group Interesting. What makes you say that?",
];

/// Offline stand-in that answers with a random canned open-dialog reply.
pub(crate) struct MockLlmClient {
    pub(crate) replies: Vec<String>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            replies: MOCK_REPLIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        "mock"
    }

    fn chat(&self, _messages: &[LlmMessage]) -> Result<ChatResponse, LlmError> {
        if self.replies.is_empty() {
            return Err(LlmError::Config("mock client has no replies".into()));
        }
        let index = (jitter_ratio() * self.replies.len() as f64) as usize % self.replies.len();
        Ok(ChatResponse {
            message: LlmMessage::new(MODEL_ROLE, self.replies[index].clone()),
        })
    }
}

pub(crate) fn build_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>, LlmError> {
    let timeout = Duration::from_secs(config.llm_timeout_secs.max(1));
    let retry = RetryPolicy {
        max_retries: config.llm_max_retries,
        ..RetryPolicy::default()
    };
    let client: Arc<dyn LlmClient> = match config.llm_provider {
        LlmProvider::Ollama => Arc::new(OllamaClient::new(&config.ollama_host, &config.model, timeout, retry)),
        LlmProvider::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| LlmError::Config("ANTHROPIC_API_KEY is required for the anthropic provider".into()))?;
            Arc::new(AnthropicClient::new(
                &config.anthropic_base_url,
                &api_key,
                &config.model,
                timeout,
                retry,
            ))
        }
        LlmProvider::Mock => Arc::new(MockLlmClient::default()),
    };
    tracing::info!(provider = ?config.llm_provider, model = client.model(), "model client ready");
    Ok(client)
}
