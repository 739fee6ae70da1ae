//! OpenAI-compatible decision service client.

use super::{parse_decision, Decision, DecisionRequest, DecisionService};
use crate::config::{DEFAULT_DECISION_MODEL, DEFAULT_DECISION_URL};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// One chat-completions message as sent to the endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: &'static str,
    /// A plain string, or text plus image parts on the screenshot turn.
    pub content: Value,
}

impl ChatMessage {
    fn text(role: &'static str, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Value::String(text.into()),
        }
    }

    fn screenshot_turn(description: String, png_base64: &str) -> Self {
        Self {
            role: "user",
            content: json!([
                { "type": "text", "text": description },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", png_base64) }
                },
            ]),
        }
    }
}

/// Decision service backed by a vision chat-completions endpoint.
///
/// # Example
/// ```ignore
/// use submit_agent::decision::RemoteDecisionService;
///
/// let service = RemoteDecisionService::new("sk-...", "gpt-4o")
///     .with_api_url("https://llm.internal/v1/chat/completions");
/// ```
#[derive(Debug, Clone)]
pub struct RemoteDecisionService {
    api_key: String,
    api_url: String,
    model: String,
    temperature: f32,
    max_tokens: u16,
    client: reqwest::Client,
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

impl RemoteDecisionService {
    /// Create a new service client.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_DECISION_URL.to_string(),
            model: if model.is_empty() {
                DEFAULT_DECISION_MODEL.to_string()
            } else {
                model
            },
            temperature: 0.1,
            max_tokens: 2048,
            client: build_client(Duration::from_secs(60)),
        }
    }

    /// Use a custom API endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Change the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Whether an API key is present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Chat messages for a request: instruction, prior turns, then the
    /// current screenshot.
    pub fn build_messages(request: &DecisionRequest<'_>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + request.history.len() * 2);
        messages.push(ChatMessage::text("system", request.instruction));

        for turn in request.history {
            messages.push(ChatMessage::text("user", turn.instruction.clone()));
            let reply = json!({
                "actions": turn.actions,
                "text": turn.terminal_text,
            });
            messages.push(ChatMessage::text("assistant", reply.to_string()));
        }

        messages.push(ChatMessage::screenshot_turn(
            request.observation.describe(),
            &request.observation.screenshot_base64,
        ));
        messages
    }
}

/// Assistant text from an OpenAI-compatible response.
fn extract_content(root: &Value) -> Option<String> {
    let choice0 = root.get("choices")?.as_array()?.first()?;
    let msg = choice0.get("message").or_else(|| choice0.get("delta"))?;

    match msg.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let out: String = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            if out.is_empty() {
                None
            } else {
                Some(out)
            }
        }
        _ => None,
    }
}

#[async_trait]
impl DecisionService for RemoteDecisionService {
    async fn decide(&self, request: &DecisionRequest<'_>) -> AgentResult<Decision> {
        if !self.is_configured() {
            return Err(AgentError::NotConfigured("decision service api key"));
        }

        let body = json!({
            "model": &self.model,
            "messages": Self::build_messages(request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AgentError::Auth(format!("decision service returned {}", status)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AgentError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Remote(format!("HTTP {}: {}", status, error_text)));
        }

        let json: Value = response.json().await?;
        let content =
            extract_content(&json).ok_or(AgentError::MissingField("choices[0].message.content"))?;

        Ok(parse_decision(&content))
    }

    fn service_name(&self) -> &'static str {
        "openai-compatible"
    }
}
