//! OpenAI HTTP client used by the span collaborators.
//!
//! Chat Completions for the classifier/router/rewriter/generator/judge spans
//! and the Responses API with web search for retrieval. Transport and status
//! errors are hard failures; the content itself is handed back unparsed.

use helpdesk_shared::{ChainError, ChatTurn, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OpenAiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        let role = match turn.role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        Self {
            role,
            content: turn.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, temperature: f64, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            response_format: None,
        }
    }

    /// Ask the model for a JSON object
    pub fn json_mode(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object",
        });
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Outcome of one completion call
#[derive(Debug, Clone)]
pub struct Completion {
    /// First choice's content; `None` when the model returned nothing usable
    pub content: Option<String>,
    pub model: String,
    pub usage: Usage,
    pub duration: Duration,
}

pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Http(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &OpenAiConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(&config.base_url, api_key, config.request_timeout())?)
    }

    async fn post_json(&self, path: &str, body: &impl Serialize) -> Result<Value, ChainError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("OpenAI request to {} failed: {} {}", path, status, text);
            return Err(ChainError::Model(format!("{} returned {}: {}", path, status, text)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ChainError::Model(format!("{} returned invalid JSON: {}", path, e)))
    }

    /// Call the Chat Completions API
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ChainError> {
        let start = Instant::now();
        let json = self.post_json("/chat/completions", request).await?;
        let duration = start.elapsed();

        let parsed: CompletionResponse = serde_json::from_value(json)
            .map_err(|e| ChainError::Model(format!("unexpected completion shape: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);

        debug!(
            "Completion from {} in {}ms ({} chars)",
            request.model,
            duration.as_millis(),
            content.as_deref().map(str::len).unwrap_or(0)
        );

        Ok(Completion {
            content,
            model: if parsed.model.is_empty() {
                request.model.clone()
            } else {
                parsed.model
            },
            usage: parsed.usage.unwrap_or_default(),
            duration,
        })
    }

    /// Call the Responses API with the web search tool; returns the raw response
    pub async fn web_search(&self, model: &str, input: &str) -> Result<Value, ChainError> {
        let body = serde_json::json!({
            "model": model,
            "tools": [{
                "type": "web_search_preview",
                "search_context_size": "high"
            }],
            "input": input
        });
        self.post_json("/responses", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_json_mode() {
        let req = CompletionRequest::new("gpt-4o-mini", 0.0, vec![ChatMessage::user("hi")]).json_mode();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_plain_request_omits_format() {
        let req = CompletionRequest::new("gpt-4o", 0.3, vec![ChatMessage::system("be nice")]);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_turn_conversion() {
        let msg = ChatMessage::from(&ChatTurn::assistant("sure"));
        assert_eq!(msg.role, MessageRole::Assistant);
    }
}
