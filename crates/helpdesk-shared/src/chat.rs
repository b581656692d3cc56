//! Chat request/response types exchanged over HTTP.

use serde::{Deserialize, Serialize};

use crate::quality::QualityMetadata;

/// Session used when the caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

/// Inbound chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// When non-empty, replaces the server-side history for this run
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            conversation_history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.conversation_history = history;
        self
    }
}

/// A retrieved documentation snippet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }

    /// Citation for the reply, only for documents that carry a link
    pub fn source(&self) -> Option<Source> {
        if self.url.is_empty() {
            return None;
        }
        Some(Source {
            title: self.title.clone(),
            url: self.url.clone(),
        })
    }
}

/// Linked citation returned with a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Terminal result of one chain run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(default)]
    pub response_id: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub quality: QualityMetadata,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Thumbs up / thumbs down on a generated reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub response_id: String,
    pub kind: FeedbackKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub tracked: bool,
}

/// Body of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Whether the flag backend could be read at the time of the check
    pub flags_ready: bool,
    pub sessions: usize,
    pub trackers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.session_id, "default");
        assert!(req.conversation_history.is_empty());
    }

    #[test]
    fn test_turn_roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatTurn::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_document_without_url_has_no_source() {
        assert!(Document::new("Search Results", "", "text").source().is_none());
        let src = Document::new("Flags", "https://docs.example.com/flags", "").source();
        assert_eq!(src.unwrap().url, "https://docs.example.com/flags");
    }

    #[test]
    fn test_feedback_kind_rejects_unknown() {
        let bad = serde_json::from_str::<FeedbackRequest>(r#"{"response_id":"x","kind":"meh"}"#);
        assert!(bad.is_err());
    }
}
