//! Intent classification result and query-rewrite parsing.

use serde::{Deserialize, Serialize};

/// Intent used when classification is disabled or unreadable
pub const DEFAULT_INTENT: &str = "general";

fn default_intent() -> String {
    DEFAULT_INTENT.to_string()
}

/// Parsed output of the intent classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResult {
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Default for IntentResult {
    fn default() -> Self {
        Self {
            intent: default_intent(),
            entities: Vec::new(),
        }
    }
}

impl IntentResult {
    pub fn new(intent: impl Into<String>, entities: Vec<String>) -> Self {
        Self {
            intent: intent.into(),
            entities,
        }
    }

    /// Parse classifier JSON like `{"intent": "billing", "entities": ["seats"]}`.
    ///
    /// Anything unreadable yields the default `{general, []}`.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<IntentResult>(raw) {
            Ok(mut parsed) => {
                if parsed.intent.trim().is_empty() {
                    parsed.intent = default_intent();
                }
                parsed
            }
            Err(_) => Self::default(),
        }
    }

    /// Entities joined the way prompts expect them
    pub fn entities_joined(&self) -> String {
        self.entities.join(", ")
    }
}

#[derive(Deserialize)]
struct RewriteOutput {
    query: Option<String>,
}

/// Parse rewriter JSON `{"query": "..."}`, falling back to the raw user message
pub fn parse_search_query(raw: &str, user_message: &str) -> String {
    serde_json::from_str::<RewriteOutput>(raw)
        .ok()
        .and_then(|out| out.query)
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| user_message.to_string())
}
