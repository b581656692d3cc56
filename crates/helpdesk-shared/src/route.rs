//! Route decision made after intent classification.
//!
//! The router is a model call, so its output is free-form JSON. It is parsed
//! into a closed set of routes; anything that does not fit becomes `Search`.

use serde::{Deserialize, Serialize};

/// Which branch the chain takes after routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "lowercase")]
pub enum RouteDecision {
    /// Search the documentation and run the full chain
    Search,
    /// Answer directly with the router's message (greetings, thanks)
    Direct { message: String },
    /// Ask the user a clarifying question
    Clarify { message: String },
}

/// Route without its payload, for events and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Search,
    Direct,
    Clarify,
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Direct => write!(f, "direct"),
            Self::Clarify => write!(f, "clarify"),
        }
    }
}

#[derive(Deserialize)]
struct RouterOutput {
    route: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RouteDecision {
    /// Parse router JSON `{"route": "search|direct|clarify", "message": "..."}`.
    ///
    /// Unknown routes, unreadable JSON and short-circuit routes without a
    /// message all normalize to `Search`.
    pub fn parse(raw: &str) -> Self {
        let Ok(out) = serde_json::from_str::<RouterOutput>(raw) else {
            return Self::Search;
        };
        let message = out.message.unwrap_or_default();
        let has_message = !message.trim().is_empty();
        let route = out.route.unwrap_or_default().trim().to_lowercase();

        // The message is the reply itself, so it is kept byte for byte
        match route.as_str() {
            "direct" if has_message => Self::Direct { message },
            "clarify" if has_message => Self::Clarify { message },
            _ => Self::Search,
        }
    }

    pub fn kind(&self) -> RouteKind {
        match self {
            Self::Search => RouteKind::Search,
            Self::Direct { .. } => RouteKind::Direct,
            Self::Clarify { .. } => RouteKind::Clarify,
        }
    }
}
