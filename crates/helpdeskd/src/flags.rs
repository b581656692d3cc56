//! Feature gates and per-span model configuration.
//!
//! Each span asks the flag source for its `CompletionConfig` before calling
//! the model. A disabled config means "return the documented default". Being
//! unable to read the flag backend at all is a hard failure.

use async_trait::async_trait;
use helpdesk_shared::ChainError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::trace::TraceContext;

pub const INTENT_KEY: &str = "helpdesk-intent-classifier";
pub const ROUTER_KEY: &str = "helpdesk-router";
pub const REWRITER_KEY: &str = "helpdesk-query-rewriter";
pub const GENERATOR_KEY: &str = "helpdesk-response-generator";
pub const JUDGE_KEY: &str = "helpdesk-quality-judge";

/// Resolved configuration for one model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub key: String,
    pub enabled: bool,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: String,
}

impl CompletionConfig {
    /// System prompt with `{{name}}` placeholders substituted
    pub fn render_prompt(&self, vars: &[(&str, &str)]) -> String {
        let mut prompt = self.system_prompt.clone();
        for (name, value) in vars {
            prompt = prompt.replace(&format!("{{{{{}}}}}", name), value);
        }
        prompt
    }
}

/// Built-in configuration for a flag key
pub fn default_config(key: &str) -> CompletionConfig {
    let (model, temperature, prompt) = match key {
        INTENT_KEY => ("gpt-4o-mini", 0.0, INTENT_PROMPT),
        ROUTER_KEY => ("gpt-4o-mini", 0.0, ROUTER_PROMPT),
        REWRITER_KEY => ("gpt-4o-mini", 0.0, REWRITER_PROMPT),
        GENERATOR_KEY => ("gpt-4o", 0.3, GENERATOR_PROMPT),
        JUDGE_KEY => ("gpt-4o-mini", 0.0, JUDGE_PROMPT),
        _ => ("gpt-4o-mini", 0.0, ""),
    };
    CompletionConfig {
        key: key.to_string(),
        enabled: true,
        model: model.to_string(),
        temperature,
        system_prompt: prompt.to_string(),
    }
}

const INTENT_PROMPT: &str = "You are an intent classifier for a product support chatbot. \
Classify the user message into exactly one category and extract key entities.\n\n\
Categories: billing, feature-question, troubleshooting, integration, general\n\n\
Respond with JSON only:\n{\"intent\": \"<category>\", \"entities\": [\"<entity1>\", ...]}";

const ROUTER_PROMPT: &str = "You are a routing assistant for a product support chatbot. \
Given the user message, intent classification, and conversation history, decide the best action.\n\n\
Routes:\n\
- \"search\": the user has a specific question that requires searching the documentation.\n\
- \"clarify\": the question is too vague to search for; ask a clarifying question.\n\
- \"direct\": the message needs no documentation (greetings, thanks, goodbyes).\n\n\
Respond with JSON only:\n\
{\"route\": \"<search|clarify|direct>\", \"message\": \"<response if clarify or direct, empty string if search>\"}";

const REWRITER_PROMPT: &str = "You are a search query optimizer for product documentation. \
Given a user message and conversation context, produce a concise search query.\n\n\
Respond with JSON only:\n{\"query\": \"<optimized search query>\"}";

const GENERATOR_PROMPT: &str = "You are a helpful product support assistant. \
Answer the user's question using the provided documentation context. \
Be accurate, concise, and cite sources when possible.\n\n\
Intent: {{intent}}\nDocumentation context:\n{{docs}}\n\n\
If the documentation doesn't contain enough information to answer, \
say so honestly and suggest where to find more help.";

const JUDGE_PROMPT: &str = "You are a quality judge for a product support chatbot. \
Evaluate the assistant's response against the user's question and source documents.\n\n\
Score on two dimensions (0.0 to 1.0):\n\
- relevance: does the response address the user's question?\n\
- faithfulness: is the response grounded in the provided source documents?\n\n\
A response passes if both scores are >= 0.6.\n\n\
Respond with JSON only:\n{\"relevance\": <float>, \"faithfulness\": <float>, \"pass\": <bool>}";

/// Source of per-span completion configs
#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Evaluate the config for `key` in the context of one run
    async fn completion_config(
        &self,
        key: &str,
        ctx: &TraceContext,
    ) -> Result<CompletionConfig, ChainError>;

    /// Whether the backend is currently reachable
    async fn is_ready(&self) -> bool;
}

/// Partial override for one key; unset fields keep the built-in value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagOverride {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
}

impl FlagOverride {
    fn apply(&self, mut config: CompletionConfig) -> CompletionConfig {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(prompt) = &self.system_prompt {
            config.system_prompt = prompt.clone();
        }
        config
    }
}

/// Fixed flags: built-in defaults plus optional overrides
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    overrides: HashMap<String, FlagOverride>,
}

impl StaticFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, key: &str, flag: FlagOverride) -> Self {
        self.overrides.insert(key.to_string(), flag);
        self
    }

    /// Convenience for turning a span off
    pub fn disabled(self, key: &str) -> Self {
        self.with_override(
            key,
            FlagOverride {
                enabled: Some(false),
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl FlagSource for StaticFlags {
    async fn completion_config(
        &self,
        key: &str,
        _ctx: &TraceContext,
    ) -> Result<CompletionConfig, ChainError> {
        let base = default_config(key);
        Ok(match self.overrides.get(key) {
            Some(flag) => flag.apply(base),
            None => base,
        })
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

struct LoadedFlags {
    modified: Option<SystemTime>,
    overrides: HashMap<String, FlagOverride>,
}

/// Flags read from a TOML file, reloaded when the file's mtime changes.
///
/// ```toml
/// [helpdesk-router]
/// enabled = false
///
/// [helpdesk-response-generator]
/// model = "gpt-4o-mini"
/// ```
pub struct FileFlags {
    path: PathBuf,
    loaded: RwLock<Option<LoadedFlags>>,
}

impl FileFlags {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: RwLock::new(None),
        }
    }

    async fn modified(&self) -> Result<Option<SystemTime>, ChainError> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ChainError::FlagBackend(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(meta.modified().ok())
    }

    async fn overrides(&self) -> Result<HashMap<String, FlagOverride>, ChainError> {
        let modified = self.modified().await?;
        {
            let loaded = self.loaded.read().await;
            if let Some(current) = loaded.as_ref() {
                if modified.is_some() && current.modified == modified {
                    return Ok(current.overrides.clone());
                }
            }
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChainError::FlagBackend(format!("{}: {}", self.path.display(), e))
        })?;
        let overrides: HashMap<String, FlagOverride> = toml::from_str(&content).map_err(|e| {
            ChainError::FlagBackend(format!("{}: {}", self.path.display(), e))
        })?;
        info!(
            "Loaded {} flag overrides from {}",
            overrides.len(),
            self.path.display()
        );

        let mut loaded = self.loaded.write().await;
        *loaded = Some(LoadedFlags {
            modified,
            overrides: overrides.clone(),
        });
        Ok(overrides)
    }
}

#[async_trait]
impl FlagSource for FileFlags {
    async fn completion_config(
        &self,
        key: &str,
        ctx: &TraceContext,
    ) -> Result<CompletionConfig, ChainError> {
        let overrides = self.overrides().await?;
        let config = match overrides.get(key) {
            Some(flag) => flag.apply(default_config(key)),
            None => default_config(key),
        };
        debug!(
            "Flag {} for session {}: enabled={} model={}",
            key,
            ctx.session_id(),
            config.enabled,
            config.model
        );
        Ok(config)
    }

    async fn is_ready(&self) -> bool {
        self.modified().await.is_ok()
    }
}
