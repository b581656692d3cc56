//! OpenAI-backed collaborators gated by the flag source.

use async_trait::async_trait;
use helpdesk_shared::{
    parse_search_query, ChainError, ChatTurn, Document, IntentResult, QualityMetadata,
    RouteDecision,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::retrieval::{format_for_generation, format_for_judge, parse_search_output, scoped_query};
use super::{
    recent_turns, Generation, ModelTracker, SpanCollaborators, EMPTY_GENERATION_REPLY,
    GENERATION_DISABLED_REPLY, GENERATION_HISTORY_TURNS, ROUTING_HISTORY_TURNS,
};
use crate::config::OpenAiConfig;
use crate::flags::{
    CompletionConfig, FlagSource, GENERATOR_KEY, INTENT_KEY, JUDGE_KEY, REWRITER_KEY, ROUTER_KEY,
};
use crate::metrics::ChainMetrics;
use crate::openai::{ChatMessage, Completion, CompletionRequest, OpenAiClient};
use crate::trace::TraceContext;

pub struct LiveSpans {
    client: OpenAiClient,
    flags: Arc<dyn FlagSource>,
    metrics: ChainMetrics,
    retrieval_model: String,
    search_site: String,
}

impl LiveSpans {
    pub fn new(
        client: OpenAiClient,
        flags: Arc<dyn FlagSource>,
        metrics: ChainMetrics,
        config: &OpenAiConfig,
    ) -> Self {
        Self {
            client,
            flags,
            metrics,
            retrieval_model: config.retrieval_model.clone(),
            search_site: config.search_site.clone(),
        }
    }

    async fn config(&self, key: &str, ctx: &TraceContext) -> Result<CompletionConfig, ChainError> {
        let config = self.flags.completion_config(key, ctx).await?;
        if !config.enabled {
            info!("{} disabled for session {}, using default", key, ctx.session_id());
        }
        Ok(config)
    }

    /// System prompt, then `history`, then the user content
    fn messages(system_prompt: String, history: &[ChatTurn], user: String) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(user));
        messages
    }

    async fn complete(
        &self,
        config: &CompletionConfig,
        messages: Vec<ChatMessage>,
        json_mode: bool,
    ) -> Result<Completion, ChainError> {
        let mut request = CompletionRequest::new(&config.model, config.temperature, messages);
        if json_mode {
            request = request.json_mode();
        }
        let completion = self.client.complete(&request).await?;
        self.metrics.record_tokens(
            &config.key,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );
        Ok(completion)
    }
}

#[async_trait]
impl SpanCollaborators for LiveSpans {
    async fn classify_intent(
        &self,
        message: &str,
        ctx: &TraceContext,
    ) -> Result<IntentResult, ChainError> {
        let config = self.config(INTENT_KEY, ctx).await?;
        if !config.enabled {
            return Ok(IntentResult::default());
        }

        let prompt = config.render_prompt(&[("user_message", message)]);
        let messages = Self::messages(prompt, &[], message.to_string());
        let completion = self.complete(&config, messages, true).await?;

        Ok(completion
            .content
            .as_deref()
            .map(IntentResult::parse)
            .unwrap_or_default())
    }

    async fn route(
        &self,
        message: &str,
        intent: &IntentResult,
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<RouteDecision, ChainError> {
        let config = self.config(ROUTER_KEY, ctx).await?;
        if !config.enabled {
            return Ok(RouteDecision::Search);
        }

        let entities = intent.entities_joined();
        let prompt = config.render_prompt(&[
            ("user_message", message),
            ("intent", &intent.intent),
            ("entities", &entities),
        ]);
        let user = format!(
            "Intent: {}\nEntities: {}\n\nUser message: {}",
            intent.intent, entities, message
        );
        let messages = Self::messages(prompt, recent_turns(history, ROUTING_HISTORY_TURNS), user);
        let completion = self.complete(&config, messages, true).await?;

        Ok(completion
            .content
            .as_deref()
            .map(RouteDecision::parse)
            .unwrap_or(RouteDecision::Search))
    }

    async fn rewrite_query(
        &self,
        message: &str,
        intent: &IntentResult,
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<String, ChainError> {
        let config = self.config(REWRITER_KEY, ctx).await?;
        if !config.enabled {
            return Ok(message.to_string());
        }

        let entities = intent.entities_joined();
        let prompt = config.render_prompt(&[
            ("user_message", message),
            ("intent", &intent.intent),
            ("entities", &entities),
        ]);
        let messages = Self::messages(
            prompt,
            recent_turns(history, ROUTING_HISTORY_TURNS),
            message.to_string(),
        );
        let completion = self.complete(&config, messages, true).await?;

        Ok(match completion.content.as_deref() {
            Some(raw) => parse_search_query(raw, message),
            None => message.to_string(),
        })
    }

    async fn retrieve(
        &self,
        query: &str,
        ctx: &TraceContext,
    ) -> Result<Vec<Document>, ChainError> {
        ctx.span().record("retrieval.query", query);

        let input = scoped_query(&self.search_site, query);
        let response = self.client.web_search(&self.retrieval_model, &input).await?;
        let documents = parse_search_output(&response);

        ctx.span().record("retrieval.result_count", documents.len() as u64);
        debug!("Retrieved {} documents for '{}'", documents.len(), query);
        Ok(documents)
    }

    async fn generate(
        &self,
        message: &str,
        intent: &IntentResult,
        documents: &[Document],
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<Generation, ChainError> {
        let config = self.config(GENERATOR_KEY, ctx).await?;
        if !config.enabled {
            return Ok(Generation::untracked(GENERATION_DISABLED_REPLY));
        }

        let docs = format_for_generation(documents);
        let entities = intent.entities_joined();
        let prompt = config.render_prompt(&[
            ("intent", &intent.intent),
            ("docs", &docs),
            ("entities", &entities),
        ]);
        let messages = Self::messages(
            prompt,
            recent_turns(history, GENERATION_HISTORY_TURNS),
            message.to_string(),
        );
        let completion = self.complete(&config, messages, false).await?;

        let tracker = Arc::new(ModelTracker::from_completion(&config.key, &completion));
        let reply = completion
            .content
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_GENERATION_REPLY.to_string());

        Ok(Generation {
            reply,
            tracker: Some(tracker),
        })
    }

    async fn judge(
        &self,
        message: &str,
        reply: &str,
        documents: &[Document],
        ctx: &TraceContext,
    ) -> Result<QualityMetadata, ChainError> {
        let config = self.config(JUDGE_KEY, ctx).await?;
        if !config.enabled {
            return Ok(QualityMetadata::passing());
        }

        let user = format!(
            "User question: {}\n\nAssistant response: {}\n\nSource documents:\n{}",
            message,
            reply,
            format_for_judge(documents)
        );
        let messages = Self::messages(config.render_prompt(&[]), &[], user);
        let completion = self.complete(&config, messages, true).await?;

        Ok(completion
            .content
            .as_deref()
            .map(QualityMetadata::parse_verdict)
            .unwrap_or_else(QualityMetadata::failing))
    }
}
