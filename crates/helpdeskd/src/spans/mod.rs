//! Pipeline step collaborators.
//!
//! Every step of the chain is one call on [`SpanCollaborators`]. The live
//! implementation talks to OpenAI through the flag source; the fake is
//! scripted and used by tests. Soft failures (disabled flag, unparseable
//! output) resolve to documented defaults inside the collaborator. Only
//! hard failures come back as `Err`.

pub mod fake;
pub mod live;
pub mod retrieval;
pub mod tracker;

use async_trait::async_trait;
use helpdesk_shared::{ChainError, ChatTurn, Document, IntentResult, QualityMetadata, RouteDecision};
use std::sync::Arc;

use crate::feedback::FeedbackTracker;
use crate::trace::TraceContext;

pub use fake::{FakeSpans, FakeSpansBuilder, SpanCall};
pub use live::LiveSpans;
pub use tracker::ModelTracker;

/// Turns of history the router and rewriter see
pub const ROUTING_HISTORY_TURNS: usize = 4;
/// Turns of history the generator sees
pub const GENERATION_HISTORY_TURNS: usize = 6;

pub const GENERATION_DISABLED_REPLY: &str =
    "I'm sorry, I'm unable to help right now. Please try again later.";
pub const EMPTY_GENERATION_REPLY: &str = "I couldn't generate a response.";

/// Reply plus the handle that lets feedback find this generation later
#[derive(Clone)]
pub struct Generation {
    pub reply: String,
    pub tracker: Option<Arc<dyn FeedbackTracker>>,
}

impl Generation {
    pub fn untracked(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            tracker: None,
        }
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("reply", &self.reply)
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

#[async_trait]
pub trait SpanCollaborators: Send + Sync {
    async fn classify_intent(
        &self,
        message: &str,
        ctx: &TraceContext,
    ) -> Result<IntentResult, ChainError>;

    async fn route(
        &self,
        message: &str,
        intent: &IntentResult,
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<RouteDecision, ChainError>;

    async fn rewrite_query(
        &self,
        message: &str,
        intent: &IntentResult,
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<String, ChainError>;

    async fn retrieve(&self, query: &str, ctx: &TraceContext)
        -> Result<Vec<Document>, ChainError>;

    async fn generate(
        &self,
        message: &str,
        intent: &IntentResult,
        documents: &[Document],
        history: &[ChatTurn],
        ctx: &TraceContext,
    ) -> Result<Generation, ChainError>;

    async fn judge(
        &self,
        message: &str,
        reply: &str,
        documents: &[Document],
        ctx: &TraceContext,
    ) -> Result<QualityMetadata, ChainError>;
}

/// Last `n` turns of `history`
pub fn recent_turns(history: &[ChatTurn], n: usize) -> &[ChatTurn] {
    &history[history.len().saturating_sub(n)..]
}
