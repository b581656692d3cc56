//! Explicit trace context for one chain run.
//!
//! Collaborator calls run on separate tasks, so nothing ambient can be relied
//! on to find the parent span. The context is passed by value into every
//! dispatched call and child spans name their parent explicitly.

use helpdesk_shared::{ChainStep, ChatRequest};
use std::sync::Arc;
use tracing::field::Empty;
use tracing::{info_span, Span};

#[derive(Debug, Clone)]
pub struct TraceContext {
    span: Span,
    session_id: Arc<str>,
}

impl TraceContext {
    /// Root context covering a whole run
    pub fn root(request: &ChatRequest, run_id: &str) -> Self {
        let span = info_span!(
            "helpdesk.agent-chain",
            user.message = %request.message,
            session.id = %request.session_id,
            run.id = %run_id,
            chain.intent = Empty,
            chain.route = Empty,
            chain.quality.relevance = Empty,
            chain.quality.faithfulness = Empty,
            chain.quality.passed = Empty,
        );
        Self {
            span,
            session_id: Arc::from(request.session_id.as_str()),
        }
    }

    /// Context with no span, for calls made outside a chain run
    pub fn detached(session_id: &str) -> Self {
        Self {
            span: Span::none(),
            session_id: Arc::from(session_id),
        }
    }

    /// Context for one step, parented on this one
    pub fn child(&self, step: ChainStep) -> Self {
        let parent = &self.span;
        let span = match step {
            ChainStep::Intent => info_span!(parent: parent, "chain.intent-classification"),
            ChainStep::Router => info_span!(parent: parent, "chain.query-routing"),
            ChainStep::Rewrite => info_span!(parent: parent, "chain.query-rewriting"),
            ChainStep::Retrieval => info_span!(
                parent: parent,
                "chain.doc-retrieval",
                retrieval.query = Empty,
                retrieval.result_count = Empty
            ),
            ChainStep::Generate => info_span!(parent: parent, "chain.response-generation"),
            ChainStep::Judge => info_span!(parent: parent, "chain.quality-judge"),
        };
        Self {
            span,
            session_id: Arc::clone(&self.session_id),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Session the run belongs to; doubles as the flag-evaluation context key
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
