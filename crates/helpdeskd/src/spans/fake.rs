//! Scripted collaborators for tests.
//!
//! ```rust,ignore
//! let spans = FakeSpansBuilder::new()
//!     .router_output(r#"{"route": "direct", "message": "You're welcome!"}"#)
//!     .build();
//! ```

use async_trait::async_trait;
use helpdesk_shared::{
    ChainError, ChainStep, ChatTurn, Document, IntentResult, QualityMetadata, RouteDecision,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Generation, SpanCollaborators};
use crate::feedback::{FeedbackTracker, RecordingTracker};
use crate::trace::TraceContext;

/// One recorded collaborator call, with the inputs that matter for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum SpanCall {
    Intent { message: String },
    Route { message: String, history: Vec<ChatTurn> },
    Rewrite { message: String, history: Vec<ChatTurn> },
    Retrieve { query: String },
    Generate { message: String, documents: usize, history: Vec<ChatTurn> },
    Judge { message: String, reply: String },
}

impl SpanCall {
    pub fn step(&self) -> ChainStep {
        match self {
            SpanCall::Intent { .. } => ChainStep::Intent,
            SpanCall::Route { .. } => ChainStep::Router,
            SpanCall::Rewrite { .. } => ChainStep::Rewrite,
            SpanCall::Retrieve { .. } => ChainStep::Retrieval,
            SpanCall::Generate { .. } => ChainStep::Generate,
            SpanCall::Judge { .. } => ChainStep::Judge,
        }
    }

    /// History the collaborator was handed, if it takes one
    pub fn history(&self) -> Option<&[ChatTurn]> {
        match self {
            SpanCall::Route { history, .. }
            | SpanCall::Rewrite { history, .. }
            | SpanCall::Generate { history, .. } => Some(history),
            _ => None,
        }
    }
}

pub struct FakeSpans {
    intent: IntentResult,
    route: RouteDecision,
    query: Option<String>,
    documents: Vec<Document>,
    reply: String,
    tracker: Option<Arc<RecordingTracker>>,
    quality: QualityMetadata,
    failing_step: Option<ChainStep>,
    delay: Duration,
    calls: Mutex<Vec<SpanCall>>,
}

impl FakeSpans {
    /// Calls in the order they were made
    pub fn calls(&self) -> Vec<SpanCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn called_steps(&self) -> Vec<ChainStep> {
        self.calls().iter().map(SpanCall::step).collect()
    }

    /// The tracker handed out by `generate`, if any
    pub fn tracker(&self) -> Option<Arc<RecordingTracker>> {
        self.tracker.clone()
    }

    async fn enter(&self, call: SpanCall) -> Result<(), ChainError> {
        let step = call.step();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing_step == Some(step) {
            return Err(ChainError::Model(format!("scripted failure at {}", step)));
        }
        Ok(())
    }
}

impl Default for FakeSpans {
    fn default() -> Self {
        FakeSpansBuilder::new().build()
    }
}

#[async_trait]
impl SpanCollaborators for FakeSpans {
    async fn classify_intent(
        &self,
        message: &str,
        _ctx: &TraceContext,
    ) -> Result<IntentResult, ChainError> {
        self.enter(SpanCall::Intent {
            message: message.to_string(),
        })
        .await?;
        Ok(self.intent.clone())
    }

    async fn route(
        &self,
        message: &str,
        _intent: &IntentResult,
        history: &[ChatTurn],
        _ctx: &TraceContext,
    ) -> Result<RouteDecision, ChainError> {
        self.enter(SpanCall::Route {
            message: message.to_string(),
            history: history.to_vec(),
        })
        .await?;
        Ok(self.route.clone())
    }

    async fn rewrite_query(
        &self,
        message: &str,
        _intent: &IntentResult,
        history: &[ChatTurn],
        _ctx: &TraceContext,
    ) -> Result<String, ChainError> {
        self.enter(SpanCall::Rewrite {
            message: message.to_string(),
            history: history.to_vec(),
        })
        .await?;
        Ok(self.query.clone().unwrap_or_else(|| message.to_string()))
    }

    async fn retrieve(
        &self,
        query: &str,
        _ctx: &TraceContext,
    ) -> Result<Vec<Document>, ChainError> {
        self.enter(SpanCall::Retrieve {
            query: query.to_string(),
        })
        .await?;
        Ok(self.documents.clone())
    }

    async fn generate(
        &self,
        message: &str,
        _intent: &IntentResult,
        documents: &[Document],
        history: &[ChatTurn],
        _ctx: &TraceContext,
    ) -> Result<Generation, ChainError> {
        self.enter(SpanCall::Generate {
            message: message.to_string(),
            documents: documents.len(),
            history: history.to_vec(),
        })
        .await?;
        Ok(Generation {
            reply: self.reply.clone(),
            tracker: self.tracker.clone().map(|t| t as Arc<dyn FeedbackTracker>),
        })
    }

    async fn judge(
        &self,
        message: &str,
        reply: &str,
        _documents: &[Document],
        _ctx: &TraceContext,
    ) -> Result<QualityMetadata, ChainError> {
        self.enter(SpanCall::Judge {
            message: message.to_string(),
            reply: reply.to_string(),
        })
        .await?;
        Ok(self.quality)
    }
}

/// Builder for [`FakeSpans`].
///
/// Defaults: intent `general`, route `search`, query echoes the message, no
/// documents, reply "Here is what I found.", a recording tracker, passing judge.
pub struct FakeSpansBuilder {
    intent: IntentResult,
    route: RouteDecision,
    query: Option<String>,
    documents: Vec<Document>,
    reply: String,
    tracked: bool,
    quality: QualityMetadata,
    failing_step: Option<ChainStep>,
    delay: Duration,
}

impl FakeSpansBuilder {
    pub fn new() -> Self {
        Self {
            intent: IntentResult::default(),
            route: RouteDecision::Search,
            query: None,
            documents: Vec::new(),
            reply: "Here is what I found.".to_string(),
            tracked: true,
            quality: QualityMetadata::passing(),
            failing_step: None,
            delay: Duration::ZERO,
        }
    }

    pub fn intent(mut self, intent: IntentResult) -> Self {
        self.intent = intent;
        self
    }

    pub fn route(mut self, route: RouteDecision) -> Self {
        self.route = route;
        self
    }

    /// Raw router model output, normalized the same way live output is
    pub fn router_output(mut self, raw: &str) -> Self {
        self.route = RouteDecision::parse(raw);
        self
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    pub fn reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// Generation returns no tracker
    pub fn untracked(mut self) -> Self {
        self.tracked = false;
        self
    }

    pub fn quality(mut self, quality: QualityMetadata) -> Self {
        self.quality = quality;
        self
    }

    /// Raw judge model output, normalized the same way live output is
    pub fn judge_output(mut self, raw: &str) -> Self {
        self.quality = QualityMetadata::parse_verdict(raw);
        self
    }

    /// Make `step` return a hard failure
    pub fn fail_at(mut self, step: ChainStep) -> Self {
        self.failing_step = Some(step);
        self
    }

    /// Sleep this long inside every call
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> FakeSpans {
        FakeSpans {
            intent: self.intent,
            route: self.route,
            query: self.query,
            documents: self.documents,
            reply: self.reply,
            tracker: self.tracked.then(|| Arc::new(RecordingTracker::default())),
            quality: self.quality,
            failing_step: self.failing_step,
            delay: self.delay,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Default for FakeSpansBuilder {
    fn default() -> Self {
        Self::new()
    }
}
