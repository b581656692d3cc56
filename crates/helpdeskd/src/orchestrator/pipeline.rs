//! The chain state machine.
//!
//! intent -> router -> { short-circuit | rewrite -> retrieval -> generate -> judge }
//!
//! Steps run strictly in order. Each collaborator call is dispatched onto
//! its own task, carrying a child `TraceContext` built from the run's root.

use helpdesk_shared::{
    ChainError, ChainEvent, ChainStep, ChatRequest, ChatResponse, ChatTurn, Document,
    IntentResult, QualityMetadata, RouteDecision, StepDetail, StepEvent,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use super::streaming::{ChainEventStream, ChannelEmitter, StepEmitter};
use super::ChainDeps;
use crate::spans::SpanCollaborators;
use crate::trace::TraceContext;

/// Start a run; events arrive on the returned stream as steps complete
pub fn run_chain(deps: ChainDeps, request: ChatRequest) -> ChainEventStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let emitter = ChannelEmitter::new(tx);
        execute_chain(&deps, request, &emitter).await.map(|_| ())
    });
    ChainEventStream::new(rx, task)
}

/// Run the chain to completion, emitting into `emitter`.
///
/// On success the terminal `result` event has been emitted and the session
/// holds the new user/assistant turns. On a hard failure nothing further is
/// emitted and the error is returned.
pub async fn execute_chain(
    deps: &ChainDeps,
    request: ChatRequest,
    emitter: &dyn StepEmitter,
) -> Result<ChatResponse, ChainError> {
    let response_id = Uuid::new_v4().to_string();
    let ctx = TraceContext::root(&request, &response_id);
    let root = ctx.span().clone();

    deps.metrics.active_runs.inc();
    let outcome = ChainRun::new(deps, emitter, ctx, response_id)
        .execute(request)
        .instrument(root)
        .await;
    deps.metrics.active_runs.dec();

    if let Err(e) = &outcome {
        error!("Chain run aborted: {}", e);
        deps.metrics.record_failure(e.kind());
    }
    outcome
}

struct ChainRun<'a> {
    deps: &'a ChainDeps,
    emitter: &'a dyn StepEmitter,
    ctx: TraceContext,
    response_id: String,
    started: Instant,
}

impl<'a> ChainRun<'a> {
    fn new(
        deps: &'a ChainDeps,
        emitter: &'a dyn StepEmitter,
        ctx: TraceContext,
        response_id: String,
    ) -> Self {
        Self {
            deps,
            emitter,
            ctx,
            response_id,
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn done(&self, step: ChainStep, detail: StepDetail) {
        self.emitter
            .emit(ChainEvent::Step(StepEvent::done(step, detail, self.elapsed_ms())));
    }

    /// Emit `running`, then run `call` on its own task under the step's child span
    async fn offload<T, F, Fut>(&self, step: ChainStep, call: F) -> Result<T, ChainError>
    where
        F: FnOnce(Arc<dyn SpanCollaborators>, TraceContext) -> Fut + Send,
        Fut: Future<Output = Result<T, ChainError>> + Send + 'static,
        T: Send + 'static,
    {
        self.emitter
            .emit(ChainEvent::Step(StepEvent::running(step, self.elapsed_ms())));

        let child = self.ctx.child(step);
        let span = child.span().clone();
        let step_start = Instant::now();

        let task = tokio::spawn(call(Arc::clone(&self.deps.spans), child).instrument(span));
        let result = task
            .await
            .map_err(|e| ChainError::Worker(format!("{} task failed: {}", step, e)))?;

        let elapsed = step_start.elapsed();
        self.deps.metrics.record_step(step, elapsed);
        debug!("{} finished in {}ms", step, elapsed.as_millis());
        result
    }

    async fn execute(self, request: ChatRequest) -> Result<ChatResponse, ChainError> {
        let ChatRequest {
            message,
            session_id,
            conversation_history,
        } = request;

        let history = if conversation_history.is_empty() {
            self.deps.sessions.get(&session_id).await
        } else {
            conversation_history
        };
        let message: Arc<str> = Arc::from(message);
        let history: Arc<[ChatTurn]> = Arc::from(history);

        let intent = {
            let message = Arc::clone(&message);
            self.offload(ChainStep::Intent, move |spans, ctx| async move {
                spans.classify_intent(&message, &ctx).await
            })
            .await?
        };
        self.ctx.span().record("chain.intent", intent.intent.as_str());
        self.emitter
            .emit(ChainEvent::Step(StepEvent::intent_done(&intent, self.elapsed_ms())));
        let intent = Arc::new(intent);

        let route = {
            let (message, intent, history) =
                (Arc::clone(&message), Arc::clone(&intent), Arc::clone(&history));
            self.offload(ChainStep::Router, move |spans, ctx| async move {
                spans.route(&message, &intent, &history, &ctx).await
            })
            .await?
        };
        let kind = route.kind();
        self.ctx.span().record("chain.route", kind.to_string().as_str());
        self.done(ChainStep::Router, StepDetail::Route { route: kind });

        let (reply, quality, documents) = match route {
            RouteDecision::Direct { message: reply } | RouteDecision::Clarify { message: reply } => {
                info!("Short-circuit ({}) for session {}", kind, session_id);
                (reply, QualityMetadata::passing(), Vec::new())
            }
            RouteDecision::Search => self.search(&message, &intent, &history).await?,
        };

        let span = self.ctx.span();
        span.record("chain.quality.relevance", quality.relevance);
        span.record("chain.quality.faithfulness", quality.faithfulness);
        span.record("chain.quality.passed", quality.passed);

        self.deps
            .sessions
            .append(
                &session_id,
                [ChatTurn::user(&*message), ChatTurn::assistant(reply.as_str())],
            )
            .await;

        let response = ChatResponse {
            reply,
            response_id: self.response_id.clone(),
            intent: intent.intent.clone(),
            entities: intent.entities.clone(),
            quality,
            sources: documents.iter().filter_map(Document::source).collect(),
        };

        self.deps.metrics.record_run(kind);
        info!(
            "Run {} complete: route={} sources={} passed={} ({}ms)",
            self.response_id,
            kind,
            response.sources.len(),
            quality.passed,
            self.elapsed_ms()
        );
        self.emitter.emit(ChainEvent::Result(response.clone()));
        Ok(response)
    }

    /// rewrite -> retrieval -> generate -> judge
    async fn search(
        &self,
        message: &Arc<str>,
        intent: &Arc<IntentResult>,
        history: &Arc<[ChatTurn]>,
    ) -> Result<(String, QualityMetadata, Vec<Document>), ChainError> {
        let query = {
            let (message, intent, history) =
                (Arc::clone(message), Arc::clone(intent), Arc::clone(history));
            self.offload(ChainStep::Rewrite, move |spans, ctx| async move {
                spans.rewrite_query(&message, &intent, &history, &ctx).await
            })
            .await?
        };
        self.done(ChainStep::Rewrite, StepDetail::Rewrite { query: query.clone() });

        let documents: Arc<[Document]> = {
            let query = query.clone();
            let documents = self
                .offload(ChainStep::Retrieval, move |spans, ctx| async move {
                    spans.retrieve(&query, &ctx).await
                })
                .await?;
            Arc::from(documents)
        };
        self.done(
            ChainStep::Retrieval,
            StepDetail::Retrieval {
                document_count: documents.len(),
            },
        );

        let generation = {
            let (message, intent, history, documents) = (
                Arc::clone(message),
                Arc::clone(intent),
                Arc::clone(history),
                Arc::clone(&documents),
            );
            self.offload(ChainStep::Generate, move |spans, ctx| async move {
                spans
                    .generate(&message, &intent, &documents, &history, &ctx)
                    .await
            })
            .await?
        };
        let tracked = match generation.tracker {
            Some(tracker) => {
                self.deps.trackers.put(&self.response_id, tracker).await;
                true
            }
            None => false,
        };
        self.done(ChainStep::Generate, StepDetail::Generation { tracked });

        let reply = generation.reply;
        let judged = {
            let (message, reply, documents) =
                (Arc::clone(message), reply.clone(), Arc::clone(&documents));
            self.offload(ChainStep::Judge, move |spans, ctx| async move {
                spans.judge(&message, &reply, &documents, &ctx).await
            })
            .await
        };
        let quality = match judged {
            Ok(quality) => quality,
            Err(e) => {
                // A failed run hands out no response_id
                if tracked {
                    self.deps.trackers.take(&self.response_id).await;
                }
                return Err(e);
            }
        };
        self.done(ChainStep::Judge, StepDetail::Judge { quality });

        Ok((reply, quality, documents.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::streaming::NoopEmitter;
    use crate::spans::FakeSpansBuilder;

    #[tokio::test]
    async fn test_execute_returns_response() {
        let deps = ChainDeps::with_defaults(Arc::new(FakeSpansBuilder::new().reply("ok").build())).unwrap();
        let response = execute_chain(&deps, ChatRequest::new("hi", "s1"), &NoopEmitter)
            .await
            .unwrap();
        assert_eq!(response.reply, "ok");
        assert_eq!(deps.sessions.get("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_response_ids_are_unique() {
        let deps = ChainDeps::with_defaults(Arc::new(FakeSpansBuilder::new().build())).unwrap();
        let a = execute_chain(&deps, ChatRequest::new("one", "s1"), &NoopEmitter)
            .await
            .unwrap();
        let b = execute_chain(&deps, ChatRequest::new("two", "s1"), &NoopEmitter)
            .await
            .unwrap();
        assert_ne!(a.response_id, b.response_id);
        assert!(Uuid::parse_str(&a.response_id).is_ok());
    }

    #[tokio::test]
    async fn test_failure_counted() {
        let spans = FakeSpansBuilder::new().fail_at(ChainStep::Retrieval).build();
        let deps = ChainDeps::with_defaults(Arc::new(spans)).unwrap();
        let err = execute_chain(&deps, ChatRequest::new("hi", "s1"), &NoopEmitter)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "model");
        assert!(deps
            .metrics
            .encode()
            .unwrap()
            .contains("helpdesk_chain_failures_total{kind=\"model\"} 1"));
        assert_eq!(deps.metrics.active_runs.get(), 0);
    }
}
