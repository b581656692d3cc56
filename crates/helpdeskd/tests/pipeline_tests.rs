//! Chain pipeline tests.
//!
//! These tests are DETERMINISTIC - collaborators are scripted with
//! `FakeSpans`, no network involved. Live collaborators are covered by
//! `live_spans_tests.rs`.

use helpdesk_shared::{
    ChainError, ChainEvent, ChainStep, ChatRequest, ChatTurn, Document, FeedbackKind,
    IntentResult, QualityMetadata, RouteDecision, RouteKind, Role, StepDetail, StepStatus,
};
use helpdeskd::feedback::submit_feedback;
use helpdeskd::metrics::ChainMetrics;
use helpdeskd::orchestrator::{run_chain, ChainDeps};
use helpdeskd::spans::{FakeSpans, FakeSpansBuilder, SpanCall};
use helpdeskd::store::{SessionStore, TrackerStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

fn setup(builder: FakeSpansBuilder) -> (Arc<FakeSpans>, ChainDeps) {
    let spans = Arc::new(builder.build());
    let deps = ChainDeps::with_defaults(spans.clone()).unwrap();
    (spans, deps)
}

fn two_docs() -> Vec<Document> {
    vec![
        Document::new(
            "Creating feature flags",
            "https://docs.example.com/flags/create",
            "Open the Flags list and click Create flag.",
        ),
        Document::new("Search Results", "", "Flags can be created from the dashboard."),
    ]
}

/// (step, status) pairs of every step event, plus the number of result events
fn shape(events: &[ChainEvent]) -> (Vec<(ChainStep, StepStatus)>, usize) {
    let steps = events
        .iter()
        .filter_map(ChainEvent::as_step)
        .map(|s| (s.step, s.status))
        .collect();
    let results = events
        .iter()
        .filter(|e| matches!(e, ChainEvent::Result(_)))
        .count();
    (steps, results)
}

fn pairs(steps: &[ChainStep]) -> Vec<(ChainStep, StepStatus)> {
    steps
        .iter()
        .flat_map(|s| [(*s, StepStatus::Running), (*s, StepStatus::Done)])
        .collect()
}

// ============================================================================
// Short-circuit routes
// ============================================================================

#[tokio::test]
async fn test_direct_route_replies_verbatim() {
    let (spans, deps) = setup(
        FakeSpansBuilder::new()
            .router_output(r#"{"route": "direct", "message": "You're welcome!"}"#),
    );

    let response = run_chain(deps.clone(), ChatRequest::new("thanks!", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(response.reply, "You're welcome!");
    assert!(response.sources.is_empty());
    assert_eq!(response.quality, QualityMetadata::passing());
    assert!(response.quality.passed);
    assert_eq!(spans.called_steps(), vec![ChainStep::Intent, ChainStep::Router]);
    assert_eq!(deps.trackers.len().await, 0);
}

#[tokio::test]
async fn test_direct_reply_keeps_surrounding_whitespace() {
    let (_spans, deps) = setup(
        FakeSpansBuilder::new()
            .router_output("{\"route\": \"direct\", \"message\": \"  You're welcome!\\n\"}"),
    );

    let response = run_chain(deps, ChatRequest::new("thanks!", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(response.reply, "  You're welcome!\n");
}

#[tokio::test]
async fn test_clarify_route_replies_verbatim() {
    let (spans, deps) = setup(FakeSpansBuilder::new().route(RouteDecision::Clarify {
        message: "Which SDK are you using?".to_string(),
    }));

    let response = run_chain(deps, ChatRequest::new("help me", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(response.reply, "Which SDK are you using?");
    assert!(response.sources.is_empty());
    assert_eq!(response.quality, QualityMetadata::passing());
    assert!(spans.tracker().unwrap().received().is_empty());
    assert_eq!(spans.calls().len(), 2);
}

#[tokio::test]
async fn test_short_circuit_without_message_searches() {
    let (spans, deps) =
        setup(FakeSpansBuilder::new().router_output(r#"{"route": "clarify", "message": ""}"#));

    run_chain(deps, ChatRequest::new("hmm", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(spans.called_steps(), ChainStep::ALL.to_vec());
}

#[tokio::test]
async fn test_malformed_router_output_searches() {
    let (spans, deps) = setup(FakeSpansBuilder::new().router_output("definitely not json"));

    run_chain(deps, ChatRequest::new("how do I set up a flag?", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(spans.called_steps(), ChainStep::ALL.to_vec());
}

// ============================================================================
// Search route
// ============================================================================

#[tokio::test]
async fn test_search_sources_only_linked_documents() {
    let (spans, deps) = setup(
        FakeSpansBuilder::new()
            .intent(IntentResult::new("feature-question", vec!["flag".to_string()]))
            .query("create feature flag")
            .documents(two_docs()),
    );

    let response = run_chain(deps, ChatRequest::new("how do I set up a flag?", "s2"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].url, "https://docs.example.com/flags/create");
    assert_eq!(response.intent, "feature-question");
    assert_eq!(response.entities, vec!["flag".to_string()]);

    let calls = spans.calls();
    assert!(calls.contains(&SpanCall::Retrieve {
        query: "create feature flag".to_string()
    }));
    assert!(calls
        .iter()
        .any(|c| matches!(c, SpanCall::Generate { documents: 2, .. })));
}

#[tokio::test]
async fn test_search_sources_keep_retrieval_order() {
    let docs = vec![
        Document::new("C", "https://c", ""),
        Document::new("untitled", "", "text"),
        Document::new("A", "https://a", ""),
        Document::new("B", "https://b", ""),
    ];
    let (_spans, deps) = setup(FakeSpansBuilder::new().documents(docs));

    let response = run_chain(deps, ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap();

    let urls: Vec<&str> = response.sources.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(urls, vec!["https://c", "https://a", "https://b"]);
}

#[tokio::test]
async fn test_judge_parse_failure_fails_closed() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().judge_output("The answer looks great!"));

    let response = run_chain(deps, ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap();

    assert_eq!(response.quality, QualityMetadata::failing());
    assert_eq!(response.quality.relevance, 0.0);
    assert!(!response.quality.passed);
}

#[tokio::test]
async fn test_judge_sees_generated_reply() {
    let (spans, deps) = setup(FakeSpansBuilder::new().reply("Click Create flag."));

    run_chain(deps, ChatRequest::new("how?", "s1"))
        .into_response()
        .await
        .unwrap();

    assert!(spans.calls().contains(&SpanCall::Judge {
        message: "how?".to_string(),
        reply: "Click Create flag.".to_string(),
    }));
}

// ============================================================================
// Session history
// ============================================================================

#[tokio::test]
async fn test_each_run_appends_user_then_assistant() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().reply("answer one"));
    run_chain(deps.clone(), ChatRequest::new("question one", "s1"))
        .into_response()
        .await
        .unwrap();

    let history = deps.sessions.get("s1").await;
    assert_eq!(
        history,
        vec![ChatTurn::user("question one"), ChatTurn::assistant("answer one")]
    );

    let (_spans, direct) = setup(
        FakeSpansBuilder::new().route(RouteDecision::Direct {
            message: "Hi there!".to_string(),
        }),
    );
    run_chain(direct.clone(), ChatRequest::new("hello", "s9"))
        .into_response()
        .await
        .unwrap();
    let history = direct.sessions.get("s9").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].content, "Hi there!");
}

#[tokio::test]
async fn test_store_history_feeds_next_run() {
    let (spans, deps) = setup(FakeSpansBuilder::new().reply("first answer"));
    run_chain(deps.clone(), ChatRequest::new("first", "s1"))
        .into_response()
        .await
        .unwrap();
    run_chain(deps.clone(), ChatRequest::new("second", "s1"))
        .into_response()
        .await
        .unwrap();

    let second_route = spans
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SpanCall::Route { .. }))
        .nth(1)
        .unwrap();
    assert_eq!(
        second_route.history().unwrap(),
        &[ChatTurn::user("first"), ChatTurn::assistant("first answer")]
    );
    assert_eq!(deps.sessions.get("s1").await.len(), 4);
}

#[tokio::test]
async fn test_request_history_overrides_store() {
    let (spans, deps) = setup(FakeSpansBuilder::new());
    deps.sessions
        .append(
            "s3",
            [ChatTurn::user("stored question"), ChatTurn::assistant("stored answer")],
        )
        .await;

    let supplied = vec![
        ChatTurn::user("client question"),
        ChatTurn::assistant("client answer"),
    ];
    run_chain(
        deps.clone(),
        ChatRequest::new("follow-up", "s3").with_history(supplied.clone()),
    )
    .into_response()
    .await
    .unwrap();

    let with_history: Vec<SpanCall> = spans
        .calls()
        .into_iter()
        .filter(|c| c.history().is_some())
        .collect();
    assert_eq!(with_history.len(), 3);
    for call in &with_history {
        assert_eq!(call.history().unwrap(), supplied.as_slice());
    }
    // Still appended to the server-side session
    assert_eq!(deps.sessions.get("s3").await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_do_not_interfere() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().delay(Duration::from_millis(5)));

    let runs: Vec<_> = (0..12)
        .map(|i| {
            let deps = deps.clone();
            tokio::spawn(async move {
                run_chain(deps, ChatRequest::new(format!("q{}", i), format!("s{}", i % 4)))
                    .into_response()
                    .await
            })
        })
        .collect();
    for run in runs {
        run.await.unwrap().unwrap();
    }

    for s in 0..4 {
        assert_eq!(deps.sessions.get(&format!("s{}", s)).await.len(), 6);
    }
}

// ============================================================================
// Feedback
// ============================================================================

#[tokio::test]
async fn test_feedback_consumed_once() {
    let (spans, deps) = setup(FakeSpansBuilder::new());
    let response = run_chain(deps.clone(), ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap();

    let tracked =
        submit_feedback(&deps.trackers, &deps.metrics, &response.response_id, FeedbackKind::Positive)
            .await;
    assert!(tracked);
    let again =
        submit_feedback(&deps.trackers, &deps.metrics, &response.response_id, FeedbackKind::Negative)
            .await;
    assert!(!again);
    assert_eq!(spans.tracker().unwrap().received(), vec![FeedbackKind::Positive]);
}

#[tokio::test]
async fn test_untracked_generation_accepts_no_feedback() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().untracked());
    let (events, outcome) = run_chain(deps.clone(), ChatRequest::new("q", "s1"))
        .drain_events()
        .await;
    outcome.unwrap();

    let generate_done = events
        .iter()
        .filter_map(ChainEvent::as_step)
        .find(|s| s.step == ChainStep::Generate && s.status == StepStatus::Done)
        .unwrap();
    assert_eq!(generate_done.detail, Some(StepDetail::Generation { tracked: false }));

    let Some(ChainEvent::Result(response)) = events.last() else {
        panic!("last event should be the result");
    };
    assert!(!response.response_id.is_empty());
    assert!(
        !submit_feedback(&deps.trackers, &deps.metrics, &response.response_id, FeedbackKind::Positive)
            .await
    );
}

// ============================================================================
// Event stream
// ============================================================================

#[tokio::test]
async fn test_search_event_order() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().documents(two_docs()));
    let (events, outcome) = run_chain(deps, ChatRequest::new("q", "s1")).drain_events().await;
    outcome.unwrap();

    let (steps, results) = shape(&events);
    assert_eq!(steps, pairs(&ChainStep::ALL));
    assert_eq!(results, 1);
    assert!(matches!(events.last(), Some(ChainEvent::Result(_))));

    let retrieval = events
        .iter()
        .filter_map(ChainEvent::as_step)
        .find(|s| s.step == ChainStep::Retrieval && s.status == StepStatus::Done)
        .unwrap();
    assert_eq!(retrieval.label, "Found 2 documents");
}

#[tokio::test]
async fn test_short_circuit_event_order() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().route(RouteDecision::Direct {
        message: "Bye!".to_string(),
    }));
    let (events, outcome) = run_chain(deps, ChatRequest::new("bye", "s1")).drain_events().await;
    outcome.unwrap();

    let (steps, results) = shape(&events);
    assert_eq!(steps, pairs(&[ChainStep::Intent, ChainStep::Router]));
    assert_eq!(results, 1);

    let router_done = events.iter().filter_map(ChainEvent::as_step).nth(3).unwrap();
    assert_eq!(router_done.detail, Some(StepDetail::Route { route: RouteKind::Direct }));
}

#[tokio::test]
async fn test_drain_matches_streamed_result() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().documents(two_docs()).reply("same"));

    let (events, _) = run_chain(deps.clone(), ChatRequest::new("q", "a"))
        .drain_events()
        .await;
    let Some(ChainEvent::Result(mut streamed)) = events.last().cloned() else {
        panic!("stream should end with a result");
    };
    let mut drained = run_chain(deps, ChatRequest::new("q", "b"))
        .into_response()
        .await
        .unwrap();

    // Ids are minted per run
    streamed.response_id.clear();
    drained.response_id.clear();
    assert_eq!(streamed, drained);
}

#[tokio::test]
async fn test_hard_failure_ends_stream_without_result() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().fail_at(ChainStep::Generate));

    let (events, outcome) = run_chain(deps.clone(), ChatRequest::new("q", "s1"))
        .drain_events()
        .await;

    let (steps, results) = shape(&events);
    assert_eq!(results, 0);
    assert_eq!(steps.last(), Some(&(ChainStep::Generate, StepStatus::Running)));
    assert!(matches!(outcome, Err(ChainError::Model(_))));
    assert!(deps.sessions.get("s1").await.is_empty());

    let err = run_chain(deps, ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Model(_)));
}

#[tokio::test]
async fn test_judge_failure_releases_tracker() {
    let (_spans, deps) = setup(FakeSpansBuilder::new().fail_at(ChainStep::Judge));

    let err = run_chain(deps.clone(), ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Model(_)));
    assert_eq!(deps.trackers.len().await, 0);
}

#[tokio::test]
async fn test_busy_session_history_stays_bounded() {
    let spans = Arc::new(FakeSpansBuilder::new().reply("answer").build());
    let deps = ChainDeps::new(
        spans,
        SessionStore::default().with_max_turns(10),
        TrackerStore::default(),
        ChainMetrics::new().unwrap(),
    );

    for i in 0..50 {
        run_chain(deps.clone(), ChatRequest::new(format!("question {}", i), "hot"))
            .into_response()
            .await
            .unwrap();
    }

    let history = deps.sessions.get("hot").await;
    assert_eq!(history.len(), 10);
    assert_eq!(history[8].content, "question 49");
    assert_eq!(history[8].role, Role::User);
    assert_eq!(history[9].content, "answer");
    assert_eq!(history[9].role, Role::Assistant);
}

// ============================================================================
// Tracing
// ============================================================================

/// Records (span name, parent span name) for every span created
#[derive(Clone, Default)]
struct SpanRecorder(Arc<Mutex<Vec<(String, Option<String>)>>>);

impl SpanRecorder {
    fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    fn parent_of(&self, name: &str) -> Option<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, p)| p.clone())
    }
}

impl<S> Layer<S> for SpanRecorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, ctx: Context<'_, S>) {
        let parent = match attrs.parent() {
            Some(id) => ctx.span(id).map(|s| s.name().to_string()),
            None if attrs.is_contextual() => ctx.lookup_current().map(|s| s.name().to_string()),
            None => None,
        };
        self.0
            .lock()
            .unwrap()
            .push((attrs.metadata().name().to_string(), parent));
    }
}

#[tokio::test]
async fn test_step_spans_nest_under_run_span() {
    let recorder = SpanRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_spans, deps) = setup(FakeSpansBuilder::new());
    run_chain(deps, ChatRequest::new("q", "s1"))
        .into_response()
        .await
        .unwrap();

    for name in [
        "chain.intent-classification",
        "chain.query-routing",
        "chain.query-rewriting",
        "chain.doc-retrieval",
        "chain.response-generation",
        "chain.quality-judge",
    ] {
        assert_eq!(
            recorder.parent_of(name).as_deref(),
            Some("helpdesk.agent-chain"),
            "{} should be a child of the run span",
            name
        );
    }
}

#[tokio::test]
async fn test_unknown_feedback_records_no_span() {
    let recorder = SpanRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_spans, deps) = setup(FakeSpansBuilder::new());
    let tracked =
        submit_feedback(&deps.trackers, &deps.metrics, "unknown-id", FeedbackKind::Positive).await;

    assert!(!tracked);
    assert!(!recorder.names().iter().any(|n| n == "helpdesk.feedback"));
}
