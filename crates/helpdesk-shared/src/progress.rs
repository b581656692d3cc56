//! Progress events for chain visibility.
//!
//! A run emits a `running` and a `done` step event per pipeline stage, then
//! exactly one `result` event. Clients treat the `result` as the only
//! success signal.

use serde::{Deserialize, Serialize};

use crate::chat::ChatResponse;
use crate::intent::IntentResult;
use crate::quality::QualityMetadata;
use crate::route::RouteKind;

/// Stage of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStep {
    Intent,
    Router,
    Rewrite,
    Retrieval,
    Generate,
    Judge,
}

impl std::fmt::Display for ChainStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChainStep {
    /// All stages of a full search run, in order
    pub const ALL: [ChainStep; 6] = [
        ChainStep::Intent,
        ChainStep::Router,
        ChainStep::Rewrite,
        ChainStep::Retrieval,
        ChainStep::Generate,
        ChainStep::Judge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Router => "router",
            Self::Rewrite => "rewrite",
            Self::Retrieval => "retrieval",
            Self::Generate => "generate",
            Self::Judge => "judge",
        }
    }

    fn running_label(&self) -> &'static str {
        match self {
            Self::Intent => "Classifying intent...",
            Self::Router => "Deciding how to answer...",
            Self::Rewrite => "Rewriting search query...",
            Self::Retrieval => "Searching documentation...",
            Self::Generate => "Writing response...",
            Self::Judge => "Checking answer quality...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Done,
}

/// Stage output reported with a `done` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDetail {
    Intent { intent: String, entities: Vec<String> },
    Route { route: RouteKind },
    Rewrite { query: String },
    Retrieval { document_count: usize },
    Generation { tracked: bool },
    Judge { quality: QualityMetadata },
}

/// Progress event for one stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: ChainStep,
    pub status: StepStatus,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<StepDetail>,
    /// Elapsed time since the run started (ms)
    pub elapsed_ms: u64,
}

impl StepEvent {
    pub fn running(step: ChainStep, elapsed_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Running,
            label: step.running_label().to_string(),
            detail: None,
            elapsed_ms,
        }
    }

    pub fn done(step: ChainStep, detail: StepDetail, elapsed_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Done,
            label: done_label(&detail),
            detail: Some(detail),
            elapsed_ms,
        }
    }

    pub fn intent_done(intent: &IntentResult, elapsed_ms: u64) -> Self {
        Self::done(
            ChainStep::Intent,
            StepDetail::Intent {
                intent: intent.intent.clone(),
                entities: intent.entities.clone(),
            },
            elapsed_ms,
        )
    }
}

fn done_label(detail: &StepDetail) -> String {
    match detail {
        StepDetail::Intent { intent, .. } => format!("Intent: {}", intent),
        StepDetail::Route { route } => format!("Route: {}", route),
        StepDetail::Rewrite { query } => format!("Search query: {}", query),
        StepDetail::Retrieval { document_count: 1 } => "Found 1 document".to_string(),
        StepDetail::Retrieval { document_count } => format!("Found {} documents", document_count),
        StepDetail::Generation { .. } => "Response generated".to_string(),
        StepDetail::Judge { quality } if quality.passed => "Quality check passed".to_string(),
        StepDetail::Judge { .. } => "Quality check flagged the answer".to_string(),
    }
}

/// One item of a chain's event stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Step(StepEvent),
    Result(ChatResponse),
}

impl ChainEvent {
    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::Step(_) => "step",
            ChainEvent::Result(_) => "result",
        }
    }

    /// JSON payload carried in the `data:` line
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ChainEvent::Step(step) => serde_json::to_string(step),
            ChainEvent::Result(response) => serde_json::to_string(response),
        }
    }

    /// Frame as `event: <kind>\ndata: <json>\n\n`
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: {}\ndata: {}\n\n", self.kind(), self.payload_json()?))
    }

    pub fn as_step(&self) -> Option<&StepEvent> {
        match self {
            ChainEvent::Step(step) => Some(step),
            ChainEvent::Result(_) => None,
        }
    }
}
