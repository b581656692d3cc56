//! Shared types for the helpdesk daemon and its clients.
//!
//! Chat request/response shapes, the route decision, pipeline progress events
//! and the error taxonomy live here so every component agrees on the wire format.

pub mod chat;
pub mod error;
pub mod intent;
pub mod progress;
pub mod quality;
pub mod route;

pub use chat::{
    ChatRequest, ChatResponse, ChatTurn, Document, ErrorResponse, FeedbackKind, FeedbackRequest,
    FeedbackResponse, HealthResponse, Role, Source, DEFAULT_SESSION_ID,
};
pub use error::ChainError;
pub use intent::{parse_search_query, IntentResult};
pub use progress::{ChainEvent, ChainStep, StepDetail, StepEvent, StepStatus};
pub use quality::QualityMetadata;
pub use route::{RouteDecision, RouteKind};

/// Version of the shared crate, used in health reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
