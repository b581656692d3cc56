//! Chain orchestration: the pipeline state machine and its event stream.

pub mod pipeline;
pub mod streaming;

use std::sync::Arc;

use crate::metrics::ChainMetrics;
use crate::spans::SpanCollaborators;
use crate::store::{SessionStore, TrackerStore};

pub use pipeline::{execute_chain, run_chain};
pub use streaming::{ChainEventStream, ChannelEmitter, NoopEmitter, StepEmitter};

/// Everything a chain run needs, shared across runs
#[derive(Clone)]
pub struct ChainDeps {
    pub spans: Arc<dyn SpanCollaborators>,
    pub sessions: SessionStore,
    pub trackers: TrackerStore,
    pub metrics: ChainMetrics,
}

impl ChainDeps {
    pub fn new(
        spans: Arc<dyn SpanCollaborators>,
        sessions: SessionStore,
        trackers: TrackerStore,
        metrics: ChainMetrics,
    ) -> Self {
        Self {
            spans,
            sessions,
            trackers,
            metrics,
        }
    }

    /// Default-sized stores and a fresh metrics registry
    pub fn with_defaults(spans: Arc<dyn SpanCollaborators>) -> Result<Self, prometheus::Error> {
        Ok(Self::new(
            spans,
            SessionStore::default(),
            TrackerStore::default(),
            ChainMetrics::new()?,
        ))
    }
}
