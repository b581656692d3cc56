//! Feedback attribution for generated replies.
//!
//! Generation hands back an opaque tracker; the chain files it under the
//! reply's `response_id`. A later feedback call pops it and reports through it.

use helpdesk_shared::FeedbackKind;
use std::sync::Mutex;
use tracing::{info, info_span};

use crate::metrics::ChainMetrics;
use crate::store::TrackerStore;

/// Handle that attributes user feedback to one generation call
pub trait FeedbackTracker: Send + Sync {
    fn track_feedback(&self, kind: FeedbackKind);
}

/// Look up and consume the tracker for `response_id`, reporting `kind` through it.
///
/// Returns `false` when there is nothing to attach feedback to (unknown,
/// expired or already used id). That is an ordinary outcome, not an error.
pub async fn submit_feedback(
    trackers: &TrackerStore,
    metrics: &ChainMetrics,
    response_id: &str,
    kind: FeedbackKind,
) -> bool {
    let Some(tracker) = trackers.take(response_id).await else {
        info!("[F]  No tracker for response {}", response_id);
        return false;
    };

    let span = info_span!(
        "helpdesk.feedback",
        response.id = %response_id,
        feedback.kind = %kind
    );
    span.in_scope(|| tracker.track_feedback(kind));
    metrics.record_feedback(kind);
    info!("[F]  {} feedback tracked for response {}", kind, response_id);
    true
}

/// Tracker that remembers what it was told; used by fakes and tests
#[derive(Debug, Default)]
pub struct RecordingTracker {
    received: Mutex<Vec<FeedbackKind>>,
}

impl RecordingTracker {
    pub fn received(&self) -> Vec<FeedbackKind> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl FeedbackTracker for RecordingTracker {
    fn track_feedback(&self, kind: FeedbackKind) {
        if let Ok(mut received) = self.received.lock() {
            received.push(kind);
        }
    }
}
