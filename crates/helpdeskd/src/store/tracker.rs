//! Correlation of response ids with feedback trackers.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::ttl_cache::TtlCache;
use crate::feedback::FeedbackTracker;

/// Maps a minted `response_id` to the tracker returned by generation.
///
/// Each entry is consumed at most once.
#[derive(Clone)]
pub struct TrackerStore {
    trackers: TtlCache<Arc<dyn FeedbackTracker>>,
}

impl TrackerStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            trackers: TtlCache::new(capacity, ttl),
        }
    }

    pub async fn put(&self, response_id: &str, tracker: Arc<dyn FeedbackTracker>) {
        self.trackers.put(response_id, tracker).await;
        debug!("Tracker registered for response {}", response_id);
    }

    /// Pop the tracker for `response_id`; `None` if unknown, expired or already taken
    pub async fn take(&self, response_id: &str) -> Option<Arc<dyn FeedbackTracker>> {
        self.trackers.take(response_id).await
    }

    pub async fn len(&self) -> usize {
        self.trackers.len().await
    }

    pub async fn prune_expired(&self) -> usize {
        self.trackers.prune_expired().await
    }
}

impl Default for TrackerStore {
    fn default() -> Self {
        // Default: 10,000 trackers, 1 hour TTL
        Self::new(10_000, Duration::from_secs(60 * 60))
    }
}
