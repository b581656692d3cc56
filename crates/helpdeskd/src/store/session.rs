//! Conversation history keyed by session id.

use helpdesk_shared::ChatTurn;
use std::time::Duration;
use tracing::debug;

use super::ttl_cache::TtlCache;

/// Turns of history kept per session unless configured otherwise
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Process-wide session history store.
///
/// Sessions are created lazily and expire after `ttl` without a write, or
/// when evicted as least recently used. Each session keeps at most
/// `max_turns` turns; older ones are dropped on append.
#[derive(Clone)]
pub struct SessionStore {
    sessions: TtlCache<Vec<ChatTurn>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            sessions: TtlCache::new(capacity, ttl),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Cap per-session history; never below one user/assistant pair
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(2);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Ordered history for a session, empty if unseen
    pub async fn get(&self, session_id: &str) -> Vec<ChatTurn> {
        self.sessions.get(session_id).await.unwrap_or_default()
    }

    /// Append turns in order as one atomic write
    pub async fn append(&self, session_id: &str, turns: impl IntoIterator<Item = ChatTurn>) {
        let turns: Vec<ChatTurn> = turns.into_iter().collect();
        let added = turns.len();
        let max_turns = self.max_turns;
        self.sessions
            .upsert(session_id, Vec::new, move |history| {
                history.extend(turns);
                if history.len() > max_turns {
                    let excess = history.len() - max_turns;
                    history.drain(..excess);
                }
            })
            .await;
        debug!("Session {}: appended {} turns", session_id, added);
    }

    pub async fn len(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn prune_expired(&self) -> usize {
        self.sessions.prune_expired().await
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        // Default: 10,000 sessions, 24 hour idle TTL
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}
