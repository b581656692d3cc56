//! In-memory stores shared across chain runs.

pub mod session;
pub mod tracker;
pub mod ttl_cache;

pub use session::{SessionStore, DEFAULT_MAX_TURNS};
pub use tracker::TrackerStore;
pub use ttl_cache::TtlCache;
