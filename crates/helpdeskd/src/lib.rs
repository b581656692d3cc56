//! helpdesk daemon library - exposes modules for testing.

pub mod config;
pub mod feedback;
pub mod flags;
pub mod metrics;
pub mod openai;
pub mod orchestrator;
pub mod routes;
pub mod server;
pub mod spans;
pub mod store;
pub mod trace;
