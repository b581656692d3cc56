//! Feedback tracker bound to one live generation call.

use chrono::{DateTime, Utc};
use helpdesk_shared::FeedbackKind;
use std::time::Duration;
use tracing::info;

use crate::feedback::FeedbackTracker;
use crate::openai::Completion;

/// Remembers which model produced a reply so feedback can be attributed to it
#[derive(Debug, Clone)]
pub struct ModelTracker {
    pub config_key: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration: Duration,
    pub generated_at: DateTime<Utc>,
}

impl ModelTracker {
    pub fn from_completion(config_key: &str, completion: &Completion) -> Self {
        Self {
            config_key: config_key.to_string(),
            model: completion.model.clone(),
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            duration: completion.duration,
            generated_at: Utc::now(),
        }
    }
}

impl FeedbackTracker for ModelTracker {
    fn track_feedback(&self, kind: FeedbackKind) {
        let age = Utc::now().signed_duration_since(self.generated_at);
        info!(
            feedback.kind = %kind,
            config.key = %self.config_key,
            model = %self.model,
            tokens.prompt = self.prompt_tokens,
            tokens.completion = self.completion_tokens,
            generation_ms = self.duration.as_millis() as u64,
            age_secs = age.num_seconds(),
            "Generation feedback"
        );
    }
}
