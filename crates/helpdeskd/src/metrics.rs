//! Prometheus metrics for chain runs and feedback.

use helpdesk_shared::{ChainStep, FeedbackKind, RouteKind};
use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec,
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Chain metrics for Prometheus
#[derive(Clone)]
pub struct ChainMetrics {
    pub runs_total: IntCounterVec,
    pub failures_total: IntCounterVec,
    pub active_runs: IntGauge,
    pub step_duration_seconds: HistogramVec,
    pub feedback_total: IntCounterVec,
    pub model_tokens_total: CounterVec,

    registry: Arc<Registry>,
}

impl ChainMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = register_int_counter_vec_with_registry!(
            "helpdesk_chain_runs_total",
            "Total number of completed chain runs by route",
            &["route"],
            registry
        )?;

        let failures_total = register_int_counter_vec_with_registry!(
            "helpdesk_chain_failures_total",
            "Total number of chain runs aborted by a hard failure, by error kind",
            &["kind"],
            registry
        )?;

        let active_runs = register_int_gauge_with_registry!(
            "helpdesk_chain_active_runs",
            "Chain runs currently in flight",
            registry
        )?;

        let step_duration_seconds = register_histogram_vec_with_registry!(
            "helpdesk_chain_step_duration_seconds",
            "Wall time of each chain step in seconds",
            &["step"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            registry
        )?;

        let feedback_total = register_int_counter_vec_with_registry!(
            "helpdesk_feedback_total",
            "Feedback submissions attached to a generation, by kind",
            &["kind"],
            registry
        )?;

        let model_tokens_total = register_counter_vec_with_registry!(
            "helpdesk_model_tokens_total",
            "Tokens reported by the model endpoint, by flag key and direction",
            &["config_key", "direction"],
            registry
        )?;

        Ok(Self {
            runs_total,
            failures_total,
            active_runs,
            step_duration_seconds,
            feedback_total,
            model_tokens_total,
            registry: Arc::new(registry),
        })
    }

    pub fn record_run(&self, route: RouteKind) {
        self.runs_total.with_label_values(&[&route.to_string()]).inc();
    }

    pub fn record_failure(&self, kind: &str) {
        self.failures_total.with_label_values(&[kind]).inc();
    }

    pub fn record_step(&self, step: ChainStep, elapsed: Duration) {
        self.step_duration_seconds
            .with_label_values(&[step.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_feedback(&self, kind: FeedbackKind) {
        self.feedback_total.with_label_values(&[&kind.to_string()]).inc();
    }

    pub fn record_tokens(&self, config_key: &str, prompt: u64, completion: u64) {
        self.model_tokens_total
            .with_label_values(&[config_key, "prompt"])
            .inc_by(prompt as f64);
        self.model_tokens_total
            .with_label_values(&[config_key, "completion"])
            .inc_by(completion as f64);
    }

    /// Text exposition of all metrics
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
