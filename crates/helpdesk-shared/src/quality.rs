//! Quality verdict attached to every reply.

use serde::{Deserialize, Serialize};

/// Judge scores; both dimensions are in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetadata {
    pub relevance: f64,
    pub faithfulness: f64,
    pub passed: bool,
}

impl Default for QualityMetadata {
    fn default() -> Self {
        Self::failing()
    }
}

#[derive(Deserialize)]
struct JudgeOutput {
    relevance: Option<f64>,
    faithfulness: Option<f64>,
    #[serde(rename = "pass")]
    passed: Option<bool>,
}

impl QualityMetadata {
    /// Verdict for replies that are not subject to grounding
    pub fn passing() -> Self {
        Self {
            relevance: 1.0,
            faithfulness: 1.0,
            passed: true,
        }
    }

    /// Fail-closed verdict
    pub fn failing() -> Self {
        Self {
            relevance: 0.0,
            faithfulness: 0.0,
            passed: false,
        }
    }

    /// Parse judge JSON `{"relevance": f, "faithfulness": f, "pass": b}`.
    ///
    /// Unreadable output never passes. Missing fields take the failing value,
    /// scores are clamped to `[0, 1]`.
    pub fn parse_verdict(raw: &str) -> Self {
        let Ok(out) = serde_json::from_str::<JudgeOutput>(raw) else {
            return Self::failing();
        };
        Self {
            relevance: clamp_score(out.relevance),
            faithfulness: clamp_score(out.faithfulness),
            passed: out.passed.unwrap_or(false),
        }
    }
}

fn clamp_score(score: Option<f64>) -> f64 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_verdict() {
        let q = QualityMetadata::parse_verdict(r#"{"relevance":0.9,"faithfulness":0.7,"pass":true}"#);
        assert_eq!(q.relevance, 0.9);
        assert_eq!(q.faithfulness, 0.7);
        assert!(q.passed);
    }

    #[test]
    fn test_unparseable_verdict_fails_closed() {
        assert_eq!(QualityMetadata::parse_verdict("I think it's fine"), QualityMetadata::failing());
    }

    #[test]
    fn test_missing_pass_is_not_passing() {
        let q = QualityMetadata::parse_verdict(r#"{"relevance":1.0,"faithfulness":1.0}"#);
        assert!(!q.passed);
    }

    #[test]
    fn test_scores_are_clamped() {
        let q = QualityMetadata::parse_verdict(r#"{"relevance":3,"faithfulness":-1,"pass":false}"#);
        assert_eq!(q.relevance, 1.0);
        assert_eq!(q.faithfulness, 0.0);
    }
}
