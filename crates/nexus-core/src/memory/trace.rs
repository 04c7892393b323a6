//! Query trace record.
//!
//! One trace per request, always produced, retained for 30 days.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modes::Mode;

/// Error family recorded on a failed trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceErrorKind {
    /// Wrong store queried, wrong mode detected, wrong lifecycle filter,
    /// or a ranking regression
    ContextBug,
    /// Correct context, incorrect downstream output
    ModelBug,
    /// Timeout, panic, or storage failure
    SystemError,
}

impl TraceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceErrorKind::ContextBug => "context_bug",
            TraceErrorKind::ModelBug => "model_bug",
            TraceErrorKind::SystemError => "system_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context_bug" => Some(TraceErrorKind::ContextBug),
            "model_bug" => Some(TraceErrorKind::ModelBug),
            "system_error" => Some(TraceErrorKind::SystemError),
            _ => None,
        }
    }
}

/// One retrieved chunk reference inside a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRef {
    pub chunk_id: String,
    pub score: f32,
    pub source: String,
}

/// Structured record of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTrace {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub user_context: Option<String>,
    pub mode: Mode,
    pub mode_confidence: f32,
    pub mode_detection_ms: f64,
    /// Stores consulted for this request ("vector", "graph", "bayesian", "kv")
    pub stores_queried: Vec<String>,
    pub routing_rationale: String,
    pub retrieved: Vec<RetrievedRef>,
    pub retrieval_ms: f64,
    pub verification: Option<serde_json::Value>,
    pub output: String,
    pub total_ms: f64,
    pub error: Option<String>,
    pub error_kind: Option<TraceErrorKind>,
    /// Set when a deadline expired and the response carries partial results
    pub partial: bool,
}

impl QueryTrace {
    /// Start a trace for a fresh request.
    pub fn begin(query: &str, user_context: Option<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            query: query.to_string(),
            user_context,
            mode: Mode::Execution,
            mode_confidence: 0.0,
            mode_detection_ms: 0.0,
            stores_queried: Vec::new(),
            routing_rationale: String::new(),
            retrieved: Vec::new(),
            retrieval_ms: 0.0,
            verification: None,
            output: String::new(),
            total_ms: 0.0,
            error: None,
            error_kind: None,
            partial: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_ids_unique() {
        let a = QueryTrace::begin("q", None);
        let b = QueryTrace::begin("q", None);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            TraceErrorKind::ContextBug,
            TraceErrorKind::ModelBug,
            TraceErrorKind::SystemError,
        ] {
            assert_eq!(TraceErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TraceErrorKind::parse("other"), None);
    }
}
