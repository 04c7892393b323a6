//! Error attribution.
//!
//! Classifies failed traces into `context_bug` (the engine consulted the
//! wrong context: store, mode, lifecycle filter, or ranking), `model_bug`
//! (right context, wrong downstream output), or `system_error` (timeout,
//! panic, storage failure). Aggregate statistics run over a configurable
//! window of the trace store.

use std::sync::LazyLock;

use chrono::{Duration, Utc};
use regex::Regex;

use crate::memory::{QueryTrace, TraceErrorKind};
use crate::modes::Mode;
use crate::storage::MetaStore;

/// Queries that should touch the KV store (preferences, settings, keys)
static KV_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:remember|preference|preferences|setting|settings|config|configuration|key|value)\b")
        .unwrap()
});

/// Probability-theory markers that should have detected a non-execution mode
static PROBABILITY_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:probability|probabilities|likelihood|likely|odds|chance|bayes|bayesian|posterior)\b")
        .unwrap()
});

static SYSTEM_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:timeout|timed out|panic|panicked|storage|lock|i/o|migration)\b").unwrap()
});

/// Attribution verdict for one trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionVerdict {
    pub kind: TraceErrorKind,
    /// Specific heuristic that fired, e.g. `wrong_store_queried`
    pub detail: String,
}

/// Classify a failed (or suspicious) trace.
pub fn attribute(trace: &QueryTrace) -> AttributionVerdict {
    let query = trace.query.to_lowercase();

    // Context heuristics run first: they catch misrouting even when the
    // surfaced error looks generic
    if KV_FAMILY.is_match(&query) && !trace.stores_queried.iter().any(|s| s == "kv") {
        return AttributionVerdict {
            kind: TraceErrorKind::ContextBug,
            detail: "wrong_store_queried".to_string(),
        };
    }
    if PROBABILITY_MARKERS.is_match(&query) && trace.mode == Mode::Execution {
        return AttributionVerdict {
            kind: TraceErrorKind::ContextBug,
            detail: "wrong_mode_detected".to_string(),
        };
    }

    if let Some(error) = &trace.error {
        if SYSTEM_MARKERS.is_match(error) {
            return AttributionVerdict {
                kind: TraceErrorKind::SystemError,
                detail: "system_failure".to_string(),
            };
        }
    }

    // Verification recorded a wrong answer with no context misstep
    if trace
        .verification
        .as_ref()
        .and_then(|v| v.get("passed"))
        .and_then(|p| p.as_bool())
        == Some(false)
    {
        return AttributionVerdict {
            kind: TraceErrorKind::ModelBug,
            detail: "verified_output_mismatch".to_string(),
        };
    }

    if trace.error.is_some() {
        return AttributionVerdict {
            kind: TraceErrorKind::SystemError,
            detail: "unclassified_error".to_string(),
        };
    }

    AttributionVerdict {
        kind: TraceErrorKind::ModelBug,
        detail: "no_context_fault_found".to_string(),
    }
}

/// Aggregate statistics over a window
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AttributionStats {
    pub window_days: i64,
    pub traces_seen: usize,
    pub errored: usize,
    pub context_bugs: usize,
    pub model_bugs: usize,
    pub system_errors: usize,
    pub wrong_store_queried: usize,
    pub wrong_mode_detected: usize,
}

/// Classify every errored trace inside the window.
pub fn attribution_stats(meta: &MetaStore, window_days: i64) -> crate::error::Result<AttributionStats> {
    let since = Utc::now() - Duration::days(window_days);
    let traces = meta.traces_since(since)?;

    let mut stats = AttributionStats {
        window_days,
        traces_seen: traces.len(),
        ..AttributionStats::default()
    };

    for trace in &traces {
        if trace.error.is_none() {
            continue;
        }
        stats.errored += 1;
        let verdict = attribute(trace);
        match verdict.kind {
            TraceErrorKind::ContextBug => {
                stats.context_bugs += 1;
                match verdict.detail.as_str() {
                    "wrong_store_queried" => stats.wrong_store_queried += 1,
                    "wrong_mode_detected" => stats.wrong_mode_detected += 1,
                    _ => {}
                }
            }
            TraceErrorKind::ModelBug => stats.model_bugs += 1,
            TraceErrorKind::SystemError => stats.system_errors += 1,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_trace(query: &str) -> QueryTrace {
        let mut trace = QueryTrace::begin(query, None);
        trace.error = Some("something went wrong".to_string());
        trace.stores_queried = vec!["vector".to_string(), "graph".to_string()];
        trace
    }

    #[test]
    fn test_kv_query_routed_away_is_context_bug() {
        let trace = failed_trace("what setting did I remember for the editor");
        let verdict = attribute(&trace);
        assert_eq!(verdict.kind, TraceErrorKind::ContextBug);
        assert_eq!(verdict.detail, "wrong_store_queried");
    }

    #[test]
    fn test_kv_query_routed_to_kv_is_not_context_bug() {
        let mut trace = failed_trace("what setting did I remember for the editor");
        trace.stores_queried.push("kv".to_string());
        let verdict = attribute(&trace);
        assert_ne!(verdict.detail, "wrong_store_queried");
    }

    #[test]
    fn test_probability_query_in_execution_is_wrong_mode() {
        let mut trace = failed_trace("what is the probability this deploy fails");
        trace.mode = Mode::Execution;
        let verdict = attribute(&trace);
        assert_eq!(verdict.kind, TraceErrorKind::ContextBug);
        assert_eq!(verdict.detail, "wrong_mode_detected");
    }

    #[test]
    fn test_timeout_is_system_error() {
        let mut trace = failed_trace("find the deploy notes");
        trace.error = Some("Timeout after 500ms".to_string());
        let verdict = attribute(&trace);
        assert_eq!(verdict.kind, TraceErrorKind::SystemError);
    }

    #[test]
    fn test_failed_verification_is_model_bug() {
        let mut trace = failed_trace("find the deploy notes");
        trace.error = None;
        trace.verification = Some(serde_json::json!({ "passed": false }));
        let verdict = attribute(&trace);
        assert_eq!(verdict.kind, TraceErrorKind::ModelBug);
    }
}
