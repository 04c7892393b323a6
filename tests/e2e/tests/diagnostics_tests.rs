//! Diagnostics scenarios: always-on tracing, deterministic replay, and
//! error attribution over the trace store.

use nexus_core::{IngestOptions, Mode, QueryTrace, TraceErrorKind};
use nexus_e2e_tests::fixtures::TestHarness;

#[tokio::test]
async fn every_request_writes_a_trace() {
    let h = TestHarness::new();
    h.service
        .store_text("Trace coverage note about Python.", &IngestOptions::default())
        .unwrap();

    let result = h.service.search("python", None, None).await.unwrap();
    let trace = h.service.get_trace(&result.trace_id).unwrap().unwrap();
    assert_eq!(trace.query, "python");
    assert!(!trace.stores_queried.is_empty());
    assert!(!trace.retrieved.is_empty());
    assert!(trace.total_ms >= trace.retrieval_ms + trace.mode_detection_ms);
}

#[tokio::test]
async fn replay_of_unchanged_index_is_byte_identical() {
    let h = TestHarness::new();
    h.service
        .store_text(
            "Replay determinism note about Machine Learning.",
            &IngestOptions::default(),
        )
        .unwrap();

    let original = h
        .service
        .search("machine learning note", Some(Mode::Execution), None)
        .await
        .unwrap();

    let report = h.service.replay(&original.trace_id).await.unwrap();
    assert!(report.diff.identical_output, "replay must not drift");
    assert!(!report.diff.mode_changed);
    assert!(report.diff.added.is_empty());
    assert!(report.diff.removed.is_empty());
    // The replay run wrote its own trace
    assert_ne!(report.new_trace.trace_id, report.original.trace_id);
}

#[tokio::test]
async fn replay_unknown_trace_errors() {
    let h = TestHarness::new();
    let err = h.service.replay("no-such-trace").await.unwrap_err();
    assert_eq!(err.kind(), "routing_error");
}

#[tokio::test]
async fn attribution_flags_misrouted_kv_queries() {
    let h = TestHarness::new();
    // A failed trace whose query is KV-family but never touched the KV store
    let mut trace = QueryTrace::begin("what setting did I configure for tabs", None);
    trace.stores_queried = vec!["vector".to_string()];
    trace.error = Some("wrong answer".to_string());
    h.service.meta().insert_trace(&trace).unwrap();

    let stats = h.service.attribution_stats(7).unwrap();
    assert_eq!(stats.errored, 1);
    assert_eq!(stats.context_bugs, 1);
    assert_eq!(stats.wrong_store_queried, 1);
}

#[tokio::test]
async fn attribution_separates_system_errors() {
    let h = TestHarness::new();
    let mut timeout_trace = QueryTrace::begin("find the deploy notes", None);
    timeout_trace.stores_queried = vec!["vector".to_string()];
    timeout_trace.error = Some("Timeout after 500ms".to_string());
    timeout_trace.error_kind = Some(TraceErrorKind::SystemError);
    h.service.meta().insert_trace(&timeout_trace).unwrap();

    let stats = h.service.attribution_stats(7).unwrap();
    assert_eq!(stats.system_errors, 1);
    assert_eq!(stats.context_bugs, 0);
}

#[tokio::test]
async fn degraded_tier_noted_in_events() {
    let h = TestHarness::new();
    // Nothing ingested: the graph tier reports no entities, the vector
    // index is empty, yet the request still completes with a trace
    let result = h
        .service
        .search("anything at all", Some(Mode::Execution), None)
        .await
        .unwrap();
    assert!(result.core.is_empty());
    assert!(h.service.get_trace(&result.trace_id).unwrap().is_some());
}
