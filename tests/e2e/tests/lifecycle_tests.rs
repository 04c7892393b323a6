//! Lifecycle scenarios: demotion, archival, rehydration, exemptions.

use chrono::Duration;
use nexus_core::{LifecycleStage, Mode};
use nexus_e2e_tests::fixtures::TestHarness;

const DOC: &str = "Python and Machine Learning pipelines transform raw data into models.";

#[tokio::test]
async fn idle_chunk_demotes_then_archives() {
    let h = TestHarness::new();
    let ids = h.ingest_file("pipelines.md", DOC);
    let id = &ids[0];

    // Day 8: demoted, halved score multiplier, still searchable
    h.clock.advance(Duration::days(8));
    let report = h.service.tick().unwrap();
    assert_eq!(report.demoted, 1);

    let chunk = h.service.meta().get_chunk(id).unwrap().unwrap();
    assert_eq!(chunk.stage, LifecycleStage::Demoted);
    assert_eq!(chunk.score_multiplier(), 0.5);
    assert!(h.service.vector().read().unwrap().contains(id));

    // Day 38: archived, out of the vector index, summary in the KV store
    h.clock.advance(Duration::days(30));
    let report = h.service.tick().unwrap();
    assert_eq!(report.archived, 1);

    let chunk = h.service.meta().get_chunk(id).unwrap().unwrap();
    assert_eq!(chunk.stage, LifecycleStage::Archived);
    assert!(!h.service.vector().read().unwrap().contains(id));
    let summary = h
        .service
        .meta()
        .kv_get(&format!("archived:{}", id))
        .unwrap();
    assert!(summary.is_some());
    assert!(h
        .service
        .meta()
        .kv_get(&format!("archived:{}:path", id))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn matching_query_rehydrates_archived_chunk() {
    let h = TestHarness::new();
    let ids = h.ingest_file("pipelines.md", DOC);
    let id = &ids[0];

    h.clock.advance(Duration::days(40));
    h.service.tick().unwrap();
    assert_eq!(
        h.service.meta().get_chunk(id).unwrap().unwrap().stage,
        LifecycleStage::Archived
    );

    // A query matching the summary restores the chunk to active
    let result = h
        .service
        .search(DOC, Some(Mode::Execution), None)
        .await
        .unwrap();
    assert!(!result.core.is_empty());
    let restored = &result.core[0];
    assert_eq!(restored.text, DOC);

    let chunk = h
        .service
        .meta()
        .get_chunk(&restored.chunk_id)
        .unwrap()
        .unwrap();
    assert_eq!(chunk.stage, LifecycleStage::Active);
    assert!(h
        .service
        .vector()
        .read()
        .unwrap()
        .contains(&restored.chunk_id));

    // Archival keys removed; rehydrate event on the log
    assert!(h
        .service
        .meta()
        .kv_get(&format!("archived:{}", id))
        .unwrap()
        .is_none());
    let events = h
        .service
        .meta()
        .events_of_kind(nexus_core::EventKind::Rehydrate, 5)
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["chunk_id"], serde_json::json!(id));
}

#[tokio::test]
async fn rehydratable_chunk_restores_from_source() {
    let h = TestHarness::new();
    let ids = h.ingest_file("pipelines.md", DOC);
    let id = &ids[0];

    // Past the long-term horizon: summary text dropped, path retained
    h.clock.advance(Duration::days(100));
    h.service.tick().unwrap();
    assert_eq!(
        h.service.meta().get_chunk(id).unwrap().unwrap().stage,
        LifecycleStage::Rehydratable
    );

    let result = h.service.search(DOC, Some(Mode::Execution), None).await.unwrap();
    assert!(!result.core.is_empty());
    assert_eq!(result.core[0].text, DOC);
    assert_eq!(
        h.service
            .meta()
            .get_chunk(&result.core[0].chunk_id)
            .unwrap()
            .unwrap()
            .stage,
        LifecycleStage::Active
    );
}

#[tokio::test]
async fn accessed_chunk_stays_active() {
    let h = TestHarness::new();
    let ids = h.ingest_file("pipelines.md", DOC);

    // Touch it every few days; it never goes idle long enough to demote
    for _ in 0..5 {
        h.clock.advance(Duration::days(5));
        h.service.lifecycle().on_query_hit(&ids[0]).unwrap();
        h.service.tick().unwrap();
    }

    let chunk = h.service.meta().get_chunk(&ids[0]).unwrap().unwrap();
    assert_eq!(chunk.stage, LifecycleStage::Active);
    assert_eq!(chunk.access_count, 5);
}

#[tokio::test]
async fn personal_chunks_never_decay() {
    let h = TestHarness::new();
    let doc = "---\nlifecycle: personal\n---\nPersonal journal entry kept verbatim forever.";
    let ids = h.ingest_file("journal.md", doc);

    h.clock.advance(Duration::days(400));
    let report = h.service.tick().unwrap();
    assert_eq!(report.demoted, 0);
    assert_eq!(report.archived, 0);

    let chunk = h.service.meta().get_chunk(&ids[0]).unwrap().unwrap();
    assert_eq!(chunk.stage, LifecycleStage::Active);
}
