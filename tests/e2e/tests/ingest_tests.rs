//! Ingestion scenarios: multi-chunk documents, deletion cascade, vault
//! worker, and the ingest/delete round-trip law.

use nexus_core::{IngestOptions, Mode, VaultEvent};
use nexus_e2e_tests::fixtures::TestHarness;

fn three_chunk_document() -> String {
    let mut doc = String::new();
    doc.push_str("# Compiler Notes\n\n");
    for section in ["Lexer", "Parser", "Codegen"] {
        doc.push_str(&format!("## {}\n\n", section));
        for i in 0..40 {
            doc.push_str(&format!(
                "The {} stage handles case {} with Distinct Rules applied carefully. ",
                section, i
            ));
        }
        doc.push_str("\n\n");
    }
    doc
}

#[tokio::test]
async fn multi_chunk_document_lands_in_all_stores() {
    let h = TestHarness::new();
    let doc = three_chunk_document();
    let ids = h.ingest_file("compiler.md", &doc);
    assert!(ids.len() >= 3, "expected several chunks, got {}", ids.len());

    for id in &ids {
        assert!(h.service.meta().get_chunk(id).unwrap().is_some());
        assert!(h.service.vector().read().unwrap().contains(id));
        assert!(h.service.graph().read().unwrap().contains_chunk(id));
    }
}

#[tokio::test]
async fn deleted_source_cascades_through_every_store() {
    let h = TestHarness::new();
    let doc = three_chunk_document();
    let path = h.write_vault_file("compiler.md", &doc);
    let ids = h
        .service
        .ingest_document(&path, &doc, &IngestOptions::default())
        .unwrap()
        .chunk_ids;

    let removed = h.service.delete_source(&path).unwrap();
    assert_eq!(removed, ids.len());

    // Queries return nothing from that source afterwards
    let result = h
        .service
        .search("lexer stage distinct rules", Some(Mode::Brainstorming), None)
        .await
        .unwrap();
    assert!(result
        .core
        .iter()
        .chain(result.extended.iter())
        .all(|r| r.source_path != path));

    // No orphan entities whose only mentions pointed at removed chunks
    assert!(h.service.graph().read().unwrap().orphan_entities().is_empty());
}

#[tokio::test]
async fn ingest_worker_consumes_vault_events() {
    let h = TestHarness::new();
    let doc = "Python notes delivered through the vault watcher interface.";
    let path = h.write_vault_file("watched.md", doc);

    let (events, worker) = h.service.start_ingest_worker();
    events
        .send(VaultEvent::Created(path.clone().into()))
        .await
        .unwrap();
    drop(events);
    worker.await.unwrap();

    let ids = h.service.meta().chunk_ids_by_path(&path).unwrap();
    assert_eq!(ids.len(), 1);

    // A deleted event for the same path cascades the removal
    let (events, worker) = h.service.start_ingest_worker();
    events
        .send(VaultEvent::Deleted(path.clone().into()))
        .await
        .unwrap();
    drop(events);
    worker.await.unwrap();

    assert!(h.service.meta().chunk_ids_by_path(&path).unwrap().is_empty());
}

#[tokio::test]
async fn reingest_on_modify_replaces_old_chunks() {
    let h = TestHarness::new();
    let path = h.write_vault_file("evolving.md", "Original body of the note.");
    let first = h
        .service
        .ingest_document(&path, "Original body of the note.", &IngestOptions::default())
        .unwrap()
        .chunk_ids;

    std::fs::write(&path, "Rewritten body of the note.").unwrap();
    let (events, worker) = h.service.start_ingest_worker();
    events
        .send(VaultEvent::Modified(path.clone().into()))
        .await
        .unwrap();
    drop(events);
    worker.await.unwrap();

    for id in &first {
        assert!(h.service.meta().get_chunk(id).unwrap().is_none());
    }
    let ids = h.service.meta().chunk_ids_by_path(&path).unwrap();
    assert_eq!(ids.len(), 1);
    assert!(h
        .service
        .meta()
        .get_chunk(&ids[0])
        .unwrap()
        .unwrap()
        .text
        .contains("Rewritten"));
}

#[tokio::test]
async fn ingest_records_envelope_and_event() {
    let h = TestHarness::new();
    h.service
        .store_text(
            "Envelope carrying note about Rust Lifetimes.",
            &IngestOptions {
                intent: nexus_core::IntentCategory::Research,
                ..IngestOptions::default()
            },
        )
        .unwrap();

    let events = h
        .service
        .meta()
        .events_of_kind(nexus_core::EventKind::Ingest, 5)
        .unwrap();
    assert_eq!(events.len(), 1);

    let snapshot = h.service.meta().lifecycle_snapshot().unwrap();
    let chunk = h.service.meta().get_chunk(&snapshot[0].id).unwrap().unwrap();
    assert_eq!(chunk.envelope.intent, nexus_core::IntentCategory::Research);
    assert!(!chunk.envelope.project.is_empty());
}
