//! Retrieval micro-benchmarks: hashed embedding, PPR over a synthetic
//! entity graph, and mode detection.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nexus_core::{
    personalized_pagerank, Entity, EntityType, GraphStore, ModeDetector, PprParams,
};

fn build_graph(entities: usize) -> GraphStore {
    let mut graph = GraphStore::in_memory(entities * 2);
    for i in 0..entities {
        graph
            .add_entity(&Entity::new(&format!("Entity {}", i), EntityType::Concept))
            .unwrap();
    }
    for i in 0..entities.saturating_sub(1) {
        graph
            .add_related(&format!("entity_{}", i), &format!("entity_{}", i + 1), 0.5)
            .unwrap();
    }
    for i in 0..entities {
        graph
            .add_mention(&format!("chunk-{}", i), &format!("entity_{}", i), 1)
            .unwrap();
    }
    graph
}

fn bench_ppr(c: &mut Criterion) {
    let graph = build_graph(500);
    let seeds = vec!["entity_0".to_string(), "entity_250".to_string()];
    let params = PprParams::default();

    c.bench_function("ppr_500_entities", |b| {
        b.iter(|| personalized_pagerank(black_box(&graph), black_box(&seeds), &params))
    });
}

fn bench_embedding(c: &mut Criterion) {
    let service = nexus_core::EmbeddingService::deterministic();
    let text = "Personalized PageRank aggregates entity mass onto mentioning chunks \
                after multi-hop seed expansion across the co-occurrence graph";

    c.bench_function("hashed_embed", |b| {
        b.iter(|| service.embed(black_box(text)).unwrap())
    });
}

fn bench_mode_detection(c: &mut Criterion) {
    let detector = ModeDetector::new();

    c.bench_function("detect_mode", |b| {
        b.iter(|| detector.detect(black_box("what is the best way to plan this migration")))
    });
}

criterion_group!(benches, bench_ppr, bench_embedding, bench_mode_detection);
criterion_main!(benches);
