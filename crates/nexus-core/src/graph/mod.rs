//! Entity/chunk graph store.
//!
//! Directed graph over chunk and entity nodes with four edge kinds:
//! `mentions` (chunk -> entity), `references` (chunk -> chunk),
//! `similar_to` and `related_to` (entity <-> entity, stored as a directed
//! edge in each direction). Node count is bounded by a configurable cap;
//! when full, the lowest-frequency entity is pruned to make room.
//!
//! Persistence is a node-link JSON snapshot plus an incremental JSONL
//! write-ahead log. Load replays the WAL over the snapshot; compaction
//! rewrites the snapshot and truncates the WAL.

mod extract;
mod ppr;

pub use extract::EntityExtractor;
pub use ppr::{personalized_pagerank, ppr_with_fallback, PprOutcome, PprParams};

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::memory::{Entity, EntityType};

/// WAL compaction threshold in appended operations
const WAL_COMPACT_THRESHOLD: usize = 4096;

/// A node: either an indexed chunk or a named entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    Chunk { id: String },
    Entity(Entity),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Chunk { id } => id,
            GraphNode::Entity(e) => &e.id,
        }
    }
}

/// Edge kinds with their payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphEdge {
    /// chunk -> entity, with mention count
    Mentions { count: u32 },
    /// chunk -> chunk
    References,
    /// entity <-> entity synonym (one directed edge per direction)
    SimilarTo,
    /// entity <-> entity with co-occurrence strength
    RelatedTo { strength: f32 },
}

impl GraphEdge {
    /// Walk weight used by PPR.
    pub fn weight(&self) -> f64 {
        match self {
            GraphEdge::Mentions { count } => *count as f64,
            GraphEdge::References => 1.0,
            GraphEdge::SimilarTo => 1.0,
            GraphEdge::RelatedTo { strength } => *strength as f64,
        }
    }
}

/// One mutation, as appended to the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum GraphOp {
    AddChunk { id: String },
    AddEntity { entity: Entity },
    AddMention { chunk: String, entity: String, count: u32 },
    AddReference { from: String, to: String },
    AddSimilar { a: String, b: String },
    AddRelated { a: String, b: String, strength: f32 },
    RemoveChunk { id: String },
    RemoveEntity { id: String },
}

/// Node-link snapshot document
#[derive(Serialize, Deserialize)]
struct NodeLinkDocument {
    nodes: Vec<GraphNode>,
    links: Vec<NodeLinkEdge>,
}

#[derive(Serialize, Deserialize)]
struct NodeLinkEdge {
    source: String,
    target: String,
    #[serde(flatten)]
    edge: GraphEdge,
}

/// Subgraph returned by bounded BFS (the `graph_query` tool).
#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<SubgraphEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubgraphEdge {
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// The graph store
pub struct GraphStore {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    chunk_nodes: HashMap<String, NodeIndex>,
    entity_nodes: HashMap<String, NodeIndex>,
    max_nodes: usize,
    /// Paths for persistence; in-memory stores have neither
    snapshot_path: Option<PathBuf>,
    wal_path: Option<PathBuf>,
    wal_ops_since_compact: usize,
}

impl GraphStore {
    /// In-memory store (tests, ephemeral sessions).
    pub fn in_memory(max_nodes: usize) -> Self {
        Self {
            graph: StableDiGraph::new(),
            chunk_nodes: HashMap::new(),
            entity_nodes: HashMap::new(),
            max_nodes,
            snapshot_path: None,
            wal_path: None,
            wal_ops_since_compact: 0,
        }
    }

    /// Open a persistent store: load the snapshot, replay the WAL.
    pub fn open(dir: &std::path::Path, max_nodes: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("graph.json");
        let wal_path = dir.join("graph.wal");

        let mut store = Self::in_memory(max_nodes);
        store.snapshot_path = Some(snapshot_path.clone());
        store.wal_path = Some(wal_path.clone());

        if snapshot_path.exists() {
            let text = std::fs::read_to_string(&snapshot_path)?;
            let doc: NodeLinkDocument = serde_json::from_str(&text)
                .map_err(|e| CoreError::Integrity(format!("corrupt graph snapshot: {}", e)))?;
            store.restore_from_document(doc)?;
        }

        if wal_path.exists() {
            let text = std::fs::read_to_string(&wal_path)?;
            let mut replayed = 0usize;
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let op: GraphOp = serde_json::from_str(line)
                    .map_err(|e| CoreError::Integrity(format!("corrupt graph WAL: {}", e)))?;
                store.apply_op(op)?;
                replayed += 1;
            }
            store.wal_ops_since_compact = replayed;
            tracing::debug!(replayed, "graph WAL replayed");
        }

        Ok(store)
    }

    fn restore_from_document(&mut self, doc: NodeLinkDocument) -> Result<()> {
        for node in doc.nodes {
            match node {
                GraphNode::Chunk { id } => {
                    self.ensure_chunk_node(&id);
                }
                GraphNode::Entity(entity) => {
                    self.insert_entity_node(entity)?;
                }
            }
        }
        for link in doc.links {
            let (Some(&source), Some(&target)) = (
                self.node_index(&link.source),
                self.node_index(&link.target),
            ) else {
                return Err(CoreError::Integrity(format!(
                    "snapshot edge references missing node {} -> {}",
                    link.source, link.target
                )));
            };
            self.graph.add_edge(source, target, link.edge);
        }
        Ok(())
    }

    fn node_index(&self, id: &str) -> Option<&NodeIndex> {
        self.chunk_nodes.get(id).or_else(|| self.entity_nodes.get(id))
    }

    fn log_op(&mut self, op: &GraphOp) -> Result<()> {
        let Some(wal_path) = &self.wal_path else {
            return Ok(());
        };
        let line = serde_json::to_string(op)
            .map_err(|e| CoreError::Internal(format!("serialize graph op: {}", e)))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(wal_path)?;
        writeln!(file, "{}", line)?;
        self.wal_ops_since_compact += 1;
        if self.wal_ops_since_compact >= WAL_COMPACT_THRESHOLD {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrite the snapshot and truncate the WAL.
    pub fn compact(&mut self) -> Result<()> {
        let Some(snapshot_path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let doc = self.to_document();
        let text = serde_json::to_string(&doc)
            .map_err(|e| CoreError::Internal(format!("serialize graph snapshot: {}", e)))?;
        let tmp = snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &snapshot_path)?;
        if let Some(wal_path) = &self.wal_path {
            std::fs::write(wal_path, b"")?;
        }
        self.wal_ops_since_compact = 0;
        Ok(())
    }

    fn to_document(&self) -> NodeLinkDocument {
        let nodes = self
            .graph
            .node_indices()
            .map(|i| self.graph[i].clone())
            .collect();
        let links = self
            .graph
            .edge_references()
            .map(|e| NodeLinkEdge {
                source: self.graph[e.source()].id().to_string(),
                target: self.graph[e.target()].id().to_string(),
                edge: e.weight().clone(),
            })
            .collect();
        NodeLinkDocument { nodes, links }
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    fn apply_op(&mut self, op: GraphOp) -> Result<()> {
        match op {
            GraphOp::AddChunk { id } => {
                self.ensure_chunk_node(&id);
                Ok(())
            }
            GraphOp::AddEntity { entity } => self.insert_entity_node(entity).map(|_| ()),
            GraphOp::AddMention { chunk, entity, count } => {
                self.insert_mention(&chunk, &entity, count)
            }
            GraphOp::AddReference { from, to } => self.insert_reference(&from, &to),
            GraphOp::AddSimilar { a, b } => self.insert_similar(&a, &b),
            GraphOp::AddRelated { a, b, strength } => self.insert_related(&a, &b, strength),
            GraphOp::RemoveChunk { id } => {
                self.delete_chunk_node(&id);
                Ok(())
            }
            GraphOp::RemoveEntity { id } => {
                self.delete_entity_node(&id);
                Ok(())
            }
        }
    }

    fn ensure_chunk_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.chunk_nodes.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode::Chunk { id: id.to_string() });
        self.chunk_nodes.insert(id.to_string(), idx);
        idx
    }

    fn insert_entity_node(&mut self, entity: Entity) -> Result<NodeIndex> {
        if let Some(&idx) = self.entity_nodes.get(&entity.id) {
            // Merge: bump frequency, extend aliases
            if let GraphNode::Entity(existing) = &mut self.graph[idx] {
                existing.cooccurrence_frequency += 1;
                for alias in entity.aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
            }
            return Ok(idx);
        }

        if self.graph.node_count() >= self.max_nodes {
            self.prune_lowest_frequency_entity();
        }
        if self.graph.node_count() >= self.max_nodes {
            return Err(CoreError::Storage(format!(
                "graph node cap {} reached",
                self.max_nodes
            )));
        }

        let id = entity.id.clone();
        let idx = self.graph.add_node(GraphNode::Entity(entity));
        self.entity_nodes.insert(id, idx);
        Ok(idx)
    }

    fn prune_lowest_frequency_entity(&mut self) {
        let victim = self
            .entity_nodes
            .iter()
            .filter_map(|(id, &idx)| match &self.graph[idx] {
                GraphNode::Entity(e) => Some((id.clone(), e.cooccurrence_frequency)),
                GraphNode::Chunk { .. } => None,
            })
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if let Some((id, freq)) = victim {
            tracing::warn!(entity = %id, frequency = freq, "graph at node cap, pruning entity");
            self.delete_entity_node(&id);
        }
    }

    /// Register a chunk node.
    pub fn add_chunk(&mut self, id: &str) -> Result<()> {
        self.ensure_chunk_node(id);
        self.log_op(&GraphOp::AddChunk { id: id.to_string() })
    }

    /// Register (or merge) an entity node.
    pub fn add_entity(&mut self, entity: &Entity) -> Result<()> {
        self.insert_entity_node(entity.clone())?;
        self.log_op(&GraphOp::AddEntity { entity: entity.clone() })
    }

    fn insert_mention(&mut self, chunk_id: &str, entity_id: &str, count: u32) -> Result<()> {
        let Some(&entity_idx) = self.entity_nodes.get(entity_id) else {
            // Invariant: every mentions edge points to an existing entity
            return Err(CoreError::Integrity(format!(
                "mentions edge targets unknown entity {}",
                entity_id
            )));
        };
        let chunk_idx = self.ensure_chunk_node(chunk_id);
        if let Some(edge) = self.graph.find_edge(chunk_idx, entity_idx) {
            if let GraphEdge::Mentions { count: existing } = &mut self.graph[edge] {
                *existing += count;
                return Ok(());
            }
        }
        self.graph.add_edge(chunk_idx, entity_idx, GraphEdge::Mentions { count });
        Ok(())
    }

    /// Record that a chunk mentions an entity.
    pub fn add_mention(&mut self, chunk_id: &str, entity_id: &str, count: u32) -> Result<()> {
        self.insert_mention(chunk_id, entity_id, count)?;
        self.log_op(&GraphOp::AddMention {
            chunk: chunk_id.to_string(),
            entity: entity_id.to_string(),
            count,
        })
    }

    fn insert_reference(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = self.ensure_chunk_node(from);
        let to_idx = self.ensure_chunk_node(to);
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, GraphEdge::References);
        }
        Ok(())
    }

    /// chunk -> chunk reference edge.
    pub fn add_reference(&mut self, from: &str, to: &str) -> Result<()> {
        self.insert_reference(from, to)?;
        self.log_op(&GraphOp::AddReference {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    fn entity_pair(&mut self, a: &str, b: &str) -> Result<(NodeIndex, NodeIndex)> {
        let a_idx = *self.entity_nodes.get(a).ok_or_else(|| {
            CoreError::Integrity(format!("edge references unknown entity {}", a))
        })?;
        let b_idx = *self.entity_nodes.get(b).ok_or_else(|| {
            CoreError::Integrity(format!("edge references unknown entity {}", b))
        })?;
        Ok((a_idx, b_idx))
    }

    fn insert_similar(&mut self, a: &str, b: &str) -> Result<()> {
        let (a_idx, b_idx) = self.entity_pair(a, b)?;
        if self.graph.find_edge(a_idx, b_idx).is_none() {
            self.graph.add_edge(a_idx, b_idx, GraphEdge::SimilarTo);
        }
        if self.graph.find_edge(b_idx, a_idx).is_none() {
            self.graph.add_edge(b_idx, a_idx, GraphEdge::SimilarTo);
        }
        Ok(())
    }

    /// Bidirectional synonym edge.
    pub fn add_similar(&mut self, a: &str, b: &str) -> Result<()> {
        self.insert_similar(a, b)?;
        self.log_op(&GraphOp::AddSimilar {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    fn insert_related(&mut self, a: &str, b: &str, strength: f32) -> Result<()> {
        let (a_idx, b_idx) = self.entity_pair(a, b)?;
        for (from, to) in [(a_idx, b_idx), (b_idx, a_idx)] {
            if let Some(edge) = self.graph.find_edge(from, to) {
                if let GraphEdge::RelatedTo { strength: existing } = &mut self.graph[edge] {
                    *existing = (*existing + strength).min(1.0);
                    continue;
                }
            }
            self.graph.add_edge(from, to, GraphEdge::RelatedTo { strength });
        }
        Ok(())
    }

    /// Bidirectional co-occurrence edge; strengths accumulate, capped at 1.
    pub fn add_related(&mut self, a: &str, b: &str, strength: f32) -> Result<()> {
        self.insert_related(a, b, strength)?;
        self.log_op(&GraphOp::AddRelated {
            a: a.to_string(),
            b: b.to_string(),
            strength,
        })
    }

    fn delete_chunk_node(&mut self, id: &str) -> bool {
        if let Some(idx) = self.chunk_nodes.remove(id) {
            self.graph.remove_node(idx);
            true
        } else {
            false
        }
    }

    /// Remove a chunk node and its edges.
    pub fn remove_chunk(&mut self, id: &str) -> Result<bool> {
        let removed = self.delete_chunk_node(id);
        if removed {
            self.log_op(&GraphOp::RemoveChunk { id: id.to_string() })?;
        }
        Ok(removed)
    }

    fn delete_entity_node(&mut self, id: &str) -> bool {
        if let Some(idx) = self.entity_nodes.remove(id) {
            self.graph.remove_node(idx);
            true
        } else {
            false
        }
    }

    /// Remove an entity node and its edges.
    pub fn remove_entity(&mut self, id: &str) -> Result<bool> {
        let removed = self.delete_entity_node(id);
        if removed {
            self.log_op(&GraphOp::RemoveEntity { id: id.to_string() })?;
        }
        Ok(removed)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_nodes.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_nodes.len()
    }

    pub fn contains_chunk(&self, id: &str) -> bool {
        self.chunk_nodes.contains_key(id)
    }

    pub fn contains_entity(&self, id: &str) -> bool {
        self.entity_nodes.contains_key(id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entity_nodes.get(id).and_then(|&idx| match &self.graph[idx] {
            GraphNode::Entity(e) => Some(e),
            GraphNode::Chunk { .. } => None,
        })
    }

    /// All entity ids, sorted (deterministic iteration for PPR seeds).
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entity_nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Entities a chunk mentions, with mention counts.
    pub fn entities_mentioned_by(&self, chunk_id: &str) -> Vec<(String, u32)> {
        let Some(&idx) = self.chunk_nodes.get(chunk_id) else {
            return Vec::new();
        };
        let mut out: Vec<(String, u32)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|e| match e.weight() {
                GraphEdge::Mentions { count } => {
                    Some((self.graph[e.target()].id().to_string(), *count))
                }
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    /// Chunks that mention an entity, with mention counts.
    pub fn chunks_mentioning(&self, entity_id: &str) -> Vec<(String, u32)> {
        let Some(&idx) = self.entity_nodes.get(entity_id) else {
            return Vec::new();
        };
        let mut out: Vec<(String, u32)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| match e.weight() {
                GraphEdge::Mentions { count } => {
                    Some((self.graph[e.source()].id().to_string(), *count))
                }
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    /// Entity ids whose only mentions came from now-removed chunks.
    pub fn orphan_entities(&self) -> Vec<String> {
        let mut orphans: Vec<String> = self
            .entity_nodes
            .iter()
            .filter(|&(_, &idx)| {
                !self
                    .graph
                    .edges_directed(idx, Direction::Incoming)
                    .any(|e| matches!(e.weight(), GraphEdge::Mentions { .. }))
            })
            .map(|(id, _)| id.clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Entity-to-entity neighbors over `related_to` and `similar_to` edges,
    /// with walk strengths.
    pub fn related_entities(&self, entity_id: &str) -> Vec<(String, f32)> {
        let Some(&idx) = self.entity_nodes.get(entity_id) else {
            return Vec::new();
        };
        let mut out: Vec<(String, f32)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|e| match e.weight() {
                GraphEdge::SimilarTo => Some((self.graph[e.target()].id().to_string(), 1.0)),
                GraphEdge::RelatedTo { strength } => {
                    Some((self.graph[e.target()].id().to_string(), *strength))
                }
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Bounded BFS neighborhood around an entity (the `graph_query` tool).
    pub fn neighborhood(&self, entity_id: &str, depth: usize, max_nodes: usize) -> Subgraph {
        let Some(&start) = self.entity_nodes.get(entity_id) else {
            return Subgraph {
                nodes: Vec::new(),
                edges: Vec::new(),
            };
        };

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();
        visited.insert(start);
        queue.push_back((start, 0));

        while let Some((node, dist)) = queue.pop_front() {
            if dist >= depth || visited.len() >= max_nodes {
                continue;
            }
            let mut neighbors: Vec<NodeIndex> = self
                .graph
                .neighbors_undirected(node)
                .filter(|n| !visited.contains(n))
                .collect();
            neighbors.sort_by_key(|n| n.index());
            neighbors.dedup();
            for neighbor in neighbors {
                if visited.len() >= max_nodes {
                    break;
                }
                visited.insert(neighbor);
                queue.push_back((neighbor, dist + 1));
            }
        }

        let mut nodes: Vec<GraphNode> = visited.iter().map(|&i| self.graph[i].clone()).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));

        let mut edges: Vec<SubgraphEdge> = self
            .graph
            .edge_references()
            .filter(|e| visited.contains(&e.source()) && visited.contains(&e.target()))
            .map(|e| SubgraphEdge {
                source: self.graph[e.source()].id().to_string(),
                target: self.graph[e.target()].id().to_string(),
                kind: match e.weight() {
                    GraphEdge::Mentions { .. } => "mentions".to_string(),
                    GraphEdge::References => "references".to_string(),
                    GraphEdge::SimilarTo => "similar_to".to_string(),
                    GraphEdge::RelatedTo { .. } => "related_to".to_string(),
                },
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        Subgraph { nodes, edges }
    }

    /// Internal access for the PPR module.
    pub(crate) fn inner(&self) -> &StableDiGraph<GraphNode, GraphEdge> {
        &self.graph
    }

    pub(crate) fn entity_index(&self, id: &str) -> Option<NodeIndex> {
        self.entity_nodes.get(id).copied()
    }
}

// ============================================================================
// TESTS
// ============================================================================
