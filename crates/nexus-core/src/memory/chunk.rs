//! Chunk data model.
//!
//! The chunk is the atomic indexed unit: a span of source text with its
//! embedding, lifecycle state, and tagging envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// LIFECYCLE STAGE
// ============================================================================

/// Lifecycle stage of a chunk.
///
/// Stages progress monotonically (`active → demoted → archived →
/// rehydratable`) without skipping; the only back-edges are the explicit
/// rehydration arcs from `archived` and `rehydratable` to `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Active,
    Demoted,
    Archived,
    Rehydratable,
}

impl LifecycleStage {
    /// Score multiplier applied to retrieval scores at this stage.
    pub fn score_multiplier(&self) -> f32 {
        match self {
            LifecycleStage::Active => 1.0,
            LifecycleStage::Demoted => 0.5,
            LifecycleStage::Archived => 0.1,
            LifecycleStage::Rehydratable => 0.01,
        }
    }

    /// Whether `next` is a legal transition from this stage.
    pub fn can_transition_to(&self, next: LifecycleStage) -> bool {
        use LifecycleStage::*;
        matches!(
            (self, next),
            (Active, Demoted)
                | (Demoted, Archived)
                | (Archived, Rehydratable)
                // explicit rehydration arcs
                | (Archived, Active)
                | (Rehydratable, Active)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Active => "active",
            LifecycleStage::Demoted => "demoted",
            LifecycleStage::Archived => "archived",
            LifecycleStage::Rehydratable => "rehydratable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LifecycleStage::Active),
            "demoted" => Some(LifecycleStage::Demoted),
            "archived" => Some(LifecycleStage::Archived),
            "rehydratable" => Some(LifecycleStage::Rehydratable),
            _ => None,
        }
    }
}

// ============================================================================
// RETENTION TIER & CATEGORY
// ============================================================================

/// Retention tier assigned at ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionTier {
    Short,
    Mid,
    Long,
}

impl RetentionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTier::Short => "short",
            RetentionTier::Mid => "mid",
            RetentionTier::Long => "long",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "short" => Some(RetentionTier::Short),
            "mid" => Some(RetentionTier::Mid),
            "long" => Some(RetentionTier::Long),
            _ => None,
        }
    }
}

/// Memory category, weighted by the hot/cold classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Procedural,
    Episodic,
    Semantic,
}

impl MemoryCategory {
    /// Hot/cold classifier weight (semantic > procedural > episodic).
    pub fn weight(&self) -> f64 {
        match self {
            MemoryCategory::Semantic => 1.0,
            MemoryCategory::Procedural => 0.8,
            MemoryCategory::Episodic => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Procedural => "procedural",
            MemoryCategory::Episodic => "episodic",
            MemoryCategory::Semantic => "semantic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "procedural" => Some(MemoryCategory::Procedural),
            "episodic" => Some(MemoryCategory::Episodic),
            "semantic" => Some(MemoryCategory::Semantic),
            _ => None,
        }
    }
}

// ============================================================================
// TAGGING ENVELOPE
// ============================================================================

/// Intent category recorded in the tagging envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentCategory {
    Implementation,
    Bugfix,
    Refactor,
    Testing,
    Documentation,
    Analysis,
    Planning,
    Research,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Implementation => "implementation",
            IntentCategory::Bugfix => "bugfix",
            IntentCategory::Refactor => "refactor",
            IntentCategory::Testing => "testing",
            IntentCategory::Documentation => "documentation",
            IntentCategory::Analysis => "analysis",
            IntentCategory::Planning => "planning",
            IntentCategory::Research => "research",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "implementation" => Some(IntentCategory::Implementation),
            "bugfix" => Some(IntentCategory::Bugfix),
            "refactor" => Some(IntentCategory::Refactor),
            "testing" => Some(IntentCategory::Testing),
            "documentation" => Some(IntentCategory::Documentation),
            "analysis" => Some(IntentCategory::Analysis),
            "planning" => Some(IntentCategory::Planning),
            "research" => Some(IntentCategory::Research),
            _ => None,
        }
    }
}

/// Identity of the writing agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub category: String,
    pub capabilities: Vec<String>,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            name: "nexus".to_string(),
            category: "memory-service".to_string(),
            capabilities: vec!["ingest".to_string(), "retrieve".to_string()],
        }
    }
}

/// Timestamp in the three forms the envelope carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampTriplet {
    pub iso: String,
    pub epoch_seconds: i64,
    pub human: String,
}

impl TimestampTriplet {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            iso: dt.to_rfc3339(),
            epoch_seconds: dt.timestamp(),
            human: dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

/// WHO/WHEN/PROJECT/WHY metadata attached at write time and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingEnvelope {
    pub agent: AgentIdentity,
    pub timestamp: TimestampTriplet,
    pub project: String,
    pub intent: IntentCategory,
}

impl TaggingEnvelope {
    pub fn new(project: String, intent: IntentCategory, now: DateTime<Utc>) -> Self {
        Self {
            agent: AgentIdentity::default(),
            timestamp: TimestampTriplet::from_datetime(now),
            project,
            intent,
        }
    }
}

// ============================================================================
// CHUNK
// ============================================================================

/// The atomic indexed unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id
    pub id: String,
    /// Source path this chunk was cut from
    pub source_path: String,
    /// Ordinal position within the source
    pub ordinal: usize,
    /// Chunk text
    pub text: String,
    /// Unit-norm embedding (dimension matches the configured model)
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub stage: LifecycleStage,
    pub retention: RetentionTier,
    pub category: MemoryCategory,
    /// Optional hot/cold decay score (advisory)
    pub decay_score: Option<f64>,
    /// Free-form tags (`priority:high`, `lifecycle:personal`, ...)
    pub tags: Vec<String>,
    pub envelope: TaggingEnvelope,
}

impl Chunk {
    /// Score multiplier for the current stage.
    pub fn score_multiplier(&self) -> f32 {
        self.stage.score_multiplier()
    }

    /// Chunks tagged `priority:high` or `lifecycle:personal` are exempt
    /// from demotion and archival.
    pub fn is_lifecycle_exempt(&self) -> bool {
        self.tags
            .iter()
            .any(|t| t == "priority:high" || t == "lifecycle:personal")
    }

    /// Whitespace-word token approximation used for budget accounting.
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_multipliers() {
        assert_eq!(LifecycleStage::Active.score_multiplier(), 1.0);
        assert_eq!(LifecycleStage::Demoted.score_multiplier(), 0.5);
        assert_eq!(LifecycleStage::Archived.score_multiplier(), 0.1);
        assert_eq!(LifecycleStage::Rehydratable.score_multiplier(), 0.01);
    }

    #[test]
    fn test_stage_machine_is_acyclic_except_rehydration() {
        use LifecycleStage::*;
        assert!(Active.can_transition_to(Demoted));
        assert!(Demoted.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Rehydratable));
        assert!(Archived.can_transition_to(Active));
        assert!(Rehydratable.can_transition_to(Active));

        // No skips, no other back-edges
        assert!(!Active.can_transition_to(Archived));
        assert!(!Active.can_transition_to(Rehydratable));
        assert!(!Demoted.can_transition_to(Active));
        assert!(!Demoted.can_transition_to(Rehydratable));
        assert!(!Rehydratable.can_transition_to(Archived));
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            LifecycleStage::Active,
            LifecycleStage::Demoted,
            LifecycleStage::Archived,
            LifecycleStage::Rehydratable,
        ] {
            assert_eq!(LifecycleStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(LifecycleStage::parse("frozen"), None);
    }

    #[test]
    fn test_category_weights_ordered() {
        assert!(MemoryCategory::Semantic.weight() > MemoryCategory::Procedural.weight());
        assert!(MemoryCategory::Procedural.weight() > MemoryCategory::Episodic.weight());
    }

    #[test]
    fn test_intent_category_roundtrip() {
        for intent in [
            IntentCategory::Implementation,
            IntentCategory::Bugfix,
            IntentCategory::Refactor,
            IntentCategory::Testing,
            IntentCategory::Documentation,
            IntentCategory::Analysis,
            IntentCategory::Planning,
            IntentCategory::Research,
        ] {
            assert_eq!(IntentCategory::parse(intent.as_str()), Some(intent));
        }
    }

    #[test]
    fn test_timestamp_triplet_consistency() {
        let dt = Utc::now();
        let triplet = TimestampTriplet::from_datetime(dt);
        assert_eq!(triplet.epoch_seconds, dt.timestamp());
        assert!(triplet.iso.contains('T'));
        assert!(triplet.human.ends_with("UTC"));
    }
}
