//! Mode detection.
//!
//! Pattern-based classification of queries into three mode families:
//! execution (direct lookups and imperatives), planning (comparatives and
//! multi-step intent), and brainstorming (hypotheticals). The query is
//! lowercased; each matching pattern contributes its weight to the family
//! confidence, `confidence = min(1.0, sum of hit weights)` — a monotone
//! weighted sum. The top family wins if its confidence reaches 0.7,
//! otherwise the detector defaults to execution. Patterns are compiled
//! once; detection is a few regex scans and completes well under 10 ms.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Confidence a family must reach to win outright
const WIN_THRESHOLD: f32 = 0.7;

/// Retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Execution,
    Planning,
    Brainstorming,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Execution => "execution",
            Mode::Planning => "planning",
            Mode::Brainstorming => "brainstorming",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execution" => Some(Mode::Execution),
            "planning" => Some(Mode::Planning),
            "brainstorming" => Some(Mode::Brainstorming),
            _ => None,
        }
    }
}

/// One weighted pattern
struct ModePattern {
    name: &'static str,
    regex: Regex,
    weight: f32,
}

fn pattern(name: &'static str, re: &str, weight: f32) -> ModePattern {
    ModePattern {
        name,
        // Patterns are compile-time constants; a failure here is a build bug
        regex: Regex::new(re).expect("mode pattern must compile"),
        weight,
    }
}

/// Execution family: direct lookups, imperatives (11 patterns)
static EXECUTION_PATTERNS: LazyLock<Vec<ModePattern>> = LazyLock::new(|| {
    vec![
        pattern("what_is", r"^what\s+(?:is|are|was|were)\b", 0.85),
        pattern("show_me", r"^show\s+me\b", 0.85),
        pattern("get", r"^(?:get|fetch|retrieve)\b", 0.8),
        pattern("find", r"^(?:find|look\s+up|locate)\b", 0.8),
        pattern("where_is", r"^where\s+(?:is|are|was|were)\b", 0.85),
        pattern("when_did", r"^when\s+(?:did|was|is|does)\b", 0.85),
        pattern("who", r"^who\s+(?:is|are|was|wrote|made)\b", 0.85),
        pattern("list", r"^(?:list|enumerate)\b", 0.8),
        pattern("display", r"^(?:display|print|output)\b", 0.75),
        pattern("define", r"^(?:define|explain)\b", 0.75),
        pattern("how_many", r"^how\s+(?:many|much)\b", 0.8),
    ]
});

/// Planning family: comparatives, multi-step intent (9 patterns)
static PLANNING_PATTERNS: LazyLock<Vec<ModePattern>> = LazyLock::new(|| {
    vec![
        pattern("compare", r"\b(?:compare|comparison|versus|vs\.?)\b", 0.8),
        pattern("steps_to", r"\bsteps?\s+(?:to|for|needed)\b", 0.8),
        pattern("plan", r"\b(?:plan|planning|roadmap)\b", 0.8),
        pattern("how_should", r"^how\s+(?:should|do|can|would)\s+(?:i|we)\b", 0.8),
        pattern("best_way", r"\bbest\s+way\b", 0.8),
        pattern("order_of", r"\b(?:order|sequence)\s+of\b", 0.7),
        pattern("strategy", r"\b(?:strategy|approach|tradeoffs?)\b", 0.75),
        pattern("pros_cons", r"\b(?:pros\s+and\s+cons|advantages|disadvantages)\b", 0.75),
        pattern("decide", r"\b(?:decide|choose|pick)\s+between\b", 0.8),
    ]
});

/// Brainstorming family: hypotheticals, ideation (9 patterns)
static BRAINSTORMING_PATTERNS: LazyLock<Vec<ModePattern>> = LazyLock::new(|| {
    vec![
        pattern("what_if", r"\bwhat\s+if\b", 0.85),
        pattern("imagine", r"\b(?:imagine|envision)\b", 0.85),
        pattern("ideas", r"\bideas?\s+(?:for|about|on)\b", 0.8),
        pattern("brainstorm", r"\bbrainstorm\w*\b", 0.9),
        pattern("could_we", r"\b(?:could|might)\s+(?:we|i|it)\b", 0.7),
        pattern("possibilities", r"\bpossibilit(?:y|ies)\b", 0.8),
        pattern("alternatives", r"\balternatives?\b", 0.75),
        pattern("suppose", r"^(?:suppose|say|hypothetically)\b", 0.85),
        pattern("creative", r"\b(?:creative|novel|unconventional)\s+ways?\b", 0.8),
    ]
});

/// Detection result
#[derive(Debug, Clone)]
pub struct ModeDetection {
    pub mode: Mode,
    pub confidence: f32,
    /// Names of the patterns that fired for the winning family
    pub patterns_matched: Vec<String>,
    pub detection_ms: f64,
}

/// Pattern-based mode detector
pub struct ModeDetector;

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeDetector {
    pub fn new() -> Self {
        Self
    }

    fn score_family(patterns: &[ModePattern], query: &str) -> (f32, Vec<String>) {
        let mut confidence = 0.0_f32;
        let mut matched = Vec::new();
        for p in patterns {
            if p.regex.is_match(query) {
                confidence += p.weight;
                matched.push(p.name.to_string());
            }
        }
        (confidence.min(1.0), matched)
    }

    /// Classify a query. Deterministic; ties resolve execution > planning >
    /// brainstorming (the cheapest profile wins).
    pub fn detect(&self, query: &str) -> ModeDetection {
        let started = Instant::now();
        let query = query.to_lowercase();

        let families = [
            (Mode::Execution, Self::score_family(&EXECUTION_PATTERNS, &query)),
            (Mode::Planning, Self::score_family(&PLANNING_PATTERNS, &query)),
            (
                Mode::Brainstorming,
                Self::score_family(&BRAINSTORMING_PATTERNS, &query),
            ),
        ];

        let mut winner = Mode::Execution;
        let mut best_confidence = 0.0_f32;
        let mut best_patterns: Vec<String> = Vec::new();
        for (mode, (confidence, patterns)) in families {
            if confidence > best_confidence {
                winner = mode;
                best_confidence = confidence;
                best_patterns = patterns;
            }
        }

        let detection_ms = started.elapsed().as_secs_f64() * 1_000.0;

        if best_confidence >= WIN_THRESHOLD {
            ModeDetection {
                mode: winner,
                confidence: best_confidence,
                patterns_matched: best_patterns,
                detection_ms,
            }
        } else {
            // Below the win threshold the detector defaults to execution,
            // keeping whatever (weak) evidence it had in the trace.
            ModeDetection {
                mode: Mode::Execution,
                confidence: best_confidence,
                patterns_matched: best_patterns,
                detection_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_queries() {
        let detector = ModeDetector::new();
        for q in [
            "what is python used for",
            "show me the config file",
            "find the lifecycle manager",
            "who wrote this module",
            "list all stored chunks",
        ] {
            let d = detector.detect(q);
            assert_eq!(d.mode, Mode::Execution, "query: {}", q);
            assert!(d.confidence >= 0.7, "query: {}", q);
        }
    }

    #[test]
    fn test_planning_queries() {
        let detector = ModeDetector::new();
        for q in [
            "compare sqlite versus postgres for this workload",
            "outline the steps to migrate the index",
            "best way to structure the ingestion plan",
        ] {
            let d = detector.detect(q);
            assert_eq!(d.mode, Mode::Planning, "query: {}", q);
        }
    }

    #[test]
    fn test_brainstorming_queries() {
        let detector = ModeDetector::new();
        for q in [
            "what if we stored embeddings in the graph",
            "brainstorm ideas for cache eviction",
            "imagine alternatives to pagerank here",
        ] {
            let d = detector.detect(q);
            assert_eq!(d.mode, Mode::Brainstorming, "query: {}", q);
        }
    }

    #[test]
    fn test_ambiguous_defaults_to_execution() {
        let detector = ModeDetector::new();
        let d = detector.detect("python memory notes");
        assert_eq!(d.mode, Mode::Execution);
        assert!(d.confidence < 0.7);
    }

    #[test]
    fn test_deterministic() {
        let detector = ModeDetector::new();
        let a = detector.detect("what is the best way to plan this");
        let b = detector.detect("what is the best way to plan this");
        assert_eq!(a.mode, b.mode);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.patterns_matched, b.patterns_matched);
    }

    #[test]
    fn test_confidence_capped_at_one() {
        let detector = ModeDetector::new();
        let d = detector.detect("what if we imagine creative ways to brainstorm possibilities");
        assert!(d.confidence <= 1.0);
        assert!(d.patterns_matched.len() > 1);
    }

    #[test]
    fn test_patterns_recorded() {
        let detector = ModeDetector::new();
        let d = detector.detect("what is rust");
        assert!(d.patterns_matched.contains(&"what_is".to_string()));
    }

    #[test]
    fn test_detection_is_fast() {
        let detector = ModeDetector::new();
        // Warm the lazily-compiled patterns
        detector.detect("warmup");
        let d = detector.detect("what is the capital of france");
        assert!(d.detection_ms < 10.0, "detection took {} ms", d.detection_ms);
    }

    #[test]
    fn test_mode_roundtrip() {
        for mode in [Mode::Execution, Mode::Planning, Mode::Brainstorming] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
    }
}
