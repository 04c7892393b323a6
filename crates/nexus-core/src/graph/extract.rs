//! Entity extraction.
//!
//! Rule-based NER over a small fixed tag set (PERSON, ORG, LOCATION),
//! falling back to capitalized multi-word phrase extraction (CONCEPT)
//! for everything the tagged patterns miss. Ids are normalized through
//! [`crate::memory::normalize_entity_id`].

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::memory::{normalize_entity_id, Entity, EntityType};

/// Honorific-led person names: "Dr. Grace Hopper"
static PERSON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Dr|Mr|Ms|Mrs|Prof)\.?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)").unwrap()
});

/// Organization suffixes: "Acme Corp", "Stanford University"
static ORG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z0-9]*(?:\s+[A-Z][A-Za-z0-9]*)*\s+(?:Inc|Corp|Ltd|LLC|Labs|Foundation|University|Institute))\b",
    )
    .unwrap()
});

/// Location prepositions: "in Berlin", "at Mount Rainier"
static LOCATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|at|near|from)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2})\b").unwrap()
});

/// Capitalized word or multi-word phrase (the CONCEPT fallback)
static PHRASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z0-9]+(?:\s+[A-Z][A-Za-z0-9]+)*)\b").unwrap()
});

/// Sentence-starter words that are not entities on their own
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "this", "that", "these", "those", "a", "an", "it", "its", "he", "she", "they",
        "we", "you", "i", "what", "when", "where", "which", "who", "how", "why", "if", "and",
        "or", "but", "not", "all", "any", "some", "there", "here", "then", "also", "with",
        "for", "from", "into", "over", "under", "after", "before", "while", "during",
    ]
    .into_iter()
    .collect()
});

/// Rule-based entity extractor
pub struct EntityExtractor {
    /// Minimum display-name length to filter noise
    min_length: usize,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self { min_length: 2 }
    }

    /// Extract entities from text. Tagged patterns run first; the
    /// capitalized-phrase fallback fills in CONCEPT entities for spans the
    /// tag set missed. Results are deduplicated by normalized id.
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push = |name: &str, entity_type: EntityType, entities: &mut Vec<Entity>,
                        seen: &mut HashSet<String>| {
            let name = name.trim();
            if name.len() < self.min_length {
                return;
            }
            if STOPWORDS.contains(name.to_lowercase().as_str()) {
                return;
            }
            let id = normalize_entity_id(name);
            if id.is_empty() || !seen.insert(id) {
                return;
            }
            entities.push(Entity::new(name, entity_type));
        };

        for cap in PERSON_PATTERN.captures_iter(text) {
            push(&cap[1], EntityType::Person, &mut entities, &mut seen);
        }
        for cap in ORG_PATTERN.captures_iter(text) {
            push(&cap[1], EntityType::Org, &mut entities, &mut seen);
        }
        for cap in LOCATION_PATTERN.captures_iter(text) {
            push(&cap[1], EntityType::Location, &mut entities, &mut seen);
        }

        // Capitalized-phrase fallback: anything the tag set missed is a
        // CONCEPT, minus single stopwords and spans already claimed.
        for cap in PHRASE_PATTERN.captures_iter(text) {
            let phrase = &cap[1];
            let single_word = !phrase.contains(' ');
            if single_word && STOPWORDS.contains(phrase.to_lowercase().as_str()) {
                continue;
            }
            push(phrase, EntityType::Concept, &mut entities, &mut seen);
        }

        entities
    }

    /// Extract normalized entity ids only (query-side convenience).
    pub fn extract_ids(&self, text: &str) -> Vec<String> {
        self.extract(text).into_iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_phrases() {
        let extractor = EntityExtractor::new();
        let entities =
            extractor.extract("Python is widely used for Machine Learning and Neural Networks");
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"python"));
        assert!(ids.contains(&"machine_learning"));
        assert!(ids.contains(&"neural_networks"));
    }

    #[test]
    fn test_person_with_honorific() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Dr. Grace Hopper invented the compiler");
        let person = entities.iter().find(|e| e.id == "grace_hopper").unwrap();
        assert_eq!(person.entity_type, EntityType::Person);
    }

    #[test]
    fn test_org_suffix() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("She worked at Acme Corp on parsers");
        let org = entities.iter().find(|e| e.id == "acme_corp").unwrap();
        assert_eq!(org.entity_type, EntityType::Org);
    }

    #[test]
    fn test_sentence_starters_filtered() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("The quick test. This sentence has no names.");
        assert!(!entities.iter().any(|e| e.id == "the" || e.id == "this"));
    }

    #[test]
    fn test_deduplicated_by_id() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Python and Python and more Python");
        assert_eq!(entities.iter().filter(|e| e.id == "python").count(), 1);
    }

    #[test]
    fn test_empty_text() {
        let extractor = EntityExtractor::new();
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("all lowercase words only").is_empty());
    }
}
