//! Entity data model and id normalization.

use serde::{Deserialize, Serialize};

/// Entity type over a small fixed tag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Person,
    Org,
    Concept,
    Location,
    Product,
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Org => "ORG",
            EntityType::Concept => "CONCEPT",
            EntityType::Location => "LOCATION",
            EntityType::Product => "PRODUCT",
            EntityType::Event => "EVENT",
        }
    }
}

/// Named reference extracted from text or stored in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized id (lowercased, whitespace collapsed to underscores)
    pub id: String,
    /// Display name as it appeared in the source
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    /// How often this entity has co-occurred with others
    pub cooccurrence_frequency: u64,
}

impl Entity {
    pub fn new(name: &str, entity_type: EntityType) -> Self {
        Self {
            id: normalize_entity_id(name),
            name: name.to_string(),
            entity_type,
            aliases: Vec::new(),
            cooccurrence_frequency: 0,
        }
    }
}

/// Normalize an entity display name into its stable id.
///
/// Lowercase, collapse whitespace runs to a single underscore, strip
/// leading/trailing separators. Deterministic and idempotent:
/// `normalize(normalize(x)) == normalize(x)`.
pub fn normalize_entity_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.chars() {
        if c.is_whitespace() || c == '_' {
            if !last_was_sep {
                id.push('_');
                last_was_sep = true;
            }
        } else {
            for lc in c.to_lowercase() {
                id.push(lc);
            }
            last_was_sep = false;
        }
    }
    while id.ends_with('_') {
        id.pop();
    }
    id
}
