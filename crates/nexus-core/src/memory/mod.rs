//! Data model for the memory core.
//!
//! Chunks, entities, tagging envelopes, query traces, and events.

mod chunk;
mod entity;
mod event;
mod trace;

pub use chunk::{
    AgentIdentity, Chunk, IntentCategory, LifecycleStage, MemoryCategory, RetentionTier,
    TaggingEnvelope, TimestampTriplet,
};
pub use entity::{normalize_entity_id, Entity, EntityType};
pub use event::{Event, EventKind};
pub use trace::{QueryTrace, RetrievedRef, TraceErrorKind};
