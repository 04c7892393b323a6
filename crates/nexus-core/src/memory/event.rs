//! Append-only event records.

use serde::{Deserialize, Serialize};

/// Event kinds recorded in the append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ingest,
    Delete,
    Demote,
    Archive,
    Rehydrate,
    PurgeRequested,
    Purge,
    UndoRestore,
    UserReviewRequested,
    TierDegraded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ingest => "ingest",
            EventKind::Delete => "delete",
            EventKind::Demote => "demote",
            EventKind::Archive => "archive",
            EventKind::Rehydrate => "rehydrate",
            EventKind::PurgeRequested => "purge_requested",
            EventKind::Purge => "purge",
            EventKind::UndoRestore => "undo_restore",
            EventKind::UserReviewRequested => "user_review_requested",
            EventKind::TierDegraded => "tier_degraded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(EventKind::Ingest),
            "delete" => Some(EventKind::Delete),
            "demote" => Some(EventKind::Demote),
            "archive" => Some(EventKind::Archive),
            "rehydrate" => Some(EventKind::Rehydrate),
            "purge_requested" => Some(EventKind::PurgeRequested),
            "purge" => Some(EventKind::Purge),
            "undo_restore" => Some(EventKind::UndoRestore),
            "user_review_requested" => Some(EventKind::UserReviewRequested),
            "tier_degraded" => Some(EventKind::TierDegraded),
            _ => None,
        }
    }
}

/// One append-only event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    /// Monotonic milliseconds; strictly increasing across the log
    pub timestamp_ms: i64,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub session_id: String,
}
