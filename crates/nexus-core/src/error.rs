//! Error taxonomy for the retrieval core.
//!
//! Every fallible subsystem maps into [`CoreError`]. Recoverable conditions
//! (`TierUnavailable`, `BudgetExceeded`, `Timeout`) are handled by the
//! pipeline and surface as degraded or partial results; `Integrity` and
//! `Internal` abort the current request and are reported with the trace id.

use std::time::Duration;

/// Core error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed query or oversized input
    #[error("Invalid input: {0}")]
    Input(String),

    /// No store can answer the request
    #[error("Routing error: {0}")]
    Routing(String),

    /// A retrieval tier is not initialized or exhausted its retries
    #[error("Tier unavailable: {tier}: {reason}")]
    TierUnavailable { tier: &'static str, reason: String },

    /// I/O or lock contention after retries exhausted
    #[error("Storage error: {0}")]
    Storage(String),

    /// Token budget unsatisfiable even with an empty extended set
    #[error("Token budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Schema/migration violation or dimension mismatch
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Deadline expired
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Invariant broken; always logged with full context
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable kind tag used in error envelopes and trace rows.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Input(_) => "input_error",
            CoreError::Routing(_) => "routing_error",
            CoreError::TierUnavailable { .. } => "tier_unavailable",
            CoreError::Storage(_) => "storage_error",
            CoreError::BudgetExceeded(_) => "budget_exceeded",
            CoreError::Integrity(_) => "integrity_error",
            CoreError::Timeout(_) => "timeout",
            CoreError::Internal(_) => "internal_error",
        }
    }

    /// Whether the pipeline may continue with degraded results.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::TierUnavailable { .. }
                | CoreError::Timeout(_)
                | CoreError::BudgetExceeded(_)
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

/// Retry a transient operation with bounded exponential backoff.
///
/// Used for store writes that can hit lock contention. Retries up to
/// `max_retries` times, sleeping 10ms, 20ms, 40ms between attempts.
/// Exhaustion surfaces the last error unchanged.
pub fn retry_transient<T, F>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = Duration::from_millis(10);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e @ CoreError::Storage(_)) if attempt < max_retries => {
                tracing::debug!(attempt, error = %e, "transient storage error, retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
