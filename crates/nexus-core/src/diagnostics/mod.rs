//! Debug subsystem: query tracing, replay, and error attribution.
//!
//! Tracing is always on — every request produces a trace, written
//! asynchronously to the append-only SQL store. Replay reconstructs a
//! request and diffs the outputs; attribution classifies failed traces
//! into context/model/system bugs.

mod attribution;
mod replay;

pub use attribution::{attribute, attribution_stats, AttributionStats, AttributionVerdict};
pub use replay::{replay, ReplayDiff, ReplayReport};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::memory::QueryTrace;
use crate::storage::MetaStore;

enum SinkMessage {
    Write(Box<QueryTrace>),
    Flush(oneshot::Sender<()>),
}

enum SinkMode {
    /// Writes happen on the calling thread (tests, replay verification)
    Inline,
    /// Writes drain through a background task (production)
    Channel(mpsc::UnboundedSender<SinkMessage>),
}

/// Asynchronous writer in front of the trace store.
///
/// Traces for one trace id are submitted exactly once, so per-trace
/// submission order is trivially preserved; inter-trace order is
/// whatever the channel delivers, which the store does not promise.
pub struct TraceSink {
    meta: Arc<MetaStore>,
    mode: SinkMode,
}

impl TraceSink {
    /// Inline sink: every submit is a synchronous store write.
    pub fn inline(meta: Arc<MetaStore>) -> Self {
        Self {
            meta,
            mode: SinkMode::Inline,
        }
    }

    /// Spawn the background writer task. Requires a tokio runtime.
    pub fn spawn(meta: Arc<MetaStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkMessage>();
        let writer_meta = Arc::clone(&meta);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    SinkMessage::Write(trace) => {
                        if let Err(e) = writer_meta.insert_trace(&trace) {
                            tracing::error!(trace_id = %trace.trace_id, error = %e, "trace write failed");
                        }
                    }
                    SinkMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self {
            meta,
            mode: SinkMode::Channel(tx),
        }
    }

    /// Submit a trace. Never fails the request: a write problem is logged
    /// and swallowed here, at the edge of the request path.
    pub fn submit(&self, trace: QueryTrace) {
        match &self.mode {
            SinkMode::Inline => {
                if let Err(e) = self.meta.insert_trace(&trace) {
                    tracing::error!(trace_id = %trace.trace_id, error = %e, "trace write failed");
                }
            }
            SinkMode::Channel(tx) => {
                if tx.send(SinkMessage::Write(Box::new(trace))).is_err() {
                    tracing::error!("trace writer task is gone, dropping trace");
                }
            }
        }
    }

    /// Wait until every previously submitted trace has landed.
    pub async fn flush(&self) {
        if let SinkMode::Channel(tx) = &self.mode {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(SinkMessage::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    pub fn store(&self) -> &Arc<MetaStore> {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (Arc<MetaStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let meta = Arc::new(MetaStore::open(&dir.path().join("meta.db")).unwrap());
        (meta, dir)
    }

    #[test]
    fn test_inline_sink_writes_immediately() {
        let (meta, _dir) = store();
        let sink = TraceSink::inline(Arc::clone(&meta));
        let trace = QueryTrace::begin("inline test", None);
        let id = trace.trace_id.clone();
        sink.submit(trace);
        assert!(meta.get_trace(&id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_channel_sink_lands_after_flush() {
        let (meta, _dir) = store();
        let sink = TraceSink::spawn(Arc::clone(&meta));
        let trace = QueryTrace::begin("async test", None);
        let id = trace.trace_id.clone();
        sink.submit(trace);
        sink.flush().await;
        assert!(meta.get_trace(&id).unwrap().is_some());
    }
}
