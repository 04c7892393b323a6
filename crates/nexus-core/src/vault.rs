//! Vault watcher adapter.
//!
//! Thin seam between the external file-watching daemon and the ingestion
//! queue: filesystem events on markdown files under the vault path are
//! translated into [`VaultEvent`]s on the bounded channel the ingest
//! worker drains. The daemon itself (debouncing, batching, restart
//! policy) stays outside the core.

use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};
use crate::ingest::VaultEvent;

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

/// Holds the OS watcher; dropping it stops the event stream.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

impl VaultWatcher {
    /// Watch `vault_path` recursively, forwarding markdown changes into
    /// `events`. A full queue drops the event with a warning — the next
    /// change to the same file re-delivers it.
    pub fn start(vault_path: &Path, events: mpsc::Sender<VaultEvent>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "vault watcher error");
                    return;
                }
            };

            for path in event.paths.iter().filter(|p| is_markdown(p)) {
                let vault_event = match event.kind {
                    EventKind::Create(_) => VaultEvent::Created(path.clone()),
                    EventKind::Modify(_) => VaultEvent::Modified(path.clone()),
                    EventKind::Remove(_) => VaultEvent::Deleted(path.clone()),
                    _ => continue,
                };
                if let Err(e) = events.try_send(vault_event) {
                    tracing::warn!(path = %path.display(), error = %e, "ingest queue full, dropping vault event");
                }
            }
        })
        .map_err(|e| CoreError::Storage(format!("vault watcher init failed: {}", e)))?;

        watcher
            .watch(vault_path, RecursiveMode::Recursive)
            .map_err(|e| {
                CoreError::Storage(format!("cannot watch {}: {}", vault_path.display(), e))
            })?;

        tracing::info!(vault = %vault_path.display(), "vault watcher started");
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_filter() {
        assert!(is_markdown(Path::new("/vault/note.md")));
        assert!(is_markdown(Path::new("/vault/NOTE.MD")));
        assert!(is_markdown(Path::new("/vault/long.markdown")));
        assert!(!is_markdown(Path::new("/vault/image.png")));
        assert!(!is_markdown(Path::new("/vault/no_extension")));
    }
}
