// SPDX-License-Identifier: AGPL-3.0-or-later

//! The process-wide, sharded mapping from document id to [`Session`].
//!
//! Sessions are created lazily on first attach and kept alive only as long
//! as something references them: the registry's own map entry, plus one
//! `Arc` per attached driver. A background sweep periodically drops the
//! registry's reference to any session with no participants, after giving
//! the archive collaborator a chance to persist it; drivers that are still
//! holding a reference at that moment keep the session alive regardless.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::session::Session;

/// Shared handle to one document's session.
pub type SessionHandle = Arc<Session>;

/// Process-wide registry of live sessions, keyed by document id.
pub struct Registry {
    sessions: DashMap<String, SessionHandle>,
    archive: Option<Arc<Archive>>,
}

impl Registry {
    /// Creates an empty registry. `shard_count` is rounded up to the next
    /// power of two, as `DashMap::with_shard_amount` requires (`SPEC_FULL.md`
    /// §4.C recommends N >= 16 shards).
    #[must_use]
    pub fn new(archive: Option<Arc<Archive>>, shard_count: usize) -> Self {
        Self {
            sessions: DashMap::with_shard_amount(shard_count.next_power_of_two()),
            archive,
        }
    }

    /// Returns the session for `document_id`, creating and (if an archive
    /// collaborator is configured) seeding it if this is the first time
    /// it's been requested.
    pub async fn get_or_create(&self, document_id: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(document_id) {
            return Arc::clone(&existing);
        }

        // Construct the candidate session (and its archive seed, which is
        // fallible I/O) before taking the map entry, so the critical
        // section itself never awaits.
        let session = Arc::new(Session::new());
        if let Some(archive) = &self.archive {
            match archive.load(document_id).await {
                Ok(Some(archived)) => {
                    session.seed(archived.text, archived.language).await;
                    debug!(document_id, "restored document from archive");
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(document_id, %error, "failed to load document from archive, starting empty");
                }
            }
        }

        match self.sessions.entry(document_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                // Another task won the race; discard our candidate.
                Arc::clone(entry.get())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(document_id, "created new session");
                entry.insert(Arc::clone(&session));
                session
            }
        }
    }

    #[must_use]
    pub fn live_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn total_participants(&self) -> usize {
        let mut total = 0;
        for entry in self.sessions.iter() {
            total += entry.value().participant_count().await;
        }
        total
    }

    /// Total bytes of text currently held across every live session, used
    /// by the stats endpoint. Not a log-growth counter: it reflects the
    /// folded text, not the sum of every operation ever submitted.
    pub async fn total_bytes_logged(&self) -> u64 {
        let mut total = 0;
        for entry in self.sessions.iter() {
            total += entry.value().text().await.len() as u64;
        }
        total
    }

    /// Periodically drops sessions with no attached participants,
    /// archiving them first on a best-effort basis. Runs until the
    /// process shuts down; intended to be spawned as a background task.
    pub async fn run_eviction_sweep(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for document_id in candidates {
            let Some(session) = self.sessions.get(&document_id).map(|e| Arc::clone(&e)) else {
                continue;
            };
            if session.participant_count().await != 0 {
                continue;
            }
            if let Some(archive) = &self.archive {
                let text = session.text().await;
                let language = session.language().await;
                if let Err(error) = archive.store(&document_id, text, language).await {
                    warn!(document_id, %error, "failed to archive idle document");
                }
            }
            // Only remove if still empty: a participant may have attached
            // between the check above and now.
            if session.participant_count().await == 0 {
                self.sessions.remove_if(&document_id, |_, v| Arc::strong_count(v) <= 1);
                debug!(document_id, "evicted idle session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn get_or_create_returns_the_same_session_twice() {
        let registry = Registry::new(None, 16);
        let a = registry.get_or_create("doc-1").await;
        let b = registry.get_or_create("doc-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.live_session_count(), 1);
    }

    #[tokio::test]
    async fn different_ids_get_different_sessions() {
        let registry = Registry::new(None, 16);
        let a = registry.get_or_create("doc-1").await;
        let b = registry.get_or_create("doc-2").await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.live_session_count(), 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn sweep_evicts_sessions_with_no_participants() {
        let registry = Arc::new(Registry::new(None, 16));
        let session = registry.get_or_create("doc-1").await;
        drop(session);
        registry.sweep_once().await;
        assert_eq!(registry.live_session_count(), 0);
    }

    #[tokio::test]
    async fn sweep_keeps_sessions_with_participants() {
        let registry = Arc::new(Registry::new(None, 16));
        let session = registry.get_or_create("doc-1").await;
        let _participant = session.attach().await;
        registry.sweep_once().await;
        assert_eq!(registry.live_session_count(), 1);
    }
}
