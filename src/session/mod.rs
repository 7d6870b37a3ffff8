// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-document session: an append-only log of operations, a roster
//! of connected participants, and the single synchronization point that
//! lets every connected driver converge on the same text.
//!
//! Modeled closely on the classic central-server OT reference design: one
//! exclusive lock around a small piece of state, and a `Notify` that wakes
//! every writer task whenever anything changes. Writers re-read state from
//! their own last-observed revision rather than being handed individual
//! events, so a missed wakeup is harmless.

mod participant;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info};

pub use participant::{CursorData, ParticipantInfo};
use participant::Participant;

use crate::error::SessionError;
use crate::ot::{self, Operation};

/// One accepted edit in a session's history.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct UserOperation {
    pub participant_id: u32,
    pub operation: Operation,
}

/// A roster or cursor change a writer task should forward to its client.
#[derive(Clone, Debug)]
pub enum PresenceEvent {
    Joined(u32, ParticipantInfo),
    Left(u32),
    InfoChanged(u32, ParticipantInfo),
    CursorChanged(u32, CursorData),
}

struct State {
    log: Vec<UserOperation>,
    /// The folded document text, kept current incrementally on every
    /// accepted submission rather than re-folded from the whole log: the
    /// session's critical section must stay O(missed operations), not
    /// O(log length) (`SPEC_FULL.md` §5). The log remains the source of
    /// truth; this is purely a materialization cache.
    text: String,
    /// UTF-16 length of `text`, cached alongside it so `submit` never has
    /// to re-scan the whole document just to check a length.
    text_len: u64,
    participants: HashMap<u32, Participant>,
    language: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            text: String::new(),
            text_len: 0,
            participants: HashMap::new(),
            language: "plaintext".to_string(),
        }
    }
}

/// Maximum length of a document language tag; see `SPEC_FULL.md` §9.
const MAX_LANGUAGE_LEN: usize = 64;

/// The authoritative state machine for one document.
pub struct Session {
    state: RwLock<State>,
    next_participant_id: AtomicU32,
    notify: Notify,
    presence: broadcast::Sender<PresenceEvent>,
}

/// What a newly-attached participant needs to bootstrap its client.
pub struct AttachResult {
    pub participant_id: u32,
    pub revision: u64,
    pub language: String,
    pub operations: Vec<UserOperation>,
    pub roster: Vec<(u32, ParticipantInfo)>,
}

impl Default for Session {
    fn default() -> Self {
        let (presence, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(State::default()),
            next_participant_id: AtomicU32::new(0),
            notify: Notify::new(),
            presence,
        }
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a freshly-created session with one bootstrap operation that
    /// inserts `text`, as if revision 0 already happened. Used by the
    /// registry's archive-restore hook; never called once a session has
    /// any participants.
    pub async fn seed(&self, text: String, language: String) {
        if text.is_empty() && language.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        if !text.is_empty() {
            let op = Operation::builder().insert(text).build();
            state.text = ot::apply(&op, &state.text).expect("seed operation applies to empty text");
            state.text_len = op.target_len();
            state.log.push(UserOperation {
                participant_id: u32::MAX,
                operation: op,
            });
        }
        if !language.is_empty() {
            state.language = truncate_language(&language);
        }
    }

    #[must_use]
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    /// Blocks until the session's log, language, or roster has changed
    /// since the last time this future resolved for this driver.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub async fn current_revision(&self) -> u64 {
        self.state.read().await.log.len() as u64
    }

    pub async fn text(&self) -> String {
        self.state.read().await.text.clone()
    }

    pub async fn participant_count(&self) -> usize {
        self.state.read().await.participants.len()
    }

    /// Registers a new participant and returns what their driver needs to
    /// bootstrap the client connection.
    pub async fn attach(&self) -> AttachResult {
        let id = self.next_participant_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        state.participants.insert(id, Participant::default());
        let roster = state
            .participants
            .iter()
            .filter(|(&pid, _)| pid != id)
            .map(|(&pid, p)| (pid, p.info.clone()))
            .collect();
        let result = AttachResult {
            participant_id: id,
            revision: state.log.len() as u64,
            language: state.language.clone(),
            operations: state.log.clone(),
            roster,
        };
        drop(state);
        debug!(participant_id = id, "participant attached");
        self.presence
            .send(PresenceEvent::Joined(id, ParticipantInfo::default()))
            .ok();
        result
    }

    pub async fn detach(&self, participant_id: u32) {
        let mut state = self.state.write().await;
        state.participants.remove(&participant_id);
        drop(state);
        info!(participant_id, "participant detached");
        self.presence
            .send(PresenceEvent::Left(participant_id))
            .ok();
        self.notify.notify_waiters();
    }

    /// Submits an operation on behalf of `participant_id`, rebasing it
    /// against any operations the participant hasn't seen yet.
    ///
    /// This is the OT core: reject stale claims about the log, rebase by
    /// transforming against everything missed since `parent_revision`,
    /// then append under the same lock that performed the rebase so no
    /// other submission can interleave.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RevisionAhead`] if `parent_revision` is
    /// beyond the current log, [`SessionError::UnknownParticipant`] if
    /// `participant_id` has already detached, and
    /// [`SessionError::InvalidOperation`] if the (possibly rebased)
    /// operation's base length doesn't match the current document length.
    pub async fn submit(
        &self,
        participant_id: u32,
        parent_revision: u64,
        mut operation: Operation,
    ) -> Result<u64, SessionError> {
        let mut state = self.state.write().await;
        if !state.participants.contains_key(&participant_id) {
            return Err(SessionError::UnknownParticipant { participant_id });
        }
        let current_revision = state.log.len() as u64;
        if parent_revision > current_revision {
            return Err(SessionError::RevisionAhead {
                parent_revision,
                current_revision,
            });
        }
        for missed in &state.log[parent_revision as usize..] {
            // `transform`'s tie-break favors its *first* argument's insert
            // at a shared offset; `missed.operation` is already committed
            // to the log, so it goes first and the incoming `operation` is
            // rebased as the *second* operand (`.1`) — giving already-
            // committed concurrent inserts priority over later ones.
            let (_, rebased) = ot::transform(&missed.operation, &operation)
                .map_err(|source| SessionError::InvalidOperation { source })?;
            operation = rebased;
        }
        if operation.base_len() != state.text_len {
            return Err(SessionError::InvalidOperation {
                source: ot::OtError::LengthMismatch {
                    expected: operation.base_len(),
                    actual: state.text_len,
                },
            });
        }
        state.text = ot::apply(&operation, &state.text).map_err(|source| {
            SessionError::InvalidOperation { source }
        })?;
        state.text_len = operation.target_len();
        // Collect cursors that actually moved so they can be rebroadcast to
        // every other participant once the lock is released (`SPEC_FULL.md`
        // §4.B's broadcast discipline: "emit any cursor deltas for
        // participants other than itself").
        let mut moved_cursors = Vec::new();
        for (&pid, participant) in &mut state.participants {
            if let Some(cursor) = &mut participant.cursor {
                let before = cursor.clone();
                for position in &mut cursor.cursors {
                    *position = ot::transform_cursor(*position, &operation);
                }
                for (start, end) in &mut cursor.selections {
                    *start = ot::transform_cursor(*start, &operation);
                    *end = ot::transform_cursor(*end, &operation);
                }
                if *cursor != before {
                    moved_cursors.push((pid, cursor.clone()));
                }
            }
        }
        state.log.push(UserOperation {
            participant_id,
            operation,
        });
        let revision = state.log.len() as u64;
        drop(state);
        for (pid, cursor) in moved_cursors {
            self.presence.send(PresenceEvent::CursorChanged(pid, cursor)).ok();
        }
        self.notify.notify_waiters();
        Ok(revision)
    }

    /// Returns the log entries from `from_revision` onward.
    pub async fn operations_since(&self, from_revision: u64) -> Vec<UserOperation> {
        let state = self.state.read().await;
        let from = from_revision.min(state.log.len() as u64) as usize;
        state.log[from..].to_vec()
    }

    pub async fn update_cursor(&self, participant_id: u32, cursor: CursorData) {
        let mut state = self.state.write().await;
        if let Some(participant) = state.participants.get_mut(&participant_id) {
            participant.cursor = Some(cursor.clone());
        }
        drop(state);
        self.presence
            .send(PresenceEvent::CursorChanged(participant_id, cursor))
            .ok();
    }

    pub async fn set_info(&self, participant_id: u32, info: ParticipantInfo) {
        let mut state = self.state.write().await;
        if let Some(participant) = state.participants.get_mut(&participant_id) {
            participant.info = info.clone();
        }
        drop(state);
        self.presence
            .send(PresenceEvent::InfoChanged(participant_id, info))
            .ok();
    }

    pub async fn set_language(&self, language: String) {
        let language = truncate_language(&language);
        let mut state = self.state.write().await;
        state.language = language;
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn language(&self) -> String {
        self.state.read().await.language.clone()
    }
}

fn truncate_language(language: &str) -> String {
    language.chars().take(MAX_LANGUAGE_LEN).collect()
}

/// Folds a log from the empty string, independently of the cached
/// `State::text`. Used only to check the two stay consistent (Testable
/// Property 8: log-text consistency).
#[cfg(test)]
fn fold_log(log: &[UserOperation]) -> String {
    let mut text = String::new();
    for entry in log {
        text = ot::apply(&entry.operation, &text).expect("logged operations always apply");
    }
    text
}
