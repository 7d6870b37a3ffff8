// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy. Operational faults are modeled as a typed enum so
//! driver code can match on variant rather than inspect strings; anything
//! outside the session layer (archive I/O, HTTP handlers, process setup)
//! uses `anyhow` the way the rest of this codebase does.

use crate::ot::OtError;

/// A fault raised by a [`crate::session::Session`] while handling a
/// client's request. Every variant here terminates only the originating
/// driver's connection; the session and every other participant keep
/// running. See `SPEC_FULL.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("operation could not be applied: {source}")]
    InvalidOperation {
        #[source]
        source: OtError,
    },

    #[error("client claims parent revision {parent_revision}, but the log is only at {current_revision}")]
    RevisionAhead {
        parent_revision: u64,
        current_revision: u64,
    },

    #[error("participant {participant_id} is not attached to this session")]
    UnknownParticipant { participant_id: u32 },
}
