// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-participant presence state: who they are, and where their cursor
//! and selections currently sit.

use serde::{Deserialize, Serialize};

/// Display identity for one connected participant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    /// Hue in `[0, 360)`, used by the client to color cursors/selections.
    pub hue: u16,
}

/// Zero or more caret positions and zero or more selection ranges, all in
/// UTF-16 code units at the revision the participant last observed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub cursors: Vec<u64>,
    pub selections: Vec<(u64, u64)>,
}

/// Server-side record of one attached participant.
#[derive(Clone, Debug, Default)]
pub struct Participant {
    pub info: ParticipantInfo,
    pub cursor: Option<CursorData>,
}
