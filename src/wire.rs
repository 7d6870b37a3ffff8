// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON message framing between a client and the server, one frame per
//! WebSocket text message. Every message is a JSON object with a single
//! discriminating tag field (`serde`'s internally-tagged representation),
//! matching `SPEC_FULL.md` §6's wire tables.

use serde::{Deserialize, Serialize};

use crate::ot::Operation;
use crate::session::{CursorData, ParticipantInfo, UserOperation};

/// A message sent by a client over its WebSocket connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientMessage {
    /// A local edit, to be rebased against `revision` and appended.
    Edit { revision: u64, operation: Operation },
    /// Change the document's language tag.
    SetLanguage { language: String },
    /// Update this participant's display name/hue.
    ClientInfo { name: String, hue: u16 },
    /// Update this participant's cursor/selection state.
    CursorData(CursorData),
}

/// A message sent by the server to one client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerMessage {
    /// The participant id just assigned to this connection.
    Identity { id: u32 },
    /// A contiguous segment of the operation log, starting at `start`.
    History {
        start: u64,
        operations: Vec<UserOperation>,
    },
    /// The document's language tag changed.
    Language { language: String },
    /// A participant's display info was set or changed.
    UserInfo { id: u32, info: ParticipantInfo },
    /// A participant disconnected.
    UserDisconnect { id: u32 },
    /// A participant's cursor/selection changed.
    UserCursor { id: u32, data: CursorData },
}
