// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-connection protocol driver: bridges one client's WebSocket to
//! a [`Session`], as described in `SPEC_FULL.md` §4.D.
//!
//! Each connection gets two cooperating tasks, exactly as the spec's
//! broadcast discipline assumes: a reader task that decodes inbound
//! frames and calls straight into the session, and a writer task that
//! blocks on the session's notifier and flushes whatever changed. They
//! must be genuinely separate tasks rather than two branches of one
//! `select!`: the writer has to stay parked on the notifier so that a
//! participant's own submission always wakes it, including when nothing
//! else in the session changes afterwards. A combined loop would drop
//! its own notifier registration the instant it picks the read branch,
//! silently losing the echo the client is waiting on.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::session::{ParticipantInfo, PresenceEvent, Session, UserOperation};
use crate::wire::{ClientMessage, ServerMessage};

/// Drives one client's connection to `session` until it disconnects.
/// `idle_timeout` bounds how long the reader waits for a frame before
/// treating the connection as idle and closing it (`SPEC_FULL.md` §4.D.1).
pub async fn run(socket: WebSocket, session: Arc<Session>, idle_timeout: Duration) {
    let (sink, mut stream) = socket.split();

    let attach = session.attach().await;
    let participant_id = attach.participant_id;

    let mut writer = tokio::spawn(write_loop(
        Arc::clone(&session),
        sink,
        participant_id,
        attach.language,
        attach.operations,
        attach.roster,
    ));

    loop {
        tokio::select! {
            frame = timeout(idle_timeout, stream.next()) => {
                match frame {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if !handle_inbound(&session, participant_id, &text).await {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Ok(_))) => {} // ignore ping/pong/binary frames
                    Ok(Some(Err(error))) => {
                        warn!(participant_id, %error, "websocket read error");
                        break;
                    }
                    Err(_elapsed) => {
                        debug!(participant_id, "connection idle, closing");
                        break;
                    }
                }
            }
            result = &mut writer => {
                if let Err(error) = result {
                    if !error.is_cancelled() {
                        warn!(participant_id, %error, "writer task failed");
                    }
                }
                break;
            }
        }
    }

    writer.abort();
    session.detach(participant_id).await;
}

/// Decodes and dispatches one inbound text frame. Returns `false` if the
/// connection should be closed (operational fault, per `SPEC_FULL.md` §7).
async fn handle_inbound(session: &Session, participant_id: u32, text: &str) -> bool {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            warn!(participant_id, %error, "malformed client message");
            return false;
        }
    };
    match message {
        ClientMessage::Edit { revision, operation } => {
            match session.submit(participant_id, revision, operation).await {
                Ok(_) => true,
                Err(error) => {
                    warn!(participant_id, %error, "rejecting submission");
                    false
                }
            }
        }
        ClientMessage::SetLanguage { language } => {
            session.set_language(language).await;
            true
        }
        ClientMessage::ClientInfo { name, hue } => {
            session
                .set_info(participant_id, ParticipantInfo { name, hue })
                .await;
            true
        }
        ClientMessage::CursorData(cursor) => {
            session.update_cursor(participant_id, cursor).await;
            true
        }
    }
}

/// Sends the bootstrap messages, then loops forever flushing log growth,
/// language changes, and presence deltas as the session's notifier and
/// presence channel report them.
async fn write_loop(
    session: Arc<Session>,
    mut sink: SplitSink<WebSocket, Message>,
    participant_id: u32,
    language: String,
    initial_operations: Vec<UserOperation>,
    roster: Vec<(u32, ParticipantInfo)>,
) {
    let mut last_sent_revision = initial_operations.len() as u64;
    let mut last_sent_language = language.clone();

    if send(&mut sink, &ServerMessage::Identity { id: participant_id })
        .await
        .is_err()
    {
        return;
    }
    for (id, info) in roster {
        if send(&mut sink, &ServerMessage::UserInfo { id, info })
            .await
            .is_err()
        {
            return;
        }
    }
    if send(&mut sink, &ServerMessage::Language { language })
        .await
        .is_err()
    {
        return;
    }
    if send(
        &mut sink,
        &ServerMessage::History {
            start: 0,
            operations: initial_operations,
        },
    )
    .await
    .is_err()
    {
        return;
    }

    let mut presence = session.subscribe_presence();

    loop {
        tokio::select! {
            () = session.notified() => {
                if !flush_log(&session, &mut sink, &mut last_sent_revision).await {
                    break;
                }
                if !flush_language(&session, &mut sink, &mut last_sent_language).await {
                    break;
                }
            }
            event = presence.recv() => {
                match event {
                    Ok(event) => {
                        if send_presence(&mut sink, participant_id, event).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Sends every log entry the client hasn't seen yet. Returns `false` on
/// send failure (socket gone).
async fn flush_log(
    session: &Session,
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    last_sent_revision: &mut u64,
) -> bool {
    let operations = session.operations_since(*last_sent_revision).await;
    if operations.is_empty() {
        return true;
    }
    let message = ServerMessage::History {
        start: *last_sent_revision,
        operations: operations.clone(),
    };
    *last_sent_revision += operations.len() as u64;
    send(sink, &message).await.is_ok()
}

/// Sends a `Language` update if the tag changed since the last one this
/// driver sent. Returns `false` on send failure.
async fn flush_language(
    session: &Session,
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    last_sent_language: &mut String,
) -> bool {
    let language = session.language().await;
    if language == *last_sent_language {
        return true;
    }
    let sent = send(sink, &ServerMessage::Language { language: language.clone() })
        .await
        .is_ok();
    if sent {
        *last_sent_language = language;
    }
    sent
}

async fn send_presence(
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    participant_id: u32,
    event: PresenceEvent,
) -> Result<(), axum::Error> {
    let message = match event {
        PresenceEvent::Joined(id, info) | PresenceEvent::InfoChanged(id, info) => {
            if id == participant_id {
                return Ok(());
            }
            ServerMessage::UserInfo { id, info }
        }
        PresenceEvent::Left(id) => {
            if id == participant_id {
                return Ok(());
            }
            ServerMessage::UserDisconnect { id }
        }
        PresenceEvent::CursorChanged(id, data) => {
            if id == participant_id {
                return Ok(());
            }
            ServerMessage::UserCursor { id, data }
        }
    };
    send(sink, &message).await
}

async fn send(
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("ServerMessage always serializes");
    sink.send(Message::Text(text)).await
}
