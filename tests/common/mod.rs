// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared scaffolding for the end-to-end scenario tests: spins up the real
//! `http::router`/`driver::run` stack on an ephemeral port and drives it
//! with genuine WebSocket clients, the way `fuzzer.rs`/`vim-plugin.rs` drive
//! a real daemon process rather than calling its internals directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use scriptorium::http::{self, AppState};
use scriptorium::registry::Registry;
use scriptorium::wire::{ClientMessage, ServerMessage};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts the full service on `127.0.0.1:0` and returns its `ws://` base
/// URL. The server task runs for the rest of the test process; it is never
/// explicitly shut down since the process exits when the test does.
pub async fn spawn_server() -> String {
    let registry = Arc::new(Registry::new(None, 16));
    let app = http::router(AppState {
        registry,
        idle_timeout: Duration::from_secs(60),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server task failed");
    });
    format!("ws://{addr}")
}

/// Opens a WebSocket connection to `document_id` on `base`.
pub async fn connect(base: &str, document_id: &str) -> ClientSocket {
    let (socket, _response) = connect_async(format!("{base}/ws/{document_id}"))
        .await
        .expect("websocket handshake");
    socket
}

pub async fn send(socket: &mut ClientSocket, message: &ClientMessage) {
    let text = serde_json::to_string(message).expect("ClientMessage always serializes");
    socket.send(Message::Text(text)).await.expect("send over websocket");
}

/// Reads the next `ServerMessage`, skipping anything that isn't a text frame.
pub async fn recv(socket: &mut ClientSocket) -> ServerMessage {
    loop {
        match socket.next().await.expect("socket closed unexpectedly") {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).expect("valid ServerMessage"),
            Ok(_) => continue,
            Err(error) => panic!("websocket read error: {error}"),
        }
    }
}

/// Reads server messages until one matches `predicate`, returning it.
/// Used to skip presence/roster chatter while waiting for a specific reply.
pub async fn recv_until(
    socket: &mut ClientSocket,
    mut predicate: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let message = recv(socket).await;
        if predicate(&message) {
            return message;
        }
    }
}
