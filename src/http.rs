// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP surface: the `/ws/{id}` upgrade route plus the small read-only
//! `/api/text/{id}` and `/api/stats` routes from `SPEC_FULL.md` §6.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::driver;
use crate::registry::Registry;

/// Maximum accepted length for a document id; generous for a short random
/// token but short enough to keep archive file names sane.
const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Document ids are client-supplied URL path segments (`SPEC_FULL.md` §4.D.1)
/// that the archive collaborator later turns straight into a file name
/// (`SPEC_FULL.md` §4.C.1); reject anything that isn't a plain token so a
/// crafted id can't be used for path traversal or to target a hidden file.
fn is_valid_document_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_DOCUMENT_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub idle_timeout: Duration,
}

/// Builds the full axum router for the service.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:id", get(ws_handler))
        .route("/api/text/:id", get(text_handler))
        .route("/api/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_handler(
    Path(document_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    if !is_valid_document_id(&document_id) {
        return (StatusCode::BAD_REQUEST, "invalid document id").into_response();
    }
    let session = state.registry.get_or_create(&document_id).await;
    let idle_timeout = state.idle_timeout;
    ws.on_upgrade(move |socket| driver::run(socket, session, idle_timeout))
        .into_response()
}

async fn text_handler(
    Path(document_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !is_valid_document_id(&document_id) {
        return (StatusCode::BAD_REQUEST, "invalid document id").into_response();
    }
    let session = state.registry.get_or_create(&document_id).await;
    session.text().await.into_response()
}

#[derive(Serialize)]
struct Stats {
    live_sessions: usize,
    total_participants: usize,
    total_bytes_logged: u64,
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = Stats {
        live_sessions: state.registry.live_session_count(),
        total_participants: state.registry.total_participants().await,
        total_bytes_logged: state.registry.total_bytes_logged().await,
    };
    Json(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_tokens() {
        assert!(is_valid_document_id("doc-1"));
        assert!(is_valid_document_id("AbC_123"));
    }

    #[test]
    fn rejects_traversal_and_dotfiles() {
        assert!(!is_valid_document_id(".."));
        assert!(!is_valid_document_id("."));
        assert!(!is_valid_document_id("../secrets"));
        assert!(!is_valid_document_id(""));
    }

    #[test]
    fn rejects_path_separators_and_oversize_ids() {
        assert!(!is_valid_document_id("a/b"));
        assert!(!is_valid_document_id(&"x".repeat(MAX_DOCUMENT_ID_LEN + 1)));
    }
}
