//! Listener polling endpoint.
//!
//! Serves `GET /status` and the synthesized audio files on a port of its
//! own, reachable from the congregation's network. Nothing administrative is
//! routed here: phones can poll, and that is all they can do.

use crate::broadcast::state::{ListenerBroadcastState, ListenerSnapshot};
use crate::error::{PredikaError, Result};
use axum::Json;
use axum::extract::{Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct AppState {
    broadcast: Arc<ListenerBroadcastState>,
    audio_dir: PathBuf,
}

/// The listener HTTP service.
pub struct ListenerServer {
    broadcast: Arc<ListenerBroadcastState>,
    audio_dir: PathBuf,
    port: u16,
}

impl ListenerServer {
    pub fn new(broadcast: Arc<ListenerBroadcastState>, audio_dir: PathBuf, port: u16) -> Self {
        Self {
            broadcast,
            audio_dir,
            port,
        }
    }

    /// Serves until `shutdown` resolves.
    ///
    /// Binds on all interfaces: the whole point is that phones in the room
    /// can reach it. Only run after the pipeline is up; torn down last during
    /// shutdown so pollers see the final line.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let state = AppState {
            broadcast: self.broadcast,
            audio_dir: self.audio_dir,
        };

        let app = axum::Router::new()
            .route("/status", get(status_handler))
            .route("/audio/{file}", get(audio_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| PredikaError::Listener {
                    message: format!("bind {} failed: {}", addr, e),
                })?;
        info!("listener endpoint on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| PredikaError::Listener {
                message: e.to_string(),
            })
    }
}

/// `GET /status`: stateless, idempotent, safe to poll every second.
async fn status_handler(State(state): State<AppState>) -> Json<ListenerSnapshot> {
    Json(state.broadcast.snapshot())
}

/// `GET /audio/{file}`: serves synthesized audio out of the audio directory.
async fn audio_handler(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> impl IntoResponse {
    // Only bare filenames: no separators, no parent traversal.
    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.audio_dir.join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
