//! MJPEG HTTP Server
//!
//! Routes each request by path:
//!
//! ```text
//! StreamServer (axum)
//!   ├─> <stream_path>           multipart stream, one MjpegStreamer per viewer
//!   ├─> <stream_path>/snapshot  latest frame as a single image/jpeg
//!   ├─> /                       index.html from the document root, else the built-in viewer
//!   └─> anything else           static files from the document root (ServeDir)
//! ```
//!
//! # Threading Model
//!
//! - **Connections:** driven by `axum::serve`; request heads are parsed and
//!   size-limited by hyper
//! - **Viewers:** each response body is its own part stream; a viewer that
//!   goes away drops its stream and nothing else
//! - **Frames:** shared through one [`FrameBroadcastBuffer`]; publishing
//!   never waits on viewers
//!
//! Viewers that connect before the first frame simply wait for it.

pub mod mjpeg;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use mjpeg::{multipart_response, MjpegStreamer, BOUNDARY};

use crate::config::ServerConfig;
use crate::video::FrameBroadcastBuffer;

/// State shared by every request handler
struct AppState {
    buffer: Arc<FrameBroadcastBuffer>,
    stream_path: String,
    document_root: PathBuf,
    wait_timeout: Option<Duration>,
    shutdown: CancellationToken,
    active_viewers: Arc<AtomicUsize>,
    next_viewer: AtomicU64,
}

/// Build the request router
///
/// Viewer streams end when `shutdown` fires, so a graceful shutdown does not
/// wait on them.
pub fn router(
    config: &ServerConfig,
    buffer: Arc<FrameBroadcastBuffer>,
    shutdown: CancellationToken,
) -> Router {
    let state = Arc::new(AppState {
        buffer,
        stream_path: config.stream_route().to_string(),
        document_root: config.document_root.clone(),
        wait_timeout: config.client_wait_timeout(),
        shutdown,
        active_viewers: Arc::new(AtomicUsize::new(0)),
        next_viewer: AtomicU64::new(1),
    });

    Router::new()
        .route(config.stream_route(), get(stream))
        .route(&config.snapshot_route(), get(snapshot))
        .route("/", get(index))
        .fallback_service(ServeDir::new(&config.document_root).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bound HTTP server, ready to accept viewers
pub struct StreamServer {
    listener: TcpListener,
    config: ServerConfig,
    buffer: Arc<FrameBroadcastBuffer>,
}

impl StreamServer {
    /// Bind the listening socket
    ///
    /// Failure here is fatal for the process.
    pub async fn bind(config: &ServerConfig, buffer: Arc<FrameBroadcastBuffer>) -> Result<Self> {
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context(format!("Invalid listen address: {}", config.listen_addr))?;

        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {}", addr))?;

        Ok(Self {
            listener,
            config: config.clone(),
            buffer,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr().context("Listener has no local address")?;
        info!("MJPEG server listening on http://{}", addr);
        info!("  Stream:   {}", self.config.stream_route());
        info!("  Snapshot: {}", self.config.snapshot_route());
        info!("  Document root: {}", self.config.document_root.display());

        let app = router(&self.config, self.buffer, shutdown.clone());
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("MJPEG server error")?;

        info!("MJPEG server stopped");
        Ok(())
    }
}

/// Logs attach and detach of one viewer; detach runs when the body is dropped
struct ViewerGuard {
    id: u64,
    frames: u64,
    active: Arc<AtomicUsize>,
}

impl ViewerGuard {
    fn attach(state: &AppState) -> Self {
        let id = state.next_viewer.fetch_add(1, Ordering::Relaxed);
        let active = state.active_viewers.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Viewer {} attached ({} active)", id, active);
        Self {
            id,
            frames: 0,
            active: Arc::clone(&state.active_viewers),
        }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(
            "Viewer {} detached after {} frame(s) ({} active)",
            self.id, self.frames, active
        );
    }
}

async fn stream(State(state): State<Arc<AppState>>) -> Response {
    let mut viewer = ViewerGuard::attach(&state);
    let parts = MjpegStreamer::new(Arc::clone(&state.buffer))
        .with_wait_timeout(state.wait_timeout)
        .into_stream(state.shutdown.clone())
        .map(move |part| {
            viewer.frames += 1;
            part
        });
    multipart_response(parts)
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.buffer.snapshot() {
        (_, Some(frame)) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, mjpeg::CACHE_CONTROL),
            ],
            frame.data().clone(),
        )
            .into_response(),
        (_, None) => (StatusCode::SERVICE_UNAVAILABLE, "No frame captured yet\n").into_response(),
    }
}

async fn index(State(state): State<Arc<AppState>>) -> Response {
    let path = state.document_root.join("index.html");
    match tokio::fs::read(&path).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            debug!("No {} ({}), serving the built-in viewer", path.display(), e);
            Html(viewer_page(&state.stream_path)).into_response()
        }
    }
}

/// Minimal page embedding the stream, served at `/` without an index.html
pub fn viewer_page(stream_path: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
<title>Screen stream</title>\n\
<style>body {{ margin: 0; background: #222; display: flex; align-items: center; justify-content: center; min-height: 100vh; }} img {{ max-width: 100%; max-height: 100vh; }}</style>\n\
</head>\n\
<body>\n\
<img src=\"{}\" alt=\"Live screen\">\n\
</body>\n\
</html>\n",
        stream_path
    )
}
