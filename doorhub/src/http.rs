//! HTTP surface: client app assets and the live MJPEG stream.
//!
//! Each `/stream.mjpg` connection gets its own frame reader and loop; a
//! disconnected client only tears down its own stream, never the others.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use doorhub_core::frame::{FrameBuffer, FrameReader};

/// Multipart boundary token shared with the client application.
const MJPEG_BOUNDARY: &str = "FRAME";

/// Bounded wait per stream iteration; keeps per-connection loops responsive
/// to writer shutdown even when no frames are flowing.
const STREAM_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    pub buffer: FrameBuffer,
    pub asset_root: PathBuf,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::permanent("/index.html") }))
        .route("/index.html", get(index_page))
        .route("/client_app.js", get(client_script))
        .route("/client_app_styles.css", get(client_styles))
        .route("/stream.mjpg", get(handle_mjpeg_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_page(State(state): State<AppState>) -> Result<Response, StatusCode> {
    serve_asset(&state, "html_pages/client_ring_app.html", "text/html").await
}

async fn client_script(State(state): State<AppState>) -> Result<Response, StatusCode> {
    serve_asset(&state, "js/client_app.js", "application/javascript").await
}

async fn client_styles(State(state): State<AppState>) -> Result<Response, StatusCode> {
    serve_asset(&state, "css/client_app_styles.css", "text/css").await
}

async fn serve_asset(
    state: &AppState,
    relative_path: &str,
    content_type: &'static str,
) -> Result<Response, StatusCode> {
    let path = state.asset_root.join(relative_path);
    let content = tokio::fs::read(&path).await.map_err(|e| {
        warn!(path = %path.display(), "Client asset unavailable: {e}");
        StatusCode::NOT_FOUND
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(content))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Handle one MJPEG stream connection.
async fn handle_mjpeg_stream(State(state): State<AppState>) -> Response {
    info!("MJPEG stream client connected");
    let reader = state.buffer.reader();

    let stream = futures::stream::unfold(reader, |mut reader: FrameReader| async move {
        loop {
            match reader.next_frame(STREAM_WAIT).await {
                Some(frame) => {
                    return Some((Ok::<_, Infallible>(encode_part(&frame.data)), reader));
                }
                None => {
                    // Timeout while capture is idle: keep waiting. End the
                    // stream only once the frame writer is gone entirely.
                    if !reader.is_live() {
                        debug!("Frame source closed, ending stream");
                        return None;
                    }
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache, private")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// One multipart chunk: boundary marker, part headers, JPEG bytes, delimiter.
fn encode_part(jpeg: &Bytes) -> Bytes {
    let head = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );

    let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
