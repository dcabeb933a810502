//! Local HTTP endpoint that makes uploaded payloads playable.
//!
//! Serves `GET /blob/:token` on the blob port (default 8990).  A local
//! track's playback reference is `blob:chronowave/<token>`; mpv is pointed at
//! `http://<bind>:<port>/blob/<token>` instead.  The token is looked up in the
//! in-process `BlobRegistry`, so a revoked reference is a 404 from then on.
//! Payloads kept on disk are read per request, only the range asked for.
//!
//! Single byte ranges are honoured (mpv seeks with them); multi-range
//! requests get the whole payload.
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use chronowave_core::catalog::{BlobRegistry, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    /// Inclusive on both ends.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a `Range` header against a payload of `len` bytes.
pub fn parse_range(header: Option<&str>, len: u64) -> ByteRange {
    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix: the last N bytes
        return match last.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if len == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial {
                start: len.saturating_sub(n),
                end: len - 1,
            },
            Err(_) => ByteRange::Full,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    let end = if last.is_empty() {
        len - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(len - 1),
            _ => return ByteRange::Full,
        }
    };
    ByteRange::Partial { start, end }
}

async fn serve_blob(
    Path(token): Path<String>,
    State(blobs): State<Arc<BlobRegistry>>,
    headers: HeaderMap,
) -> Response {
    let Some(payload) = blobs.resolve(&token) else {
        debug!("blob: unknown or revoked token {}", token);
        return StatusCode::NOT_FOUND.into_response();
    };
    let len = payload.len();
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    let (status, bytes, content_range) = match parse_range(range, len) {
        ByteRange::Full => (StatusCode::OK, payload.read_all().await, None),
        ByteRange::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            payload.read_range(start, end).await,
            Some(format!("bytes {}-{}/{}", start, end, len)),
        ),
        ByteRange::Unsatisfiable => {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", len))],
            )
                .into_response();
        }
    };
    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("blob: cannot read payload for {}: {}", token, e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut response = (
        status,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_LENGTH, bytes.len().to_string()),
        ],
        Body::from(bytes),
    )
        .into_response();
    if let Some(value) = content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}

pub fn router(blobs: Arc<BlobRegistry>) -> Router {
    Router::new()
        .route("/blob/:token", get(serve_blob))
        .with_state(blobs)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    blobs: Arc<BlobRegistry>,
) -> tokio::task::JoinHandle<()> {
    let app = router(blobs);
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind blob server on {}: {}", addr, e);
                return;
            }
        };
        info!("Blob server listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Blob server error: {}", e);
        }
    })
}

/// Base URL mpv uses for `blob:` references.
pub fn base_url(bind_address: &str, port: u16) -> String {
    format!("http://{}:{}", bind_address, port)
}
