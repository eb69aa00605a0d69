use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header::CONTENT_LENGTH, Request, StatusCode},
    middleware::Next,
    response::Response,
    Error as AxumError,
};
use std::time::Instant;

use crate::middleware::request_id::RequestId;

const MAX_BUFFERED_BODY_BYTES: usize = 64 * 1024;
const MAX_LOGGED_BODY_BYTES: usize = 2048;

/// Logs every 4xx/5xx response with its body. The body is buffered and then
/// forwarded unchanged.
///
/// Rejected credentials and rate-limit denials are routine for an auth
/// service and are logged at debug; other client errors at warn; server
/// errors at error. Bodies are this service's own error JSON, so they never
/// carry request secrets.
pub async fn log_error_responses(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status();

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let event = ErrorEvent {
        status,
        method: &method,
        path: &path,
        request_id: &request_id,
        latency_ms: start.elapsed().as_millis() as u64,
    };
    let (mut parts, body) = response.into_parts();
    match buffer_body(body).await {
        Ok((bytes, preview)) => {
            event.log(&preview);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            parts.headers.remove(CONTENT_LENGTH);
            tracing::error!(
                status = status.as_u16(),
                method = event.method,
                path = event.path,
                request_id = event.request_id,
                error = ?err,
                "Failed to read error response body"
            );
            Response::from_parts(parts, Body::empty())
        }
    }
}

struct ErrorEvent<'a> {
    status: StatusCode,
    method: &'a str,
    path: &'a str,
    request_id: &'a str,
    latency_ms: u64,
}

impl ErrorEvent<'_> {
    fn log(&self, body: &str) {
        let status = self.status.as_u16();
        let (method, path, request_id, latency_ms) =
            (self.method, self.path, self.request_id, self.latency_ms);

        if self.status.is_server_error() {
            tracing::error!(status, method, path, request_id, latency_ms, body, "Request failed");
        } else if matches!(
            self.status,
            StatusCode::UNAUTHORIZED | StatusCode::TOO_MANY_REQUESTS
        ) {
            tracing::debug!(status, method, path, request_id, latency_ms, body, "Request rejected");
        } else {
            tracing::warn!(status, method, path, request_id, latency_ms, body, "Request rejected");
        }
    }
}

async fn buffer_body(body: Body) -> Result<(Bytes, String), AxumError> {
    let bytes = to_bytes(body, MAX_BUFFERED_BODY_BYTES).await?;
    let preview = if bytes.len() > MAX_LOGGED_BODY_BYTES {
        let slice = bytes.slice(0..MAX_LOGGED_BODY_BYTES);
        format!(
            "{}... (truncated, {} bytes total)",
            String::from_utf8_lossy(&slice),
            bytes.len()
        )
    } else {
        String::from_utf8_lossy(&bytes).to_string()
    };
    Ok((bytes, preview))
}
