use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, services::auth_gateway::AuthError, state::AppState};

/// Requires a valid bearer access token and exposes the caller's
/// [`AuthenticatedContext`](crate::services::auth_gateway::AuthenticatedContext)
/// to handlers as a request extension.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = extract_bearer(request.headers());
    let context = state
        .gateway
        .authorize(bearer)
        .inspect_err(|err| {
            if let AuthError::InvalidToken(reason) = err {
                tracing::debug!(reason = reason.reason(), "Rejected access token");
            }
        })?;

    // Activity tracking must never hold up or fail the request.
    let gateway = state.gateway.clone();
    let session_id = context.session_id;
    tokio::spawn(async move {
        gateway.record_activity(session_id).await;
    });

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)
        .filter(|token| !token.is_empty())
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest.trim());
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("BEARER   abc "), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(parse_bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(parse_bearer_token("abc"), None);
    }

    #[test]
    fn empty_bearer_is_treated_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t0k3n"));
        assert_eq!(extract_bearer(&headers), Some("t0k3n"));
    }
}
