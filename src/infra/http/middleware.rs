use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

use super::api::ApiError;
use super::public::HttpState;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// User id vouched for by the fronting authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(ApiError::unauthorized)
    }
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Copy the configured trusted header into an [`AuthenticatedUser`] extension.
///
/// Requests without the header, or with a value that is not a user id,
/// pass through unauthenticated.
pub async fn authenticate_user(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(header) = state.auth_header.as_ref() {
        let value = request
            .headers()
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);
        match value.map(str::parse::<i64>) {
            Some(Ok(user_id)) => {
                request.extensions_mut().insert(AuthenticatedUser(user_id));
            }
            Some(Err(err)) => {
                debug!(
                    target = "usericon::http::auth",
                    header = %header,
                    error = %err,
                    "ignoring malformed authenticated user header"
                );
            }
            None => {}
        }
    }

    next.run(request).await
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0);

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "usericon::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                user_id = ?user_id,
                "request failed",
            );
        } else {
            warn!(
                target = "usericon::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                user_id = ?user_id,
                "client request error",
            );
        }
    }

    response
}
