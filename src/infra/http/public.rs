use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use usericon_api_types::{PostIconRequest, PostIconResponse};

use crate::{
    application::{
        error::HttpError,
        icons::{IconFetch, IconService},
        reactions::ReactionFeedService,
        repos::HealthRepo,
        users::UserProfileService,
    },
    domain::icons::IconHash,
};

use super::{
    api::{ApiError, build_api_router},
    db_health_response,
    middleware::{AuthenticatedUser, authenticate_user, log_responses, set_request_context},
    repo_error_to_http,
};

const ICON_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Clone)]
pub struct HttpState {
    pub icons: IconService,
    pub profiles: UserProfileService,
    pub reactions: ReactionFeedService,
    pub health: Arc<dyn HealthRepo>,
    pub auth_header: Option<HeaderName>,
    pub upload_limit_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let upload_limit = state.upload_limit_bytes;

    Router::new()
        .route("/icon/{username}", get(get_icon))
        .route(
            "/icon",
            post(post_icon).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/_health/db", get(public_health))
        .merge(build_api_router())
        .with_state(state.clone())
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn_with_state(state, authenticate_user))
        .layer(middleware::from_fn(set_request_context))
}

async fn get_icon(
    State(state): State<HttpState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Response {
    const SOURCE: &str = "infra::http::public::get_icon";

    let user = match state.profiles.find_by_name(&username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "User not found",
                format!("no user named `{username}`"),
            )
            .into_response();
        }
        Err(err) => return repo_error_to_http(SOURCE, err).into_response(),
    };

    let validator = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    match state.icons.fetch(user.id, validator).await {
        Ok(IconFetch::NotModified { hash }) => build_not_modified_response(&hash),
        Ok(IconFetch::Found { hash, bytes }) => build_icon_response(&hash, bytes),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_icon(
    State(state): State<HttpState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    body: Bytes,
) -> Response {
    let request: PostIconRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::bad_request("Malformed icon upload", Some(err.to_string()))
                .into_response();
        }
    };

    match state
        .icons
        .replace_icon(user_id, Bytes::from(request.image))
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(PostIconResponse { id })).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.ping().await)
}

fn build_icon_response(hash: &IconHash, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ICON_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    insert_validator_headers(headers, hash);

    response
}

fn build_not_modified_response(hash: &IconHash) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    insert_validator_headers(response.headers_mut(), hash);
    response
}

fn insert_validator_headers(headers: &mut HeaderMap, hash: &IconHash) {
    if let Ok(value) = HeaderValue::from_str(&hash.etag()) {
        headers.insert(ETAG, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
}
