mod error;
mod handlers;
mod models;

pub use error::ApiError;

use axum::{Router, routing::get};

use super::public::HttpState;

/// JSON routes that embed icon hashes in user payloads.
pub fn build_api_router() -> Router<HttpState> {
    Router::new()
        .route("/api/user/{username}", get(handlers::get_user))
        .route(
            "/api/livestream/{livestream_id}/reaction",
            get(handlers::list_reactions),
        )
}
