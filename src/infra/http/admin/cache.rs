use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::application::error::HttpError;

use super::AdminState;

pub(super) async fn clear_icon_cache(State(state): State<AdminState>) -> Response {
    match state.icons.clear_caches().await {
        Ok(report) => {
            info!(
                target = "usericon::http::admin",
                removed = report.removed,
                failed = report.failed,
                "icon cache cleared by administrator"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}
