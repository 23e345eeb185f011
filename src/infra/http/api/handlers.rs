use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::error::HttpError;

use super::super::public::HttpState;
use super::error::ApiError;
use super::models::{reaction_response, user_response};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ReactionQuery {
    limit: Option<u32>,
}

pub(super) async fn get_user(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> Response {
    match state.profiles.profile_by_name(&username).await {
        Ok(Some(profile)) => Json(user_response(profile)).into_response(),
        Ok(None) => ApiError::not_found("User not found").into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

pub(super) async fn list_reactions(
    State(state): State<HttpState>,
    livestream_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<ReactionQuery>, QueryRejection>,
) -> Response {
    let Path(livestream_id) = match livestream_id {
        Ok(path) => path,
        Err(rejection) => {
            return ApiError::bad_request(
                "livestream_id must be an integer",
                Some(rejection.body_text()),
            )
            .into_response();
        }
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return ApiError::bad_request(
                "limit must be a non-negative integer",
                Some(rejection.body_text()),
            )
            .into_response();
        }
    };

    match state.reactions.list(livestream_id, query.limit).await {
        Ok(views) => Json(
            views
                .into_iter()
                .map(reaction_response)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}
