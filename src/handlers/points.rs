use super::common::success_response;
use crate::{auth::AuthUser, errors::ApiError, AppState};
use axum::{extract::State, response::Response};

/// Current balance and ledger history, newest first.
pub async fn get_points(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, ApiError> {
    let summary = state.services.points.summary(auth.id()).await?;
    Ok(success_response(summary))
}
