use super::common::{created_response, no_content_response, success_response, validate_input};
use crate::{auth::AuthUser, errors::ApiError, services::carts::{AddCartItemInput, UpdateCartItemInput}, AppState};
use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};

pub async fn list_items(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, ApiError> {
    let items = state.services.carts.list_items(auth.id()).await?;
    Ok(success_response(items))
}

pub async fn add_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<AddCartItemInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let item = state.services.carts.add_item(auth.id(), payload).await?;
    Ok(created_response(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(item_id): Path<i32>,
    Json(payload): Json<UpdateCartItemInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let item = state
        .services
        .carts
        .update_item(auth.id(), item_id, payload)
        .await?;
    Ok(success_response(item))
}

pub async fn remove_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(item_id): Path<i32>,
) -> Result<Response, ApiError> {
    state.services.carts.remove_item(auth.id(), item_id).await?;
    Ok(no_content_response())
}
