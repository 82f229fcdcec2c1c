use super::common::{
    created_response, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::orders::{CreateOrderInput, OrderPreviewInput},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub order_status: String,
}

pub async fn preview_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<OrderPreviewInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let preview = state.services.orders.preview_order(&auth.user, payload).await?;
    Ok(success_response(preview))
}

pub async fn create_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateOrderInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let detail = state.services.orders.create_order(&auth.user, payload).await?;
    Ok(created_response(detail))
}

pub async fn list_orders(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    validate_input(&params)?;
    let (orders, total) = state
        .services
        .orders
        .list_orders(auth.id(), params.page, params.per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        params.per_page,
        total,
    )))
}

pub async fn get_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i32>,
) -> Result<Response, ApiError> {
    let detail = state.services.orders.get_order(&auth.user, order_id).await?;
    Ok(success_response(detail))
}

/// `PATCH /orders/:id`. Only cancellation is accepted.
pub async fn update_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i32>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Response, ApiError> {
    let transition = state
        .services
        .orders
        .update_status(&auth.user, order_id, &payload.order_status)
        .await?;
    info!(order_id, from = %transition.from, to = %transition.to, "order status changed");
    state.services.settlement.after_commit(&transition).await;
    Ok(success_response(transition.order))
}
