use super::common::{success_response, validate_input, PaginatedResponse, PaginationParams};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    response::Response,
};

pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    validate_input(&params)?;
    let (products, total) = state
        .services
        .products
        .list_products(params.page, params.per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        products,
        params.page,
        params.per_page,
        total,
    )))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Response, ApiError> {
    let product = state.services.products.get_product(product_id).await?;
    Ok(success_response(product))
}
