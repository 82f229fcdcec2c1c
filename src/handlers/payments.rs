use super::common::{success_response, validate_input};
use crate::{auth::AuthUser, errors::ApiError, AppState};
use axum::{
    extract::{Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ReadyPaymentRequest {
    pub order_id: i32,
}

/// Gateway confirm parameters, as posted by the client or carried on the
/// success redirect.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1))]
    pub payment_key: String,
    #[validate(length(min = 1))]
    pub order_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRedirectParams {
    pub code: Option<String>,
    pub message: Option<String>,
    pub order_id: Option<String>,
}

pub async fn ready_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ReadyPaymentRequest>,
) -> Result<Response, ApiError> {
    let ready = state
        .services
        .payments
        .ready_payment(&auth.user, payload.order_id)
        .await?;
    Ok(success_response(ready))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let confirmed = state
        .services
        .payments
        .confirm_payment(&payload.payment_key, &payload.order_id, payload.amount)
        .await?;
    Ok(success_response(confirmed))
}

/// Success redirect target of the gateway's payment window.
pub async fn toss_success(
    State(state): State<AppState>,
    Query(params): Query<ConfirmPaymentRequest>,
) -> Result<Response, ApiError> {
    validate_input(&params)?;
    let confirmed = state
        .services
        .payments
        .confirm_payment(&params.payment_key, &params.order_id, params.amount)
        .await?;
    Ok(success_response(json!({
        "status": "success",
        "order_number": confirmed.order_number,
        "receipt_url": confirmed.payment.receipt_url,
    })))
}

/// Fail redirect target of the gateway's payment window.
pub async fn toss_fail(
    State(state): State<AppState>,
    Query(params): Query<FailRedirectParams>,
) -> Result<Response, ApiError> {
    let code = params.code.unwrap_or_else(|| "UNKNOWN".to_string());
    let message = params.message.unwrap_or_default();

    if let Some(order_id) = params.order_id.as_deref() {
        state
            .services
            .payments
            .fail_payment(order_id, &code, &message)
            .await?;
    }

    Ok(success_response(json!({
        "status": "fail",
        "code": code,
        "message": message,
        "orderId": params.order_id,
    })))
}
