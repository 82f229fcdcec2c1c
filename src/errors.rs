use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Field-level errors, or gateway `{detail, code, message}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },

    /// Several rejected fields, already shaped as `{field: [message, ..]}`.
    #[error("입력값이 올바르지 않습니다.")]
    InvalidFields(Value),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("선택된 장바구니가 비어 있습니다.")]
    EmptyCart,

    #[error("배송지 ID를 전달하지 않았고, 기본 배송지도 없습니다.")]
    NoDefaultAddress,

    #[error("보유 포인트({available})보다 많이 사용할 수 없습니다.")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("보유 포인트가 {minimum}P 이상일 때만 사용 가능합니다.")]
    PointThresholdNotMet { minimum: i64, available: i64 },

    #[error("재고 부족: 상품(id={product_id}) 요청 {requested}, 재고 {available}")]
    InsufficientStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("결제 금액이 0보다 작을 수 없습니다.")]
    InvalidPayment { total_payment: i64 },

    #[error("이 주문은 결제가 불가한 상태입니다. (현재 상태: {0})")]
    OrderNotPayable(String),

    #[error("결제 정보 없음: {0}")]
    PaymentNotFound(String),

    #[error("금액 불일치: 주문 금액 {expected}, 요청 금액 {received}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("결제 승인 실패: [{code}] {message}")]
    GatewayRejected { code: String, message: String },

    #[error("포인트 잔액이 부족합니다. (잔액 {balance}, 변경 {delta})")]
    InsufficientBalance { balance: i64, delta: i64 },

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Flattens validator output into `{field: [message, ..]}`. Rules without a
/// message fall back to their code.
pub fn field_error_details(err: &validator::ValidationErrors) -> Value {
    let fields: serde_json::Map<String, Value> = err
        .field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages = errors
                .iter()
                .map(|e| match &e.message {
                    Some(message) => Value::String(message.to_string()),
                    None => Value::String(format!("invalid value ({})", e.code)),
                })
                .collect();
            (field.to_string(), Value::Array(messages))
        })
        .collect();
    Value::Object(fields)
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidFields(field_error_details(&err))
    }
}

impl ServiceError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidField { .. }
            | Self::InvalidFields(_)
            | Self::EmptyCart
            | Self::NoDefaultAddress
            | Self::InsufficientPoints { .. }
            | Self::PointThresholdNotMet { .. }
            | Self::InvalidPayment { .. }
            | Self::OrderNotPayable(_)
            | Self::AmountMismatch { .. }
            | Self::GatewayRejected { .. }
            | Self::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured details for the response body.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidField { field, message } => Some(json!({ field.as_str(): [message] })),
            Self::InvalidFields(fields) => Some(fields.clone()),
            Self::EmptyCart => Some(json!({ "cart": [self.to_string()] })),
            Self::NoDefaultAddress => Some(json!({ "address": [self.to_string()] })),
            Self::InsufficientPoints { .. }
            | Self::PointThresholdNotMet { .. } => Some(json!({ "used_point": [self.to_string()] })),
            Self::InvalidPayment { .. } => Some(json!({ "total_payment": [self.to_string()] })),
            Self::InsufficientStock { product_id, .. } => Some(json!({
                "stock": [self.to_string()],
                "product_id": product_id,
            })),
            Self::GatewayRejected { code, message } => Some(json!({
                "detail": "결제 승인 실패",
                "code": code,
                "message": message,
            })),
            Self::AmountMismatch { .. } | Self::OrderNotPayable(_) => {
                Some(json!({ "detail": self.to_string() }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Handler-level error: malformed input caught before a service runs.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(service_error) => service_error.into_response(),
            ApiError::ValidationError(errors) => ServiceError::from(errors).into_response(),
            ApiError::Unauthorized => {
                ServiceError::Unauthorized("authentication required".to_string()).into_response()
            }
        }
    }
}
