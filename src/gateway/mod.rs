//! Payment gateway seam. Services depend on [`PaymentGateway`]; production
//! wires in [`TossPaymentsClient`], tests substitute a mock or stub.

use crate::{config::TossConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

const CONFIRM_PATH: &str = "/v1/payments/confirm";
const UNKNOWN_CODE: &str = "UNKNOWN";
const UNKNOWN_MESSAGE: &str = "승인 실패";

/// Approval request forwarded to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// What the gateway decided. Transport failures surface as `Rejected`.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Approved {
        receipt_url: Option<String>,
        raw: Value,
    },
    Rejected {
        code: String,
        message: String,
    },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(&self, request: ConfirmRequest) -> GatewayOutcome;
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// HTTP client for the Toss Payments confirm API.
#[derive(Clone)]
pub struct TossPaymentsClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl TossPaymentsClient {
    pub fn new(config: &TossConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn rejected_from_body(body: &[u8]) -> GatewayOutcome {
        match serde_json::from_slice::<GatewayErrorBody>(body) {
            Ok(parsed) => GatewayOutcome::Rejected {
                code: parsed.code.unwrap_or_else(|| UNKNOWN_CODE.to_string()),
                message: parsed.message.unwrap_or_else(|| UNKNOWN_MESSAGE.to_string()),
            },
            Err(_) => GatewayOutcome::Rejected {
                code: UNKNOWN_CODE.to_string(),
                message: UNKNOWN_MESSAGE.to_string(),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for TossPaymentsClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    async fn confirm(&self, request: ConfirmRequest) -> GatewayOutcome {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, CONFIRM_PATH))
            .basic_auth(&self.secret_key, Some(""))
            .json(&request);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let code = if e.is_timeout() { "TIMEOUT" } else { "NETWORK_ERROR" };
                warn!(error = %e, code, "payment confirm request failed");
                return GatewayOutcome::Rejected {
                    code: code.to_string(),
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read gateway response");
                return GatewayOutcome::Rejected {
                    code: "NETWORK_ERROR".to_string(),
                    message: e.to_string(),
                };
            }
        };

        if status != reqwest::StatusCode::OK {
            let outcome = Self::rejected_from_body(&body);
            warn!(status = status.as_u16(), ?outcome, "payment confirm rejected");
            return outcome;
        }

        let raw: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let receipt_url = raw
            .get("receipt")
            .and_then(|r| r.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        info!("payment confirm approved");
        GatewayOutcome::Approved { receipt_url, raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TossPaymentsClient {
        let config = TossConfig {
            secret_key: "test_sk".to_string(),
            api_base_url: server.uri(),
            timeout_secs: 2,
            ..TossConfig::default()
        };
        TossPaymentsClient::new(&config).unwrap()
    }

    fn request() -> ConfirmRequest {
        ConfirmRequest {
            payment_key: "pk_1".to_string(),
            order_id: "ORD-abc".to_string(),
            amount: 15_000,
            idempotency_key: Some("idem-1".to_string()),
        }
    }

    #[tokio::test]
    async fn approved_response_yields_receipt_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/confirm"))
            .and(header("authorization", "Basic dGVzdF9zazo="))
            .and(header("idempotency-key", "idem-1"))
            .and(body_json(json!({
                "paymentKey": "pk_1",
                "orderId": "ORD-abc",
                "amount": 15000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "DONE",
                "receipt": { "url": "https://receipt.example/1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).confirm(request()).await;
        match outcome {
            GatewayOutcome::Approved { receipt_url, raw } => {
                assert_eq!(receipt_url.as_deref(), Some("https://receipt.example/1"));
                assert_eq!(raw["status"], "DONE");
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_body_is_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/confirm"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "REJECT_CARD_COMPANY",
                "message": "카드사 거절"
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server).confirm(request()).await;
        assert_eq!(
            outcome,
            GatewayOutcome::Rejected {
                code: "REJECT_CARD_COMPANY".to_string(),
                message: "카드사 거절".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unparseable_error_falls_back_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let outcome = client_for(&server).confirm(request()).await;
        assert_eq!(
            outcome,
            GatewayOutcome::Rejected {
                code: "UNKNOWN".to_string(),
                message: "승인 실패".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_rejection() {
        let config = TossConfig {
            secret_key: "test_sk".to_string(),
            api_base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..TossConfig::default()
        };
        let client = TossPaymentsClient::new(&config).unwrap();

        match client.confirm(request()).await {
            GatewayOutcome::Rejected { code, .. } => {
                assert!(code == "NETWORK_ERROR" || code == "TIMEOUT", "code was {}", code)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
