#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{address, product, user, Product, User},
    events::{self, EventSender},
    gateway::{ConfirmRequest, GatewayOutcome, PaymentGateway},
    handlers::AppServices,
    services::carts::AddCartItemInput,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Gateway double: approves or rejects every call and counts them.
pub struct StubGateway {
    reject_with: Mutex<Option<(String, String)>>,
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn approving() -> Self {
        Self {
            reject_with: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reject_next(&self, code: &str, message: &str) {
        *self.reject_with.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn confirm(&self, request: ConfirmRequest) -> GatewayOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reject_with.lock().unwrap().take() {
            Some((code, message)) => GatewayOutcome::Rejected { code, message },
            None => GatewayOutcome::Approved {
                receipt_url: Some(format!("https://receipt.test/{}", request.order_id)),
                raw: json!({ "status": "DONE", "paymentKey": request.payment_key }),
            },
        }
    }
}

/// Application wired over an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_idle_timeout_secs = 3_600;
        cfg.toss.client_key = Some("test_ck".to_string());
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::approving());
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), gateway.clone(), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<i32>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user_id {
            builder = builder.header("x-user-id", id.to_string());
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn seed_user(&self, username: &str, point_balance: i64) -> user::Model {
        user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(format!("{}@example.com", username)),
            phone_number: Set(Some("010-1234-5678".to_string())),
            is_staff: Set(false),
            point_balance: Set(point_balance),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_address(&self, user_id: i32, is_default: bool) -> address::Model {
        address::ActiveModel {
            user_id: Set(user_id),
            recipient: Set("홍길동".to_string()),
            address: Set("서울시 중구 세종대로 110".to_string()),
            detail_address: Set(Some("3층".to_string())),
            zip_code: Set("04524".to_string()),
            phone_number: Set(None),
            is_default: Set(is_default),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        value: i64,
        discount_rate: Decimal,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            product_name: Set(name.to_string()),
            product_value: Set(value),
            discount_rate: Set(discount_rate),
            product_stock: Set(stock),
            sales: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// User with a default address, ready to check out.
    pub async fn seed_buyer(&self, username: &str, point_balance: i64) -> user::Model {
        let buyer = self.seed_user(username, point_balance).await;
        self.seed_address(buyer.id, true).await;
        buyer
    }

    pub async fn add_to_cart(&self, user_id: i32, product_id: i32, amount: i32) -> i32 {
        self.state
            .services
            .carts
            .add_item(user_id, AddCartItemInput { product_id, amount })
            .await
            .expect("add to cart")
            .id
    }

    pub async fn product(&self, id: i32) -> product::Model {
        Product::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn user(&self, id: i32) -> user::Model {
        User::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query user")
            .expect("user exists")
    }

    /// Creates an order from the whole cart and returns its JSON body.
    pub async fn create_order(&self, user_id: i32, used_point: i64) -> Value {
        let response = self
            .request(
                Method::POST,
                "/api/v1/orders",
                Some(json!({ "used_point": used_point })),
                Some(user_id),
            )
            .await;
        assert_eq!(response.status(), 201, "order creation failed");
        response_json(response).await
    }

    /// Readies a payment for `order_id` and returns the gateway payload.
    pub async fn ready_payment(&self, user_id: i32, order_id: i64) -> Value {
        let response = self
            .request(
                Method::POST,
                "/api/v1/payments",
                Some(json!({ "order_id": order_id })),
                Some(user_id),
            )
            .await;
        assert_eq!(response.status(), 200, "payment ready failed");
        response_json(response).await
    }

    pub async fn confirm(&self, user_id: i32, toss_order_id: &str, amount: i64) -> Response {
        self.request(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({
                "paymentKey": format!("pk_{}", toss_order_id),
                "orderId": toss_order_id,
                "amount": amount,
            })),
            Some(user_id),
        )
        .await
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
