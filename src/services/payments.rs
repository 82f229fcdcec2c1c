use crate::{
    config::{AppConfig, TossConfig},
    entities::{
        order::{self, OrderStatus},
        order_product, payment,
        payment::{PaymentMethod, PaymentStatus},
        product, user, Order, OrderProduct, Payment, Product, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{ConfirmRequest, GatewayOutcome, PaymentGateway},
    services::orders::ensure_can_access,
    services::settlement::{OrderTransition, SettlementReactor},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const ORDER_NAME_MAX_CHARS: usize = 30;

/// Everything the client needs to open the gateway's payment window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub order_id: String,
    pub amount: i64,
    pub success_url: String,
    pub fail_url: String,
    pub client_key: Option<String>,
    pub order_name: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_mobile_phone: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedPayment {
    #[serde(flatten)]
    pub payment: payment::Model,
    pub order_number: Uuid,
}

/// Cuts `name` to `max` characters, the last one becoming an ellipsis.
fn truncate_chars(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let mut cut: String = name.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Human-readable order name: the first line's product name plus ` 외 {n}건`
/// for the remaining lines.
pub fn order_name(lines: &[order_product::Model]) -> String {
    let Some(first) = lines.first() else {
        return "주문".to_string();
    };
    let name = match first.product_id {
        Some(_) => truncate_chars(&first.product_name, ORDER_NAME_MAX_CHARS),
        None => "상품".to_string(),
    };
    match lines.len() - 1 {
        0 => name,
        rest => format!("{} 외 {}건", name, rest),
    }
}

fn digits_only(raw: Option<&str>) -> String {
    raw.unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

/// External order id for an attempt. The first attempt uses the order's own
/// id; retries after a failed attempt get a numeric suffix. Only an attempt
/// abandoned through the fail redirect leaves the order payable: a gateway
/// rejection fails the order itself.
fn attempt_toss_order_id(order: &order::Model, prior_attempts: u64) -> String {
    match prior_attempts {
        0 => order.toss_order_id(),
        n => format!("{}-{}", order.toss_order_id(), n + 1),
    }
}

/// Ready/confirm handshake with the payment gateway.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    settlement: SettlementReactor,
    event_sender: Arc<EventSender>,
    toss: TossConfig,
    public_base_url: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        settlement: SettlementReactor,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            settlement,
            event_sender,
            toss: config.toss.clone(),
            public_base_url: config.public_base_url(),
        }
    }

    fn redirect_urls(&self) -> (String, String) {
        let success = self.toss.success_url.clone().unwrap_or_else(|| {
            format!("{}/api/v1/payments/toss/success", self.public_base_url)
        });
        let fail = self
            .toss
            .fail_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/v1/payments/toss/fail", self.public_base_url));
        (success, fail)
    }

    /// Returns the order's pending payment, creating it on first call, and
    /// the payload for the gateway's payment window.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn ready_payment(
        &self,
        user: &user::Model,
        order_id: i32,
    ) -> Result<ReadyPayload, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        ensure_can_access(user, &order)?;

        if order.order_status != OrderStatus::Received {
            return Err(ServiceError::OrderNotPayable(order.order_status.to_string()));
        }

        let existing = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Ready))
            .one(&txn)
            .await?;

        let (payment, created) = match existing {
            Some(payment) => (payment, false),
            None => {
                let prior = Payment::find()
                    .filter(payment::Column::OrderId.eq(order.id))
                    .count(&txn)
                    .await?;
                let now = Utc::now();
                let payment = payment::ActiveModel {
                    order_id: Set(order.id),
                    payment_status: Set(PaymentStatus::Ready),
                    payment_method: Set(PaymentMethod::TossPay),
                    payment_amount: Set(order.total_payment),
                    toss_order_id: Set(attempt_toss_order_id(&order, prior)),
                    idempotency_key: Set(Some(Uuid::new_v4().to_string())),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                (payment, true)
            }
        };

        let lines = OrderProduct::find()
            .filter(order_product::Column::OrderId.eq(order.id))
            .order_by_asc(order_product::Column::Id)
            .all(&txn)
            .await?;

        txn.commit().await?;

        if created {
            info!(payment_id = payment.id, toss_order_id = %payment.toss_order_id, "Payment ready");
            self.event_sender
                .send_or_log(Event::PaymentReady {
                    payment_id: payment.id,
                    toss_order_id: payment.toss_order_id.clone(),
                })
                .await;
        }

        let (success_url, fail_url) = self.redirect_urls();
        Ok(ReadyPayload {
            order_id: payment.toss_order_id,
            amount: payment.payment_amount,
            success_url,
            fail_url,
            client_key: self.toss.client_key.clone(),
            order_name: order_name(&lines),
            customer_email: user.email.clone(),
            customer_name: user.username.clone(),
            customer_mobile_phone: digits_only(user.phone_number.as_deref()),
        })
    }

    /// Confirms a payment with the gateway and applies the result.
    ///
    /// Runs in one transaction holding the payment, order and product locks.
    /// The buyer's point balance and stock are re-checked before the gateway
    /// is contacted; a shortfall rolls everything back and leaves the payment
    /// `ready`. A rejection is
    /// committed as failed payment and failed order. An approval decrements
    /// stock, bumps sales and completes the order; settlement then runs after
    /// commit. Confirming an already successful payment returns it unchanged.
    #[instrument(skip(self, payment_key))]
    pub async fn confirm_payment(
        &self,
        payment_key: &str,
        toss_order_id: &str,
        amount: i64,
    ) -> Result<ConfirmedPayment, ServiceError> {
        let txn = self.db.begin().await?;

        let payment = Payment::find()
            .filter(payment::Column::TossOrderId.eq(toss_order_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(toss_order_id.to_string()))?;

        let order = Order::find_by_id(payment.order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("payment {} has no order", payment.id))
            })?;

        if amount != order.total_payment {
            warn!(expected = order.total_payment, received = amount, "amount mismatch");
            return Err(ServiceError::AmountMismatch {
                expected: order.total_payment,
                received: amount,
            });
        }

        match payment.payment_status {
            PaymentStatus::Success => {
                txn.commit().await?;
                info!(payment_id = payment.id, "payment already confirmed");
                return Ok(ConfirmedPayment {
                    payment,
                    order_number: order.order_number,
                });
            }
            PaymentStatus::Failed => {
                return Err(ServiceError::Conflict(format!(
                    "이미 실패 처리된 결제입니다. (코드: {})",
                    payment.fail_code.as_deref().unwrap_or("UNKNOWN")
                )));
            }
            PaymentStatus::Ready => {}
        }

        if order.order_status != OrderStatus::Received {
            return Err(ServiceError::OrderNotPayable(order.order_status.to_string()));
        }

        // Points are debited after commit, so another order may have spent
        // them since this one was created.
        if order.used_point > 0 {
            let available = User::find_by_id(order.user_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .map(|u| u.point_balance)
                .unwrap_or(0);
            if available < order.used_point {
                warn!(
                    user_id = order.user_id,
                    used_point = order.used_point,
                    available,
                    "points short at confirm"
                );
                return Err(ServiceError::InsufficientPoints {
                    requested: order.used_point,
                    available,
                });
            }
        }

        let lines = OrderProduct::find()
            .filter(order_product::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;

        // Requested quantity per product, in lock order.
        let mut wanted: BTreeMap<i32, i32> = BTreeMap::new();
        for line in &lines {
            let product_id = line.product_id.ok_or_else(|| {
                ServiceError::Conflict("삭제된 상품이 포함되어 결제를 진행할 수 없습니다.".into())
            })?;
            *wanted.entry(product_id).or_default() += line.amount;
        }

        let locked = Product::find()
            .filter(product::Column::Id.is_in(wanted.keys().copied()))
            .order_by_asc(product::Column::Id)
            .lock_exclusive()
            .all(&txn)
            .await?;

        for (&product_id, &requested) in &wanted {
            let available = locked
                .iter()
                .find(|p| p.id == product_id)
                .map(|p| p.product_stock)
                .unwrap_or(0);
            if available < requested {
                warn!(product_id, requested, available, "stock short at confirm");
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                });
            }
        }

        let outcome = self
            .gateway
            .confirm(ConfirmRequest {
                payment_key: payment_key.to_string(),
                order_id: toss_order_id.to_string(),
                amount,
                idempotency_key: payment.idempotency_key.clone(),
            })
            .await;

        let now = Utc::now();
        match outcome {
            GatewayOutcome::Rejected { code, message } => {
                let payment_id = payment.id;
                let order_id = order.id;

                let mut failed: payment::ActiveModel = payment.into();
                failed.payment_status = Set(PaymentStatus::Failed);
                failed.fail_code = Set(Some(code.clone()));
                failed.fail_message = Set(Some(message.clone()));
                failed.updated_at = Set(now);
                failed.update(&txn).await?;

                let mut failed_order: order::ActiveModel = order.into();
                failed_order.order_status = Set(OrderStatus::Failed);
                failed_order.updated_at = Set(now);
                failed_order.update(&txn).await?;

                txn.commit().await?;

                counter!("storefront.payments.failed", 1);
                error!(payment_id, order_id, code = %code, "payment rejected by gateway");
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        payment_id,
                        order_id,
                        code: code.clone(),
                    })
                    .await;

                Err(ServiceError::GatewayRejected { code, message })
            }
            GatewayOutcome::Approved { receipt_url, .. } => {
                for product in locked {
                    let requested = wanted.get(&product.id).copied().unwrap_or(0);
                    let stock = product.product_stock - requested;
                    let mut active: product::ActiveModel = product.into();
                    active.product_stock = Set(stock);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }

                self.settlement.record_sales(&txn, order.id).await?;

                let mut succeeded: payment::ActiveModel = payment.into();
                succeeded.payment_status = Set(PaymentStatus::Success);
                succeeded.toss_payment_key = Set(Some(payment_key.to_string()));
                succeeded.receipt_url = Set(receipt_url);
                succeeded.approved_at = Set(Some(now));
                succeeded.updated_at = Set(now);
                let payment = succeeded.update(&txn).await?;

                let from = order.order_status;
                let mut completed: order::ActiveModel = order.into();
                completed.order_status = Set(OrderStatus::Completed);
                completed.updated_at = Set(now);
                let order = completed.update(&txn).await?;

                txn.commit().await?;

                counter!("storefront.payments.confirmed", 1);
                info!(payment_id = payment.id, order_id = order.id, "payment confirmed");
                self.event_sender
                    .send_or_log(Event::PaymentSucceeded {
                        payment_id: payment.id,
                        order_id: order.id,
                        amount: payment.payment_amount,
                    })
                    .await;

                let order_number = order.order_number;
                self.settlement
                    .after_commit(&OrderTransition {
                        order,
                        from,
                        to: OrderStatus::Completed,
                    })
                    .await;

                Ok(ConfirmedPayment {
                    payment,
                    order_number,
                })
            }
        }
    }

    /// Records a failure reported through the gateway's fail redirect. Only a
    /// payment still `ready` is touched; the order stays payable.
    #[instrument(skip(self, message))]
    pub async fn fail_payment(
        &self,
        toss_order_id: &str,
        code: &str,
        message: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(payment) = Payment::find()
            .filter(payment::Column::TossOrderId.eq(toss_order_id))
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        if payment.payment_status != PaymentStatus::Ready {
            txn.commit().await?;
            return Ok(Some(payment));
        }

        let order_id = payment.order_id;
        let mut failed: payment::ActiveModel = payment.into();
        failed.payment_status = Set(PaymentStatus::Failed);
        failed.fail_code = Set(Some(code.to_string()));
        failed.fail_message = Set(Some(message.to_string()));
        failed.updated_at = Set(Utc::now());
        let payment = failed.update(&txn).await?;
        txn.commit().await?;

        counter!("storefront.payments.failed", 1);
        warn!(payment_id = payment.id, code, "payment failed at gateway redirect");
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                payment_id: payment.id,
                order_id,
                code: code.to_string(),
            })
            .await;

        Ok(Some(payment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn line(id: i32, product_id: Option<i32>, name: &str) -> order_product::Model {
        order_product::Model {
            id,
            order_id: 1,
            product_id,
            product_name: name.to_string(),
            amount: 1,
            price: 1_000,
            total_price: 1_000,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn order_name_for_single_line() {
        assert_eq!(order_name(&[line(1, Some(1), "무선 키보드")]), "무선 키보드");
    }

    #[test]
    fn order_name_counts_remaining_lines() {
        let lines = vec![
            line(1, Some(1), "무선 키보드"),
            line(2, Some(2), "마우스"),
            line(3, Some(3), "장패드"),
        ];
        assert_eq!(order_name(&lines), "무선 키보드 외 2건");
    }

    #[test]
    fn order_name_falls_back_for_deleted_product_and_no_lines() {
        assert_eq!(order_name(&[line(1, None, "옛 상품")]), "상품");
        assert_eq!(order_name(&[]), "주문");
    }

    #[test]
    fn long_names_are_cut_to_thirty_chars() {
        let long = "가".repeat(40);
        let name = order_name(&[line(1, Some(1), &long)]);
        assert_eq!(name.chars().count(), 30);
        assert!(name.ends_with('…'));

        let exact = "나".repeat(30);
        assert_eq!(order_name(&[line(1, Some(1), &exact)]), exact);
    }

    #[rstest]
    #[case(Some("010-1234-5678"), "01012345678")]
    #[case(Some("+82 10 1234 5678"), "821012345678")]
    #[case(None, "")]
    fn mobile_phone_keeps_digits(#[case] raw: Option<&str>, #[case] expected: &str) {
        assert_eq!(digits_only(raw), expected);
    }

    #[test]
    fn retry_attempts_get_suffixed_ids() {
        let order = order::Model {
            id: 1,
            order_number: Uuid::nil(),
            user_id: 1,
            address_id: None,
            subtotal: 0,
            product_discount_amount: 0,
            discount_amount: 0,
            delivery_amount: 0,
            total_payment: 0,
            used_point: 0,
            order_status: OrderStatus::Received,
            delivery_status: order::DeliveryStatus::Preparing,
            delivery_request: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let base = format!("ORD-{}", Uuid::nil());
        assert_eq!(attempt_toss_order_id(&order, 0), base);
        assert_eq!(attempt_toss_order_id(&order, 1), format!("{}-2", base));
    }

    mod with_db {
        use super::*;
        use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
        use crate::entities::{order::DeliveryStatus, user};
        use crate::gateway::MockPaymentGateway;
        use crate::services::{carts::CartService, points::PointLedger};
        use assert_matches::assert_matches;
        use tokio::sync::mpsc;

        struct Fixture {
            db: Arc<DatabaseConnection>,
            service: PaymentService,
            toss_order_id: String,
            product_id: i32,
            order_id: i32,
        }

        async fn fixture(gateway: MockPaymentGateway) -> Fixture {
            let db = establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                ..Default::default()
            })
            .await
            .unwrap();
            run_migrations(&db).await.unwrap();
            let db = Arc::new(db);

            let now = Utc::now();
            let buyer = user::ActiveModel {
                username: Set("buyer".into()),
                email: Set("buyer@example.com".into()),
                is_staff: Set(false),
                point_balance: Set(0),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&*db)
            .await
            .unwrap();
            let item = product::ActiveModel {
                product_name: Set("텀블러".into()),
                product_value: Set(20_000),
                discount_rate: Set(rust_decimal::Decimal::ZERO),
                product_stock: Set(5),
                sales: Set(0),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&*db)
            .await
            .unwrap();
            let order = order::ActiveModel {
                order_number: Set(Uuid::new_v4()),
                user_id: Set(buyer.id),
                address_id: Set(None),
                subtotal: Set(20_000),
                product_discount_amount: Set(0),
                discount_amount: Set(0),
                delivery_amount: Set(3_500),
                total_payment: Set(23_500),
                used_point: Set(0),
                order_status: Set(OrderStatus::Received),
                delivery_status: Set(DeliveryStatus::Preparing),
                delivery_request: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&*db)
            .await
            .unwrap();
            order_product::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(Some(item.id)),
                product_name: Set(item.product_name.clone()),
                amount: Set(1),
                price: Set(20_000),
                total_price: Set(20_000),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&*db)
            .await
            .unwrap();

            let (tx, _rx) = mpsc::channel(64);
            let events = Arc::new(EventSender::new(tx));
            let config = AppConfig::new("sqlite::memory:".into(), "test".into());
            let carts = CartService::new(db.clone());
            let ledger = PointLedger::new(db.clone(), events.clone());
            let settlement = SettlementReactor::new(
                db.clone(),
                carts,
                ledger,
                config.points.clone(),
                events.clone(),
            );
            let service = PaymentService::new(
                db.clone(),
                Arc::new(gateway),
                settlement,
                events,
                &config,
            );

            let ready = service.ready_payment(&buyer, order.id).await.unwrap();
            Fixture {
                db,
                service,
                toss_order_id: ready.order_id,
                product_id: item.id,
                order_id: order.id,
            }
        }

        #[tokio::test]
        async fn tampered_amount_never_reaches_the_gateway() {
            let mut gateway = MockPaymentGateway::new();
            gateway.expect_confirm().never();
            let fx = fixture(gateway).await;

            let err = fx
                .service
                .confirm_payment("pk", &fx.toss_order_id, 100)
                .await
                .unwrap_err();
            assert_matches!(
                err,
                ServiceError::AmountMismatch {
                    expected: 23_500,
                    received: 100
                }
            );

            let stock = Product::find_by_id(fx.product_id)
                .one(&*fx.db)
                .await
                .unwrap()
                .unwrap()
                .product_stock;
            assert_eq!(stock, 5);
        }

        #[tokio::test]
        async fn rejection_fails_payment_and_order() {
            let mut gateway = MockPaymentGateway::new();
            gateway
                .expect_confirm()
                .withf(|req| req.amount == 23_500 && req.idempotency_key.is_some())
                .times(1)
                .returning(|_| GatewayOutcome::Rejected {
                    code: "REJECT_CARD_COMPANY".into(),
                    message: "카드사 거절".into(),
                });
            let fx = fixture(gateway).await;

            let err = fx
                .service
                .confirm_payment("pk", &fx.toss_order_id, 23_500)
                .await
                .unwrap_err();
            assert_matches!(err, ServiceError::GatewayRejected { ref code, .. } if code == "REJECT_CARD_COMPANY");

            let stored = Payment::find()
                .filter(payment::Column::TossOrderId.eq(fx.toss_order_id.as_str()))
                .one(&*fx.db)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.payment_status, PaymentStatus::Failed);
            assert_eq!(stored.fail_message.as_deref(), Some("카드사 거절"));

            let order = Order::find_by_id(fx.order_id).one(&*fx.db).await.unwrap().unwrap();
            assert_eq!(order.order_status, OrderStatus::Failed);
        }
    }
}
