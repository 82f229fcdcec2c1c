use crate::{
    entities::{
        address, cart, cart_item,
        order::{self, DeliveryStatus, OrderStatus},
        order_product, payment,
        payment::PaymentStatus,
        product, user, Address, Cart, CartItem, Order, OrderProduct, Payment, Product, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{self, LineInput, PriceBreakdown, PricedLine, PricingPolicy},
    services::settlement::OrderTransition,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct OrderPreviewInput {
    #[serde(default)]
    pub used_point: i64,
    #[serde(default)]
    pub cart_item_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateOrderInput {
    /// Shipping address id; the default address is used when omitted
    #[serde(default)]
    pub address: Option<i32>,
    #[serde(default)]
    pub used_point: i64,
    #[serde(default)]
    pub cart_item_ids: Option<Vec<i32>>,
    #[serde(default)]
    #[validate(length(max = 255, message = "배송 요청사항은 255자를 넘을 수 없습니다."))]
    pub delivery_request: Option<String>,
}

/// Priced cart without persistence.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPreview {
    pub lines: Vec<PricedLine>,
    #[serde(flatten)]
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub order_products: Vec<order_product::Model>,
    pub payments: Vec<payment::Model>,
}

/// Owner or staff may see an order.
pub(crate) fn ensure_can_access(user: &user::Model, order: &order::Model) -> Result<(), ServiceError> {
    if order.user_id == user.id || user.is_staff {
        Ok(())
    } else {
        Err(ServiceError::Forbidden("권한 없음".to_string()))
    }
}

/// Turns a user's cart into priced, immutable orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    policy: PricingPolicy,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        policy: PricingPolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            policy,
        }
    }

    /// The user's cart items, optionally narrowed to `ids`. Empty selections
    /// are rejected.
    async fn selected_cart_items<C>(
        conn: &C,
        user_id: i32,
        ids: Option<&[i32]>,
    ) -> Result<Vec<cart_item::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        else {
            return Err(ServiceError::EmptyCart);
        };

        let mut query = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::Id);
        if let Some(ids) = ids.filter(|ids| !ids.is_empty()) {
            query = query.filter(cart_item::Column::Id.is_in(ids.iter().copied()));
        }

        let items = query.all(conn).await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        Ok(items)
    }

    async fn resolve_address<C>(
        conn: &C,
        user_id: i32,
        address_id: Option<i32>,
    ) -> Result<address::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        match address_id {
            Some(id) => {
                let found = Address::find_by_id(id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", id)))?;
                if found.user_id != user_id {
                    return Err(ServiceError::Forbidden(
                        "본인 배송지만 사용할 수 있습니다.".to_string(),
                    ));
                }
                Ok(found)
            }
            None => Address::find()
                .filter(address::Column::UserId.eq(user_id))
                .filter(address::Column::IsDefault.eq(true))
                .one(conn)
                .await?
                .ok_or(ServiceError::NoDefaultAddress),
        }
    }

    async fn point_balance<C>(conn: &C, user_id: i32) -> Result<i64, ServiceError>
    where
        C: ConnectionTrait,
    {
        User::find_by_id(user_id)
            .one(conn)
            .await?
            .map(|u| u.point_balance)
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    /// Prices the selected cart lines against live product data. Lines whose
    /// product was deleted are left out; stock is not checked.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn preview_order(
        &self,
        user: &user::Model,
        input: OrderPreviewInput,
    ) -> Result<OrderPreview, ServiceError> {
        input.validate()?;
        let conn = &*self.db;

        let items = Self::selected_cart_items(conn, user.id, input.cart_item_ids.as_deref()).await?;
        let available = Self::point_balance(conn, user.id).await?;
        pricing::validate_point_usage(input.used_point, available, &self.policy)?;

        let product_ids: Vec<i32> = items.iter().filter_map(|i| i.product_id).collect();
        let products: HashMap<i32, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let lines: Vec<LineInput> = items
            .iter()
            .filter_map(|item| {
                let product = products.get(&item.product_id?)?;
                Some(line_input(product, item.amount))
            })
            .collect();

        let quote = pricing::quote(&lines, input.used_point, available, &self.policy)?;
        Ok(OrderPreview {
            lines: quote.lines,
            breakdown: quote.breakdown,
        })
    }

    /// Creates an order from the user's cart in one transaction.
    ///
    /// Products are locked in id order and their stock checked, but stock is
    /// only decremented when the payment is confirmed. The cart is left as is.
    #[instrument(skip(self, user, input), fields(user_id = user.id))]
    pub async fn create_order(
        &self,
        user: &user::Model,
        input: CreateOrderInput,
    ) -> Result<OrderDetail, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let address = Self::resolve_address(&txn, user.id, input.address).await?;
        let items =
            Self::selected_cart_items(&txn, user.id, input.cart_item_ids.as_deref()).await?;
        let available = Self::point_balance(&txn, user.id).await?;
        pricing::validate_point_usage(input.used_point, available, &self.policy)?;

        let mut product_ids: Vec<i32> = items.iter().filter_map(|i| i.product_id).collect();
        product_ids.sort_unstable();
        product_ids.dedup();

        let locked: HashMap<i32, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .order_by_asc(product::Column::Id)
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = item
                .product_id
                .and_then(|id| locked.get(&id))
                .ok_or_else(|| {
                    ServiceError::invalid_field(
                        "product",
                        format!("장바구니 항목(id={})의 상품 정보를 찾을 수 없습니다.", item.id),
                    )
                })?;
            if product.product_stock < item.amount {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    requested: item.amount,
                    available: product.product_stock,
                });
            }
            lines.push(line_input(product, item.amount));
        }

        let quote = pricing::quote(&lines, input.used_point, available, &self.policy)?;
        let breakdown = quote.breakdown;
        let now = Utc::now();

        let order = order::ActiveModel {
            order_number: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            address_id: Set(Some(address.id)),
            subtotal: Set(breakdown.subtotal),
            product_discount_amount: Set(breakdown.product_discount_amount),
            discount_amount: Set(breakdown.discount_amount),
            delivery_amount: Set(breakdown.delivery_amount),
            total_payment: Set(breakdown.total_payment),
            used_point: Set(breakdown.used_point),
            order_status: Set(OrderStatus::Received),
            delivery_status: Set(DeliveryStatus::Preparing),
            delivery_request: Set(input.delivery_request),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut order_products = Vec::with_capacity(quote.lines.len());
        for line in &quote.lines {
            let row = order_product::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(Some(line.product_id)),
                product_name: Set(line.product_name.clone()),
                amount: Set(line.amount),
                price: Set(line.discounted_unit_price),
                total_price: Set(line.line_total),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            order_products.push(row);
        }

        txn.commit().await?;

        counter!("storefront.orders.created", 1);
        info!(
            order_id = order.id,
            order_number = %order.order_number,
            total_payment = order.total_payment,
            "Order created"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number,
                total_payment: order.total_payment,
            })
            .await;

        Ok(OrderDetail {
            order,
            order_products,
            payments: Vec::new(),
        })
    }

    /// The user's orders, newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: i32,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn get_order(
        &self,
        user: &user::Model,
        order_id: i32,
    ) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        ensure_can_access(user, &order)?;

        let order_products = OrderProduct::find()
            .filter(order_product::Column::OrderId.eq(order.id))
            .order_by_asc(order_product::Column::Id)
            .all(&*self.db)
            .await?;
        let payments = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .order_by_asc(payment::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(OrderDetail {
            order,
            order_products,
            payments,
        })
    }

    /// Applies a user-requested status change. Only `접수 완료 → 주문 취소` is
    /// allowed, and never once a payment has succeeded.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn update_status(
        &self,
        user: &user::Model,
        order_id: i32,
        requested: &str,
    ) -> Result<OrderTransition, ServiceError> {
        if requested != OrderStatus::Cancelled.to_string() {
            return Err(ServiceError::invalid_field(
                "order_status",
                "주문 취소 상태로만 변경할 수 있습니다.",
            ));
        }

        let txn = self.db.begin().await?;
        let order = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        ensure_can_access(user, &order)?;

        let paid = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Success))
            .count(&txn)
            .await?;
        if paid > 0 {
            return Err(ServiceError::Conflict(format!(
                "결제가 완료된 주문은 취소할 수 없습니다. (현재 상태: {})",
                order.order_status
            )));
        }

        if order.order_status != OrderStatus::Received {
            return Err(ServiceError::Conflict(format!(
                "현재 주문 상태({})에서는 취소할 수 없습니다.",
                order.order_status
            )));
        }

        let from = order.order_status;
        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;
        txn.commit().await?;

        info!(order_id, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id })
            .await;

        Ok(OrderTransition {
            order,
            from,
            to: OrderStatus::Cancelled,
        })
    }
}

fn line_input(product: &product::Model, amount: i32) -> LineInput {
    LineInput {
        product_id: product.id,
        product_name: product.product_name.clone(),
        unit_price: product.product_value,
        discount_rate: product.discount_rate,
        amount,
    }
}
