//! Side effects of order state changes: sales counters inside the approval
//! transaction, then cart clearing and point settlement once it commits.

use crate::{
    config::{PointRounding, PointsConfig},
    entities::{order, order_product, product, OrderProduct, Product},
    entities::order::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{carts::CartService, points::PointLedger},
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// An order status change, handed to the reactor after it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTransition {
    pub order: order::Model,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderTransition {
    pub fn completes(&self) -> bool {
        self.from != OrderStatus::Completed && self.to == OrderStatus::Completed
    }
}

/// Reward for a completed order: `total_payment * earn_rate`, rounded per
/// policy, clamped to the optional bounds and never negative.
pub fn compute_order_reward(total_payment: i64, policy: &PointsConfig) -> i64 {
    if total_payment <= 0 {
        return 0;
    }

    let raw = Decimal::from(total_payment) * policy.earn_rate;
    let rounded = match policy.round {
        PointRounding::Floor => raw.floor(),
        PointRounding::Ceil => raw.ceil(),
        PointRounding::Round => raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
    };
    let mut reward = rounded.to_i64().unwrap_or(0);

    if let Some(min) = policy.min {
        reward = reward.max(min);
    }
    if let Some(max) = policy.max {
        reward = reward.min(max);
    }
    reward.max(0)
}

pub fn use_point_event_key(order_id: i32) -> String {
    format!("order:{}:use_point", order_id)
}

pub fn earn_point_event_key(order_id: i32) -> String {
    format!("order:{}:earn_point", order_id)
}

#[derive(Clone)]
pub struct SettlementReactor {
    db: Arc<DatabaseConnection>,
    carts: CartService,
    ledger: PointLedger,
    policy: PointsConfig,
    event_sender: Arc<EventSender>,
}

impl SettlementReactor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: CartService,
        ledger: PointLedger,
        policy: PointsConfig,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            carts,
            ledger,
            policy,
            event_sender,
        }
    }

    /// Adds each line's amount to its product's sales counter. Lines whose
    /// product was deleted are skipped.
    pub async fn record_sales<C>(&self, conn: &C, order_id: i32) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let lines = OrderProduct::find()
            .filter(order_product::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        for line in lines {
            let Some(product_id) = line.product_id else {
                continue;
            };
            Product::update_many()
                .col_expr(
                    product::Column::Sales,
                    Expr::col(product::Column::Sales).add(i64::from(line.amount)),
                )
                .filter(product::Column::Id.eq(product_id))
                .exec(conn)
                .await?;
        }
        Ok(())
    }

    /// Runs the post-commit settlement for an order that just completed.
    ///
    /// Each step is independent: a failure is logged and the next step still
    /// runs. The ledger's event keys make a repeated call a no-op.
    #[instrument(skip(self, transition), fields(order_id = transition.order.id))]
    pub async fn after_commit(&self, transition: &OrderTransition) {
        if !transition.completes() {
            return;
        }

        let order = &transition.order;

        match self.carts.clear_user_cart(&*self.db, order.user_id).await {
            Ok(removed) => info!(user_id = order.user_id, removed, "cart cleared"),
            Err(e) => warn!(error = %e, user_id = order.user_id, "failed to clear cart"),
        }

        if order.used_point > 0 {
            let key = use_point_event_key(order.id);
            if let Err(e) = self
                .ledger
                .apply_point_delta(order.user_id, -order.used_point, Some(&key))
                .await
            {
                error!(error = %e, event_key = %key, "failed to debit used points");
            }
        }

        let reward = compute_order_reward(order.total_payment, &self.policy);
        if reward > 0 {
            let key = earn_point_event_key(order.id);
            if let Err(e) = self
                .ledger
                .apply_point_delta(order.user_id, reward, Some(&key))
                .await
            {
                error!(error = %e, event_key = %key, "failed to credit reward points");
            }
        }

        self.event_sender
            .send_or_log(Event::OrderCompleted {
                order_id: order.id,
                user_id: order.user_id,
            })
            .await;
    }
}
