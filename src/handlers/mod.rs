pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;
pub mod points;
pub mod products;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        carts::CartService, orders::OrderService, payments::PaymentService, points::PointLedger,
        pricing::PricingPolicy, products::ProductService, settlement::SettlementReactor,
    },
};
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub points: Arc<PointLedger>,
    pub products: Arc<ProductService>,
    pub settlement: Arc<SettlementReactor>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let carts = CartService::new(db_pool.clone());
        let products = ProductService::new(db_pool.clone());
        let ledger = PointLedger::new(db_pool.clone(), event_sender.clone());
        let settlement = SettlementReactor::new(
            db_pool.clone(),
            carts.clone(),
            ledger.clone(),
            config.points.clone(),
            event_sender.clone(),
        );
        let orders = OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            PricingPolicy::from(config),
        );
        let payments = PaymentService::new(
            db_pool,
            gateway,
            settlement.clone(),
            event_sender,
            config,
        );

        Self {
            carts: Arc::new(carts),
            orders: Arc::new(orders),
            payments: Arc::new(payments),
            points: Arc::new(ledger),
            products: Arc::new(products),
            settlement: Arc::new(settlement),
        }
    }
}
