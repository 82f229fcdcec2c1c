use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable priced snapshot of a checkout. Only the two status columns
/// change after insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub order_number: Uuid,
    pub user_id: i32,
    #[sea_orm(nullable)]
    pub address_id: Option<i32>,
    /// Sum of discounted line totals
    pub subtotal: i64,
    /// Product discounts already reflected in `subtotal`
    pub product_discount_amount: i64,
    /// Order-level deduction applied on top of `subtotal`
    pub discount_amount: i64,
    pub delivery_amount: i64,
    pub total_payment: i64,
    pub used_point: i64,
    pub order_status: OrderStatus,
    pub delivery_status: DeliveryStatus,
    #[sea_orm(nullable)]
    pub delivery_request: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// `total_payment == subtotal - discount_amount - used_point + delivery_amount`
    pub fn amounts_balance(&self) -> bool {
        self.total_payment
            == self.subtotal - self.discount_amount - self.used_point + self.delivery_amount
            && self.total_payment >= 0
    }

    /// External order id sent to the payment gateway
    pub fn toss_order_id(&self) -> String {
        format!("ORD-{}", self.order_number)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id"
    )]
    Address,
    #[sea_orm(has_many = "super::order_product::Entity")]
    OrderProducts,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl Related<super::order_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderProducts.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle: received, then exactly one of completed, failed or cancelled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(15))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "접수 완료")]
    #[serde(rename = "접수 완료")]
    #[strum(to_string = "접수 완료")]
    Received,
    #[sea_orm(string_value = "주문 완료")]
    #[serde(rename = "주문 완료")]
    #[strum(to_string = "주문 완료")]
    Completed,
    #[sea_orm(string_value = "주문 실패")]
    #[serde(rename = "주문 실패")]
    #[strum(to_string = "주문 실패")]
    Failed,
    #[sea_orm(string_value = "주문 취소")]
    #[serde(rename = "주문 취소")]
    #[strum(to_string = "주문 취소")]
    Cancelled,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(15))")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "배송 준비")]
    #[serde(rename = "배송 준비")]
    #[strum(to_string = "배송 준비")]
    Preparing,
    #[sea_orm(string_value = "배송 중")]
    #[serde(rename = "배송 중")]
    #[strum(to_string = "배송 중")]
    Shipping,
    #[sea_orm(string_value = "배송 완료")]
    #[serde(rename = "배송 완료")]
    #[strum(to_string = "배송 완료")]
    Delivered,
}
