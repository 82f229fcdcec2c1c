//! Checkout pricing. Everything here is pure: the same lines, point request
//! and policy always produce the same breakdown.

use crate::config::AppConfig;
use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Knobs the calculator reads from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub free_delivery_threshold: i64,
    pub base_delivery_fee: i64,
    pub reward_rate: Decimal,
    pub min_balance_to_use: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            free_delivery_threshold: 50_000,
            base_delivery_fee: 3_500,
            reward_rate: Decimal::new(1, 2),
            min_balance_to_use: 5_000,
        }
    }
}

impl From<&AppConfig> for PricingPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            free_delivery_threshold: cfg.pricing.free_delivery_threshold,
            base_delivery_fee: cfg.pricing.base_delivery_fee,
            reward_rate: cfg.pricing.reward_rate,
            min_balance_to_use: cfg.points.min_balance_to_use,
        }
    }
}

/// A cart line as seen by the calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct LineInput {
    pub product_id: i32,
    pub product_name: String,
    pub unit_price: i64,
    pub discount_rate: Decimal,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub product_id: i32,
    pub product_name: String,
    pub amount: i32,
    pub unit_price: i64,
    pub discounted_unit_price: i64,
    pub line_discount: i64,
    pub line_total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Sum of discounted line totals
    pub subtotal: i64,
    pub product_discount_amount: i64,
    /// Order-level deduction on top of `subtotal`
    pub discount_amount: i64,
    pub used_point: i64,
    pub delivery_amount: i64,
    pub total_payment: i64,
    pub expected_point: i64,
    pub available_point: i64,
}

impl PriceBreakdown {
    pub fn is_balanced(&self) -> bool {
        self.total_payment
            == self.subtotal - self.discount_amount - self.used_point + self.delivery_amount
            && self.total_payment >= 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub breakdown: PriceBreakdown,
}

fn floor_to_i64(value: Decimal) -> Result<i64, ServiceError> {
    value
        .floor()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {}", value)))
}

/// `floor(unit_price * (1 - rate))`, with the rate held to two decimals in [0, 1].
pub fn discounted_unit_price(unit_price: i64, discount_rate: Decimal) -> Result<i64, ServiceError> {
    let rate = discount_rate
        .round_dp(2)
        .max(Decimal::ZERO)
        .min(Decimal::ONE);
    floor_to_i64(Decimal::from(unit_price) * (Decimal::ONE - rate))
}

pub fn price_line(line: &LineInput) -> Result<PricedLine, ServiceError> {
    let discounted = discounted_unit_price(line.unit_price, line.discount_rate)?;
    let amount = i64::from(line.amount);
    Ok(PricedLine {
        product_id: line.product_id,
        product_name: line.product_name.clone(),
        amount: line.amount,
        unit_price: line.unit_price,
        discounted_unit_price: discounted,
        line_discount: (line.unit_price - discounted) * amount,
        line_total: discounted * amount,
    })
}

pub fn delivery_amount(subtotal: i64, policy: &PricingPolicy) -> i64 {
    if subtotal >= policy.free_delivery_threshold {
        0
    } else {
        policy.base_delivery_fee
    }
}

/// Point spend guard: never more than the balance, and nothing at all below
/// the minimum balance.
pub fn validate_point_usage(
    used_point: i64,
    available_point: i64,
    policy: &PricingPolicy,
) -> Result<(), ServiceError> {
    if used_point < 0 {
        return Err(ServiceError::invalid_field(
            "used_point",
            "사용 포인트는 0보다 작을 수 없습니다.",
        ));
    }
    if used_point > available_point {
        return Err(ServiceError::InsufficientPoints {
            requested: used_point,
            available: available_point,
        });
    }
    if used_point > 0 && available_point < policy.min_balance_to_use {
        return Err(ServiceError::PointThresholdNotMet {
            minimum: policy.min_balance_to_use,
            available: available_point,
        });
    }
    Ok(())
}

/// Prices `lines` and applies delivery, point usage and the reward preview.
pub fn quote(
    lines: &[LineInput],
    used_point: i64,
    available_point: i64,
    policy: &PricingPolicy,
) -> Result<Quote, ServiceError> {
    validate_point_usage(used_point, available_point, policy)?;

    let priced = lines
        .iter()
        .map(price_line)
        .collect::<Result<Vec<_>, _>>()?;

    let subtotal: i64 = priced.iter().map(|l| l.line_total).sum();
    let product_discount_amount: i64 = priced.iter().map(|l| l.line_discount).sum();
    let discount_amount = 0;
    let delivery_amount = delivery_amount(subtotal, policy);

    let total_payment = subtotal - discount_amount - used_point + delivery_amount;
    if total_payment < 0 {
        return Err(ServiceError::InvalidPayment { total_payment });
    }

    let reward_base = (total_payment - delivery_amount).max(0);
    let expected_point = floor_to_i64(Decimal::from(reward_base) * policy.reward_rate)?;

    Ok(Quote {
        lines: priced,
        breakdown: PriceBreakdown {
            subtotal,
            product_discount_amount,
            discount_amount,
            used_point,
            delivery_amount,
            total_payment,
            expected_point,
            available_point,
        },
    })
}
