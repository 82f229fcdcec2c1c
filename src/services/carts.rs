use crate::{
    entities::{cart, cart_item, product, Cart, CartItem, Product},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_AMOUNT: i32 = 9_999;

/// Input for adding a product to the caller's cart.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddCartItemInput {
    pub product_id: i32,
    #[validate(range(min = 1, max = 9999, message = "수량은 1 이상 9999 이하여야 합니다."))]
    pub amount: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateCartItemInput {
    #[validate(range(min = 1, max = 9999, message = "수량은 1 이상 9999 이하여야 합니다."))]
    pub amount: i32,
}

/// Cart line joined with its product. `product` is `None` once the product
/// has been deleted.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub id: i32,
    pub amount: i32,
    pub product: Option<CartProduct>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartProduct {
    pub id: i32,
    pub product_name: String,
    pub product_value: i64,
    pub discount_rate: Decimal,
    pub product_stock: i32,
}

impl From<product::Model> for CartProduct {
    fn from(p: product::Model) -> Self {
        Self {
            id: p.id,
            product_name: p.product_name,
            product_value: p.product_value,
            discount_rate: p.discount_rate,
            product_stock: p.product_stock,
        }
    }
}

/// Per-user carts. A user's cart is created on first use.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn get_or_create_cart(&self, user_id: i32) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let inserted = cart::ActiveModel {
            user_id: Set(user_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await;

        match inserted {
            Ok(created) => {
                info!(user_id, cart_id = created.id, "Created cart");
                Ok(created)
            }
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                warn!(user_id, "cart created concurrently; using stored cart");
                Cart::find()
                    .filter(cart::Column::UserId.eq(user_id))
                    .one(&*self.db)
                    .await?
                    .ok_or(ServiceError::DatabaseError(err))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a line of the user's own cart. Lines of other carts are
    /// reported as missing.
    async fn owned_item(
        &self,
        user_id: i32,
        item_id: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        let (item, cart) = CartItem::find_by_id(item_id)
            .find_also_related(Cart)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        match cart {
            Some(cart) if cart.user_id == user_id => Ok(item),
            _ => Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            ))),
        }
    }

    /// Adds `amount` of a product. Adding a product already in the cart
    /// increments its amount instead of creating a second line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: i32,
        input: AddCartItemInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        Product::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::invalid_field("product_id", "존재하지 않는 상품입니다.")
            })?;

        let cart = self.get_or_create_cart(user_id).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&*self.db)
            .await?;

        let item = match existing {
            Some(item) => {
                let amount = item
                    .amount
                    .checked_add(input.amount)
                    .filter(|total| *total <= MAX_LINE_AMOUNT)
                    .ok_or_else(|| {
                        ServiceError::invalid_field(
                            "amount",
                            format!("한 상품은 최대 {}개까지 담을 수 있습니다.", MAX_LINE_AMOUNT),
                        )
                    })?;
                let mut active: cart_item::ActiveModel = item.into();
                active.amount = Set(amount);
                active.update(&*self.db).await?
            }
            None => {
                cart_item::ActiveModel {
                    cart_id: Set(cart.id),
                    product_id: Set(Some(input.product_id)),
                    amount: Set(input.amount),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!(user_id, item_id = item.id, amount = item.amount, "Cart item saved");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn list_items(&self, user_id: i32) -> Result<Vec<CartLine>, ServiceError> {
        let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(Vec::new());
        };

        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::Id)
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(item, product)| CartLine {
                id: item.id,
                amount: item.amount,
                product: product.map(CartProduct::from),
            })
            .collect())
    }

    /// Replaces the quantity of one of the user's cart lines.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: i32,
        item_id: i32,
        input: UpdateCartItemInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let item = self.owned_item(user_id, item_id).await?;
        let mut active: cart_item::ActiveModel = item.into();
        active.amount = Set(input.amount);
        let item = active.update(&*self.db).await?;

        info!(user_id, item_id, amount = item.amount, "Cart item updated");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: i32, item_id: i32) -> Result<(), ServiceError> {
        let item = self.owned_item(user_id, item_id).await?;
        item.delete(&*self.db).await?;
        Ok(())
    }

    /// Deletes every line in the user's cart and returns how many went.
    pub async fn clear_user_cart<C>(&self, conn: &C, user_id: i32) -> Result<u64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        else {
            return Ok(0);
        };

        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
