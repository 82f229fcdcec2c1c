use crate::{
    entities::{point, user, Point, User},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Balance plus ledger rows, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct PointSummary {
    pub balance: i64,
    pub history: Vec<point::Model>,
}

/// Append-only point ledger with idempotent, per-user serialized deltas.
#[derive(Clone)]
pub struct PointLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PointLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Applies `delta` to the user's balance and records it.
    ///
    /// When `event_key` is set and a row with that key already exists, that row
    /// is returned and nothing changes. The user row is locked for the whole
    /// operation so concurrent deltas for one user apply one at a time.
    #[instrument(skip(self))]
    pub async fn apply_point_delta(
        &self,
        user_id: i32,
        delta: i64,
        event_key: Option<&str>,
    ) -> Result<point::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let user = User::find_by_id(user_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        if let Some(key) = event_key {
            if let Some(existing) = Point::find()
                .filter(point::Column::EventKey.eq(key))
                .one(&txn)
                .await?
            {
                info!(user_id, event_key = key, "point delta already applied");
                return Ok(existing);
            }
        }

        let new_balance = user.point_balance + delta;
        if new_balance < 0 {
            return Err(ServiceError::InsufficientBalance {
                balance: user.point_balance,
                delta,
            });
        }

        let inserted = point::ActiveModel {
            user_id: Set(user_id),
            delta: Set(delta),
            balance_after: Set(new_balance),
            event_key: Set(event_key.map(str::to_string)),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Another writer recorded the same event key first.
                txn.rollback().await?;
                warn!(user_id, ?event_key, "point event key raced; returning stored row");
                let key = event_key.unwrap_or_default();
                return Point::find()
                    .filter(point::Column::EventKey.eq(key))
                    .one(&*self.db)
                    .await?
                    .ok_or(ServiceError::DatabaseError(err));
            }
            Err(err) => return Err(err.into()),
        };

        let mut user: user::ActiveModel = user.into();
        user.point_balance = Set(new_balance);
        user.update(&txn).await?;

        txn.commit().await?;

        counter!("storefront.points.applied", 1);
        info!(user_id, delta, new_balance, "point delta applied");
        self.event_sender
            .send_or_log(Event::PointsApplied {
                user_id,
                delta,
                event_key: row.event_key.clone(),
            })
            .await;

        Ok(row)
    }

    pub async fn balance(&self, user_id: i32) -> Result<i64, ServiceError> {
        User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .map(|u| u.point_balance)
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, user_id: i32) -> Result<PointSummary, ServiceError> {
        let balance = self.balance(user_id).await?;
        let history = Point::find()
            .filter(point::Column::UserId.eq(user_id))
            .order_by_desc(point::Column::CreatedAt)
            .order_by_desc(point::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(PointSummary { balance, history })
    }
}
