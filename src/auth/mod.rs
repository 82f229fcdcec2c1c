//! Caller identity.
//!
//! Authentication itself happens upstream; this service receives the
//! authenticated user's id in the `x-user-id` header and resolves it against
//! the `users` table.

use crate::{
    entities::{user, User},
    errors::{ApiError, ServiceError},
    AppState,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sea_orm::EntityTrait;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: user::Model,
}

impl AuthUser {
    pub fn id(&self) -> i32 {
        self.user.id
    }
}

fn header_user_id(parts: &Parts) -> Option<i32> {
    parts
        .headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = header_user_id(parts).ok_or(ApiError::Unauthorized)?;

        let user = User::find_by_id(user_id)
            .one(&*state.db)
            .await
            .map_err(ServiceError::from)?
            .ok_or(ApiError::Unauthorized)?;

        Ok(Self { user })
    }
}
