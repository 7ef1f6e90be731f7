use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::{AppError, AppResult};
use crate::models::UserProfile;

/// Resolves user ids to display data for response shaping. User records are
/// owned by the identity service; only the projected fields are read.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, user_id: i64) -> AppResult<UserProfile>;
}

pub struct SqlUserDirectory {
    db: Pool<Postgres>,
}

impl SqlUserDirectory {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn resolve(&self, user_id: i64) -> AppResult<UserProfile> {
        let profile = sqlx::query_as::<_, UserProfileRow>(
            "SELECT id, first_name, email FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(UserProfile {
            id: profile.id,
            first_name: profile.first_name,
            email: profile.email,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserProfileRow {
    id: i64,
    first_name: Option<String>,
    email: String,
}
