use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::AppResult;

/// Yes/no gate owned by the external matching system. The algorithm that
/// decides who may converse is out of scope here; the pipeline only asks
/// whether a pair has been mutually approved.
#[async_trait]
pub trait MatchAuthority: Send + Sync {
    async fn are_matched(&self, user_a: i64, user_b: i64) -> AppResult<bool>;
}

/// Reads the match table the matching service maintains. Matches are stored
/// directionally (mentee -> mentor), so both orientations are checked.
pub struct SqlMatchAuthority {
    db: Pool<Postgres>,
}

impl SqlMatchAuthority {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MatchAuthority for SqlMatchAuthority {
    async fn are_matched(&self, user_a: i64, user_b: i64) -> AppResult<bool> {
        if user_a == user_b {
            return Ok(false);
        }

        let matched: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM matches
                WHERE status = 'ACCEPTED'
                  AND ((mentee_id = $1 AND mentor_id = $2)
                    OR (mentee_id = $2 AND mentor_id = $1))
            )
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(&self.db)
        .await?;

        Ok(matched)
    }
}
