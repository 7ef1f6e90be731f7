use sqlx::{Pool, Postgres, Row};

use crate::error::AppResult;

/// A message newly covered by a read receipt, paired with its sender so the
/// pipeline can notify the sender's personal topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkedMessage {
    pub message_id: i64,
    pub sender_id: i64,
}

/// Records per-message, per-user read acknowledgments. Receipts are created
/// once and never mutated; the unique (message, user) constraint makes bulk
/// marking structurally idempotent.
pub struct ReadReceiptTracker {
    db: Pool<Postgres>,
}

impl ReadReceiptTracker {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// Insert a receipt for every message in the conversation with id up to
    /// `upto_message_id` that was sent by someone else and is not yet
    /// covered for `reader_id`. One batched statement; messages already
    /// covered no-op via ON CONFLICT. Returns only the newly marked
    /// messages, so a repeat call yields an empty batch.
    pub async fn mark_read_up_to(
        &self,
        conversation_id: i64,
        reader_id: i64,
        upto_message_id: i64,
    ) -> AppResult<Vec<MarkedMessage>> {
        let rows = sqlx::query(
            r#"
            WITH marked AS (
                INSERT INTO message_read_receipts (message_id, user_id)
                SELECT m.id, $2
                FROM messages m
                WHERE m.conversation_id = $1
                  AND m.sender_id <> $2
                  AND m.id <= $3
                  AND NOT EXISTS (
                      SELECT 1 FROM message_read_receipts r
                      WHERE r.message_id = m.id AND r.user_id = $2
                  )
                ON CONFLICT (message_id, user_id) DO NOTHING
                RETURNING message_id
            )
            SELECT marked.message_id, m.sender_id
            FROM marked
            JOIN messages m ON m.id = marked.message_id
            ORDER BY marked.message_id
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .bind(upto_message_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MarkedMessage {
                message_id: row.get("message_id"),
                sender_id: row.get("sender_id"),
            })
            .collect())
    }

    pub async fn has_read(&self, message_id: i64, user_id: i64) -> AppResult<bool> {
        let read: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM message_read_receipts WHERE message_id = $1 AND user_id = $2)",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(read)
    }

    /// Messages not sent by the viewer that lack a receipt for the viewer.
    /// Senders never count their own messages as unread.
    pub async fn unread_count(&self, conversation_id: i64, viewer_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }
}
