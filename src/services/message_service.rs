use sqlx::{Pool, Postgres, Row};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::message::{Message, MessageView};
use crate::realtime::events;
use crate::realtime::EventPublisher;
use crate::services::conversation_service::ConversationService;
use crate::services::encryption::EncryptionService;
use crate::services::rate_limit::RateLimiter;
use crate::services::read_receipt_service::ReadReceiptTracker;
use crate::services::sanitizer;
use crate::services::user_directory::UserDirectory;

/// Substituted for a single message body when decryption fails on a read
/// path; the rest of the page is unaffected.
pub const DECRYPTION_PLACEHOLDER: &str = "[Decryption failed]";

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

/// Clamp a requested page size to the hard maximum regardless of what the
/// caller asked for.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Orchestrates the send/read pipeline: membership check, rate limiting,
/// sanitization, encryption, persistence and fan-out.
///
/// Steps up to and including persistence abort the operation on failure;
/// everything after the commit (fan-out) is best-effort and never rolls the
/// message back.
pub struct MessagePipeline {
    db: Pool<Postgres>,
    conversations: Arc<ConversationService>,
    receipts: Arc<ReadReceiptTracker>,
    encryption: Arc<EncryptionService>,
    rate_limiter: Arc<RateLimiter>,
    publisher: Arc<dyn EventPublisher>,
    users: Arc<dyn UserDirectory>,
    max_message_length: usize,
}

impl MessagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Pool<Postgres>,
        conversations: Arc<ConversationService>,
        receipts: Arc<ReadReceiptTracker>,
        encryption: Arc<EncryptionService>,
        rate_limiter: Arc<RateLimiter>,
        publisher: Arc<dyn EventPublisher>,
        users: Arc<dyn UserDirectory>,
        max_message_length: usize,
    ) -> Self {
        Self {
            db,
            conversations,
            receipts,
            encryption,
            rate_limiter,
            publisher,
            users,
            max_message_length,
        }
    }

    pub async fn send(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> AppResult<MessageView> {
        if !self
            .conversations
            .is_participant(conversation_id, sender_id)
            .await?
        {
            return Err(AppError::Forbidden);
        }

        if body.trim().is_empty() {
            return Err(AppError::Validation("message body cannot be empty".into()));
        }
        if body.chars().count() > self.max_message_length {
            return Err(AppError::Validation(format!(
                "message body cannot exceed {} characters",
                self.max_message_length
            )));
        }

        if !self.rate_limiter.allow(sender_id).await {
            return Err(AppError::RateLimited {
                remaining: self.rate_limiter.remaining(sender_id).await,
                reset_seconds: self.rate_limiter.reset_seconds(sender_id).await,
            });
        }

        let sanitized = sanitizer::sanitize(body);
        if sanitized.trim().is_empty() {
            return Err(AppError::Validation(
                "message body is empty after sanitization".into(),
            ));
        }

        let sender = self.users.resolve(sender_id).await?;

        // Encryption failure is fatal to the send: an unencrypted body must
        // never reach the database.
        let ciphertext = self.encryption.encrypt(&sanitized, conversation_id)?;

        // Membership is re-validated inside the transaction so the insert and
        // the check are atomic with respect to concurrent conversation
        // changes.
        let mut tx = self.db.begin().await?;
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2)",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .fetch_one(&mut *tx)
        .await?;
        if !member {
            return Err(AppError::Forbidden);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, sender_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&ciphertext)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let view = MessageView {
            id: row.get("id"),
            conversation_id,
            sender_id,
            sender_name: sender.display_name().to_string(),
            body: sanitized,
            created_at: row.get("created_at"),
            edited_at: None,
            deleted_at: None,
            read_by: vec![],
        };

        self.fan_out_new_message(conversation_id, sender_id, &view)
            .await;

        Ok(view)
    }

    /// Best-effort fan-out after the commit: the new message to the
    /// conversation topic, then a conversation-updated ping to every other
    /// participant. Publish failures are logged and swallowed.
    async fn fan_out_new_message(&self, conversation_id: i64, sender_id: i64, view: &MessageView) {
        let payload = match serde_json::to_value(view) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize message event");
                return;
            }
        };
        if let Err(e) = self
            .publisher
            .publish(&events::conversation_messages_topic(conversation_id), payload)
            .await
        {
            tracing::warn!(error = %e, conversation_id, "failed to publish new-message event");
        }

        let participant_ids = match self.conversations.participant_ids(conversation_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, conversation_id, "failed to load participants for fan-out");
                return;
            }
        };
        for participant_id in participant_ids.into_iter().filter(|id| *id != sender_id) {
            if let Err(e) = self
                .publisher
                .publish(
                    &events::user_conversations_topic(participant_id),
                    serde_json::to_value(events::ConversationUpdated::new())
                        .unwrap_or_default(),
                )
                .await
            {
                tracing::warn!(error = %e, participant_id, "failed to publish conversation update");
            }
        }
    }

    /// Paginated decrypted history, newest first. `before_message_id` is a
    /// cursor: only strictly older messages are returned, so an already
    /// fetched page is stable under concurrent inserts. Each message is
    /// decrypted independently; a failure yields a placeholder for that
    /// message only.
    pub async fn list(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        before_message_id: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<Vec<MessageView>> {
        if !self
            .conversations
            .is_participant(conversation_id, viewer_id)
            .await?
        {
            return Err(AppError::Forbidden);
        }

        let limit = clamp_limit(limit);
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.sender_id, m.body, m.created_at, m.edited_at, m.deleted_at,
                   u.email AS sender_email, u.first_name AS sender_first_name
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.conversation_id = $1
              AND ($2::BIGINT IS NULL OR m.id < $2)
            ORDER BY m.id DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before_message_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let views = rows
            .into_iter()
            .map(|row| {
                let message_id: i64 = row.get("id");
                let ciphertext: String = row.get("body");
                let body = self
                    .encryption
                    .decrypt(&ciphertext, conversation_id)
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            error = %e, message_id, conversation_id,
                            "failed to decrypt message, substituting placeholder"
                        );
                        DECRYPTION_PLACEHOLDER.to_string()
                    });
                let sender_first_name: Option<String> = row.get("sender_first_name");
                let sender_email: String = row.get("sender_email");
                MessageView {
                    id: message_id,
                    conversation_id,
                    sender_id: row.get("sender_id"),
                    sender_name: sender_first_name.unwrap_or(sender_email),
                    body,
                    created_at: row.get("created_at"),
                    edited_at: row.get("edited_at"),
                    deleted_at: row.get("deleted_at"),
                    // Receipts are not loaded for the list view.
                    read_by: vec![],
                }
            })
            .collect();

        Ok(views)
    }

    /// Mark everything up to `last_message_id` as read for the viewer, then
    /// notify each original sender's read-receipts topic and finally the
    /// viewer's own conversations topic (their unread count changed).
    pub async fn mark_read(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        last_message_id: i64,
    ) -> AppResult<()> {
        if !self
            .conversations
            .is_participant(conversation_id, viewer_id)
            .await?
        {
            return Err(AppError::Forbidden);
        }

        let marked = self
            .receipts
            .mark_read_up_to(conversation_id, viewer_id, last_message_id)
            .await?;
        if marked.is_empty() {
            return Ok(());
        }

        for entry in &marked {
            let event = events::ReadReceiptEvent {
                message_id: entry.message_id,
                user_id: viewer_id,
            };
            if let Err(e) = self
                .publisher
                .publish(
                    &events::user_read_receipts_topic(entry.sender_id),
                    serde_json::to_value(&event).unwrap_or_default(),
                )
                .await
            {
                tracing::warn!(error = %e, message_id = entry.message_id, "failed to publish read receipt");
            }
        }

        if let Err(e) = self
            .publisher
            .publish(
                &events::user_conversations_topic(viewer_id),
                serde_json::to_value(events::ConversationUpdated::new()).unwrap_or_default(),
            )
            .await
        {
            tracing::warn!(error = %e, viewer_id, "failed to publish conversation update");
        }

        Ok(())
    }

    async fn load_message(&self, message_id: i64) -> AppResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_id, body, created_at, edited_at, deleted_at FROM messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;
        Ok(message)
    }

    /// Replace a message body. Sender-only; the new body goes through the
    /// same sanitize + encrypt steps as a send. Not part of the external
    /// HTTP contract.
    pub async fn edit(&self, message_id: i64, editor_id: i64, new_body: &str) -> AppResult<()> {
        let message = self.load_message(message_id).await?;

        if message.sender_id != editor_id {
            return Err(AppError::Forbidden);
        }
        if message.is_deleted() {
            return Err(AppError::Validation("cannot edit a deleted message".into()));
        }
        if new_body.trim().is_empty() {
            return Err(AppError::Validation("message body cannot be empty".into()));
        }

        let sanitized = sanitizer::sanitize(new_body);
        let ciphertext = self.encryption.encrypt(&sanitized, message.conversation_id)?;

        sqlx::query("UPDATE messages SET body = $1, edited_at = NOW() WHERE id = $2")
            .bind(&ciphertext)
            .bind(message_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Soft delete: the row is kept, only `deleted_at` is set. Sender-only;
    /// already-deleted messages no-op.
    pub async fn soft_delete(&self, message_id: i64, requester_id: i64) -> AppResult<()> {
        let message = self.load_message(message_id).await?;
        if message.sender_id != requester_id {
            return Err(AppError::Forbidden);
        }

        sqlx::query("UPDATE messages SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(message_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_to_fifty() {
        assert_eq!(clamp_limit(None), 50);
    }

    #[test]
    fn limit_is_clamped_to_hard_maximum() {
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(100)), 100);
        assert_eq!(clamp_limit(Some(25)), 25);
    }

    #[test]
    fn nonsense_limits_are_normalized() {
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
    }
}
