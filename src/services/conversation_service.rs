use sqlx::{Pool, Postgres, Row};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{Conversation, ConversationSummary, ParticipantView};
use crate::models::message::MessageView;
use crate::services::encryption::EncryptionService;
use crate::services::match_authority::MatchAuthority;
use crate::services::message_service::DECRYPTION_PLACEHOLDER;

/// Owns conversation and participant records and enforces 1:1 uniqueness.
/// Creation is gated by the external match authority.
pub struct ConversationService {
    db: Pool<Postgres>,
    matches: Arc<dyn MatchAuthority>,
    encryption: Arc<EncryptionService>,
}

impl ConversationService {
    pub fn new(
        db: Pool<Postgres>,
        matches: Arc<dyn MatchAuthority>,
        encryption: Arc<EncryptionService>,
    ) -> Self {
        Self {
            db,
            matches,
            encryption,
        }
    }

    /// Idempotent get-or-create for the 1:1 conversation between two users.
    ///
    /// The unordered pair is stored normalized (user_a < user_b) under a
    /// uniqueness constraint, so concurrent calls for the same pair cannot
    /// create duplicates: the loser of an insert race falls back to reading
    /// the winner's row. The existing path bumps no timestamps.
    pub async fn get_or_create(&self, user_a: i64, user_b: i64) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }
        if !self.matches.are_matched(user_a, user_b).await? {
            return Err(AppError::NotMatched);
        }

        let (low, high) = if user_a < user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        if let Some(existing) = self.find_by_pair(low, high).await? {
            return Ok(existing);
        }

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations (user_a, user_b)
            VALUES ($1, $2)
            ON CONFLICT (user_a, user_b) DO NOTHING
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&mut *tx)
        .await?;

        let conversation = match inserted {
            Some(row) => {
                let conversation = Conversation {
                    id: row.get("id"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                };
                sqlx::query(
                    r#"
                    INSERT INTO conversation_participants (conversation_id, user_id)
                    VALUES ($1, $2), ($1, $3)
                    ON CONFLICT (conversation_id, user_id) DO NOTHING
                    "#,
                )
                .bind(conversation.id)
                .bind(user_a)
                .bind(user_b)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                conversation
            }
            None => {
                // Lost the insert race; the winner's row is committed by the
                // time the conflict resolves.
                tx.rollback().await?;
                self.find_by_pair(low, high)
                    .await?
                    .ok_or(AppError::Internal)?
            }
        };

        Ok(conversation)
    }

    async fn find_by_pair(&self, low: i64, high: i64) -> AppResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, created_at, updated_at FROM conversations WHERE user_a = $1 AND user_b = $2",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.db)
        .await?;
        Ok(conversation)
    }

    pub async fn get(&self, conversation_id: i64, caller_id: i64) -> AppResult<Conversation> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        if !self.is_participant(conversation_id, caller_id).await? {
            return Err(AppError::Forbidden);
        }

        Ok(conversation)
    }

    /// Single-row membership lookup; runs on every pipeline operation.
    pub async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(member)
    }

    /// Ids only, for fan-out; no user records are loaded.
    pub async fn participant_ids(&self, conversation_id: i64) -> AppResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1 ORDER BY joined_at",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Conversation list for a user: peer, decrypted last-message preview and
    /// unread count in one query, most recently updated first.
    pub async fn list_for_user(&self, user_id: i64) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.id,
                c.created_at,
                c.updated_at,
                u.id AS peer_id,
                u.email AS peer_email,
                u.first_name AS peer_first_name,
                m.id AS last_message_id,
                m.sender_id AS last_message_sender_id,
                m.body AS last_message_body,
                m.created_at AS last_message_created_at,
                m.edited_at AS last_message_edited_at,
                m.deleted_at AS last_message_deleted_at,
                sender.email AS last_message_sender_email,
                sender.first_name AS last_message_sender_first_name,
                COALESCE(
                    (SELECT COUNT(*)
                     FROM messages msg
                     WHERE msg.conversation_id = c.id
                       AND msg.sender_id <> $1
                       AND NOT EXISTS (
                           SELECT 1 FROM message_read_receipts r
                           WHERE r.message_id = msg.id AND r.user_id = $1
                       )
                    ), 0) AS unread_count
            FROM conversations c
            JOIN conversation_participants cp ON cp.conversation_id = c.id AND cp.user_id = $1
            JOIN conversation_participants p ON p.conversation_id = c.id AND p.user_id <> $1
            JOIN users u ON u.id = p.user_id
            LEFT JOIN messages m ON m.id = (
                SELECT MAX(m2.id) FROM messages m2 WHERE m2.conversation_id = c.id
            )
            LEFT JOIN users sender ON sender.id = m.sender_id
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let summaries = rows
            .into_iter()
            .map(|row| {
                let conversation_id: i64 = row.get("id");
                let peer_first_name: Option<String> = row.get("peer_first_name");
                let peer_email: String = row.get("peer_email");
                let participant = ParticipantView {
                    user_id: row.get("peer_id"),
                    name: peer_first_name.unwrap_or_else(|| peer_email.clone()),
                    email: peer_email,
                };

                let last_message_id: Option<i64> = row.get("last_message_id");
                let last_message = last_message_id.map(|message_id| {
                    let ciphertext: String = row.get("last_message_body");
                    let body = self
                        .encryption
                        .decrypt(&ciphertext, conversation_id)
                        .unwrap_or_else(|e| {
                            tracing::warn!(
                                error = %e, message_id, conversation_id,
                                "failed to decrypt last message preview"
                            );
                            DECRYPTION_PLACEHOLDER.to_string()
                        });
                    let sender_first_name: Option<String> =
                        row.get("last_message_sender_first_name");
                    let sender_email: String = row.get("last_message_sender_email");
                    MessageView {
                        id: message_id,
                        conversation_id,
                        sender_id: row.get("last_message_sender_id"),
                        sender_name: sender_first_name.unwrap_or(sender_email),
                        body,
                        created_at: row.get("last_message_created_at"),
                        edited_at: row.get("last_message_edited_at"),
                        deleted_at: row.get("last_message_deleted_at"),
                        read_by: vec![],
                    }
                });

                ConversationSummary {
                    id: conversation_id,
                    participants: vec![participant],
                    last_message,
                    unread_count: row.get("unread_count"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect();

        Ok(summaries)
    }
}
