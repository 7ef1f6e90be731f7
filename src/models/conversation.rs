use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::message::MessageView;

/// A 1:1 conversation. Exactly two distinct participants for the lifetime of
/// the record; `updated_at` is bumped whenever a message is added.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: i64,
    pub name: String,
    pub email: String,
}

/// One row of the conversation list: the peer, a decrypted last-message
/// preview and the viewer's unread count, newest activity first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<MessageView>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
