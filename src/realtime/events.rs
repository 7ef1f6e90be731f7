//! Topic naming and event payloads for the pub/sub fan-out.
//!
//! One topic per conversation for message broadcasts, one per user for
//! conversation-list updates and one per user for read-receipt
//! notifications. Ordering is guaranteed within a topic only; all writes
//! for a given topic originate from the same pipeline call sequence.

use serde::{Deserialize, Serialize};

pub fn conversation_messages_topic(conversation_id: i64) -> String {
    format!("conversations.{conversation_id}.messages")
}

pub fn user_conversations_topic(user_id: i64) -> String {
    format!("users.{user_id}.conversations")
}

pub fn user_read_receipts_topic(user_id: i64) -> String {
    format!("users.{user_id}.read-receipts")
}

/// Published to a user's conversations topic whenever one of their
/// conversations changes (new message, unread count change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationUpdated {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ConversationUpdated {
    pub fn new() -> Self {
        Self {
            kind: "update".into(),
        }
    }
}

impl Default for ConversationUpdated {
    fn default() -> Self {
        Self::new()
    }
}

/// Published to the original sender's read-receipts topic when another
/// participant reads their message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    pub message_id: i64,
    /// The user who read the message.
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_match_contract() {
        assert_eq!(
            conversation_messages_topic(100),
            "conversations.100.messages"
        );
        assert_eq!(user_conversations_topic(7), "users.7.conversations");
        assert_eq!(user_read_receipts_topic(7), "users.7.read-receipts");
    }

    #[test]
    fn conversation_updated_payload_shape() {
        let json = serde_json::to_value(ConversationUpdated::new()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "update"}));
    }

    #[test]
    fn read_receipt_payload_shape() {
        let json = serde_json::to_value(ReadReceiptEvent {
            message_id: 42,
            user_id: 2,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"messageId": 42, "userId": 2}));
    }
}
