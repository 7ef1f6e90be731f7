use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Fire-and-forget publish to a named topic. No acknowledgment, no retry;
/// ordering within a topic follows publish order. Delivery correctness for
/// history reads comes from persistence, not from pub/sub.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Redis PUBLISH over a single multiplexed connection, which preserves
/// per-topic publish order.
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        let body = payload.to_string();
        conn.publish::<_, _, ()>(topic, body)
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}
