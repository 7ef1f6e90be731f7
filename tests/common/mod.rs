use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_service::config::RateLimitConfig;
use chat_service::db::MIGRATOR;
use chat_service::realtime::EventPublisher;
use chat_service::realtime::publisher::PublishError;
use chat_service::services::conversation_service::ConversationService;
use chat_service::services::encryption::EncryptionService;
use chat_service::services::match_authority::SqlMatchAuthority;
use chat_service::services::message_service::MessagePipeline;
use chat_service::services::rate_limit::{CounterStore, CounterStoreError, RateLimiter};
use chat_service::services::read_receipt_service::ReadReceiptTracker;
use chat_service::services::user_directory::SqlUserDirectory;

#[allow(dead_code)]
pub async fn bootstrap_pool() -> Pool<Postgres> {
    let db_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var required for integration tests");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    MIGRATOR.run(&pool).await.expect("migrations failed");
    pool
}

static USER_SEQ: AtomicU64 = AtomicU64::new(0);

#[allow(dead_code)]
pub async fn create_user(pool: &Pool<Postgres>, name: &str) -> i64 {
    let seq = USER_SEQ.fetch_add(1, Ordering::SeqCst);
    let email = format!(
        "{name}-{}-{seq}@test.invalid",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );
    sqlx::query_scalar("INSERT INTO users (email, first_name) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("failed to insert test user")
}

#[allow(dead_code)]
pub async fn create_accepted_match(pool: &Pool<Postgres>, mentee_id: i64, mentor_id: i64) {
    sqlx::query("INSERT INTO matches (mentee_id, mentor_id, status) VALUES ($1, $2, 'ACCEPTED')")
        .bind(mentee_id)
        .bind(mentor_id)
        .execute(pool)
        .await
        .expect("failed to insert test match");
}

/// Collects published events instead of touching redis.
#[derive(Default)]
pub struct CapturePublisher {
    pub events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CapturePublisher {
    #[allow(dead_code)]
    pub fn topics(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for CapturePublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// In-process counter store so rate limiting works without redis.
#[derive(Default)]
pub struct InProcessCounterStore {
    counts: Mutex<std::collections::HashMap<String, i64>>,
}

#[async_trait]
impl CounterStore for InProcessCounterStore {
    async fn incr_with_ttl(&self, key: &str, _ttl: Duration) -> Result<i64, CounterStoreError> {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> Result<i64, CounterStoreError> {
        Ok(*self.counts.lock().unwrap().get(key).unwrap_or(&0))
    }

    async fn ttl_seconds(&self, _key: &str) -> Result<i64, CounterStoreError> {
        Ok(60)
    }
}

#[allow(dead_code)]
pub struct TestHarness {
    pub conversations: Arc<ConversationService>,
    pub pipeline: Arc<MessagePipeline>,
    pub receipts: Arc<ReadReceiptTracker>,
    pub encryption: Arc<EncryptionService>,
    pub publisher: Arc<CapturePublisher>,
}

/// Real database services wired to in-process fakes for redis-backed parts.
/// Low KDF iteration count keeps tests fast; the derivation path is the same.
#[allow(dead_code)]
pub fn build_harness(pool: Pool<Postgres>) -> TestHarness {
    build_harness_with_limit(pool, 60)
}

#[allow(dead_code)]
pub fn build_harness_with_limit(pool: Pool<Postgres>, max_per_window: i64) -> TestHarness {
    let encryption = Arc::new(EncryptionService::new("integration-test-secret", 1000));
    let matches = Arc::new(SqlMatchAuthority::new(pool.clone()));
    let users = Arc::new(SqlUserDirectory::new(pool.clone()));
    let conversations = Arc::new(ConversationService::new(
        pool.clone(),
        matches,
        encryption.clone(),
    ));
    let receipts = Arc::new(ReadReceiptTracker::new(pool.clone()));
    let publisher = Arc::new(CapturePublisher::default());
    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::new(InProcessCounterStore::default()),
        RateLimitConfig {
            enabled: true,
            max_per_window,
            window_seconds: 60,
        },
    ));

    let pipeline = Arc::new(MessagePipeline::new(
        pool,
        conversations.clone(),
        receipts.clone(),
        encryption.clone(),
        rate_limiter,
        publisher.clone(),
        users,
        5000,
    ));

    TestHarness {
        conversations,
        pipeline,
        receipts,
        encryption,
        publisher,
    }
}
