use std::sync::Arc;

use chat_service::config::Config;
use chat_service::db;
use chat_service::error::AppError;
use chat_service::logging;
use chat_service::realtime::RedisPublisher;
use chat_service::routes;
use chat_service::services::conversation_service::ConversationService;
use chat_service::services::encryption::EncryptionService;
use chat_service::services::match_authority::SqlMatchAuthority;
use chat_service::services::message_service::MessagePipeline;
use chat_service::services::rate_limit::{RateLimiter, RedisCounterStore};
use chat_service::services::read_receipt_service::ReadReceiptTracker;
use chat_service::services::user_directory::SqlUserDirectory;
use chat_service::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Arc::new(Config::from_env()?);

    let pool = db::init_pool(&config.database_url).await?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migration failed: {e}")))?;

    let redis_client = redis::Client::open(config.redis_url.as_str())
        .map_err(|e| AppError::StartServer(format!("invalid redis url: {e}")))?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .map_err(|e| AppError::StartServer(format!("redis connection failed: {e}")))?;

    let encryption = Arc::new(EncryptionService::new(
        config.encryption_master_secret.clone(),
        config.key_derivation_iterations,
    ));
    let matches = Arc::new(SqlMatchAuthority::new(pool.clone()));
    let users = Arc::new(SqlUserDirectory::new(pool.clone()));
    let conversations = Arc::new(ConversationService::new(
        pool.clone(),
        matches,
        encryption.clone(),
    ));
    let receipts = Arc::new(ReadReceiptTracker::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::new(RedisCounterStore::new(redis_conn.clone())),
        config.rate_limit.clone(),
    ));
    let publisher = Arc::new(RedisPublisher::new(redis_conn));

    let pipeline = Arc::new(MessagePipeline::new(
        pool,
        conversations.clone(),
        receipts,
        encryption,
        rate_limiter,
        publisher,
        users,
        config.max_message_length,
    ));

    let state = AppState::new(config.clone(), conversations, pipeline);
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "starting chat service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    Ok(())
}
