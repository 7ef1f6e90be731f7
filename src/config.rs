use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Maximum messages per window.
    pub max_per_window: i64,
    /// Window length in seconds; also the counter TTL.
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_window: 60,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub encryption_master_secret: String,
    pub key_derivation_iterations: u32,
    pub rate_limit: RateLimitConfig,
    pub max_message_length: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let encryption_master_secret = env::var("MESSAGE_ENCRYPTION_MASTER_SECRET")
            .map_err(|_| {
                crate::error::AppError::Config("MESSAGE_ENCRYPTION_MASTER_SECRET missing".into())
            })?;
        if encryption_master_secret.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "MESSAGE_ENCRYPTION_MASTER_SECRET must not be empty".into(),
            ));
        }

        let key_derivation_iterations = env::var("KEY_DERIVATION_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000);

        let rate_limit = RateLimitConfig {
            enabled: env::var("RATE_LIMIT_ENABLED")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            max_per_window: env::var("RATE_LIMIT_MESSAGES_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            window_seconds: env::var("RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        };

        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);

        Ok(Self {
            database_url,
            redis_url,
            port,
            encryption_master_secret,
            key_derivation_iterations,
            rate_limit,
            max_message_length,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://127.0.0.1:6379/0".into(),
            port: 3000,
            encryption_master_secret: "test-master-secret".into(),
            key_derivation_iterations: 1000,
            rate_limit: RateLimitConfig::default(),
            max_message_length: 5000,
        }
    }
}
