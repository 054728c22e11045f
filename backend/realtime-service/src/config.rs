use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

/// Which transport accepts realtime connections.
///
/// `Http` upgrades WebSockets on the main HTTP listener; `Standalone` runs a
/// dedicated tokio-tungstenite listener for deployments without the HTTP
/// stack in front. Both feed the same connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Standalone,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub transport: Transport,
    pub standalone_port: u16,
    pub jwt_public_key_pem: String,
    pub max_frame_bytes: usize,
    pub max_message_body_length: usize,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,
    pub idle_timeout_secs: u64,
    pub presence_ttl_secs: u64,
    pub presence_refresh_secs: u64,
    pub sync_batch_limit: i64,
    pub fanout_channel_prefix: String,
    pub broker_retry_base_ms: u64,
    pub broker_retry_max_ms: u64,
    pub broker_retry_ceiling: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env_parse("PORT", 8085u16);

        let transport = match env::var("REALTIME_TRANSPORT").as_deref() {
            Ok("standalone") => Transport::Standalone,
            Ok("http") | Err(_) => Transport::Http,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "REALTIME_TRANSPORT must be 'http' or 'standalone', got '{other}'"
                )))
            }
        };
        let standalone_port = env_parse("REALTIME_STANDALONE_PORT", port + 1);

        let jwt_public_key_pem = match env::var("JWT_PUBLIC_KEY_PEM") {
            Ok(pem) => pem,
            Err(_) => {
                let path = env::var("JWT_PUBLIC_KEY_FILE")
                    .map_err(|_| AppError::Config("JWT_PUBLIC_KEY_PEM missing".into()))?;
                std::fs::read_to_string(&path).map_err(|e| {
                    AppError::Config(format!("read jwt public key file {path}: {e}"))
                })?
            }
        };

        Ok(Self {
            database_url,
            redis_url,
            port,
            transport,
            standalone_port,
            jwt_public_key_pem,
            max_frame_bytes: env_parse("MAX_FRAME_BYTES", 64 * 1024),
            max_message_body_length: env_parse("MAX_MESSAGE_BODY_LENGTH", 8000),
            rate_limit_window_ms: env_parse("WS_RATE_LIMIT_WINDOW_MS", 10_000),
            rate_limit_max: env_parse("WS_RATE_LIMIT_MAX", 120),
            idle_timeout_secs: env_parse("WS_IDLE_TIMEOUT_SECS", 60),
            presence_ttl_secs: env_parse("PRESENCE_TTL_SECS", 90),
            presence_refresh_secs: env_parse("PRESENCE_REFRESH_SECS", 30),
            sync_batch_limit: env_parse("SYNC_BATCH_LIMIT", 500),
            fanout_channel_prefix: env::var("FANOUT_CHANNEL_PREFIX")
                .unwrap_or_else(|_| "ws:".into()),
            broker_retry_base_ms: env_parse("BROKER_RETRY_BASE_MS", 500),
            broker_retry_max_ms: env_parse("BROKER_RETRY_MAX_MS", 30_000),
            broker_retry_ceiling: env_parse("BROKER_RETRY_CEILING", 10),
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            port: 8085,
            transport: Transport::Http,
            standalone_port: 8086,
            jwt_public_key_pem: String::new(),
            max_frame_bytes: 64 * 1024,
            max_message_body_length: 8000,
            rate_limit_window_ms: 10_000,
            rate_limit_max: 120,
            idle_timeout_secs: 60,
            presence_ttl_secs: 90,
            presence_refresh_secs: 30,
            sync_batch_limit: 500,
            fanout_channel_prefix: "ws:".into(),
            broker_retry_base_ms: 500,
            broker_retry_max_ms: 30_000,
            broker_retry_ceiling: 10,
        }
    }
}
