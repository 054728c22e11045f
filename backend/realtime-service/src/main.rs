use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use realtime_service::config::{Config, Transport};
use realtime_service::db;
use realtime_service::error::{AppError, AppResult};
use realtime_service::logging::init_tracing;
use realtime_service::middleware::TokenVerifier;
use realtime_service::routes::build_router;
use realtime_service::services::{DbMediaClient, DeliveryService};
use realtime_service::state::AppState;
use realtime_service::websocket::fanout::BrokerRetryPolicy;
use realtime_service::websocket::transport::run_standalone_listener;
use realtime_service::websocket::{FanoutBridge, PresenceTracker, TopicHub};

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();
    let config = Config::from_env()?;

    let pool = db::init_pool(&config.database_url).await?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;

    let redis_client = match redis::Client::open(config.redis_url.as_str()) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "invalid redis url, fanout runs local-only");
            None
        }
    };

    let hub = TopicHub::new();
    let fanout = Arc::new(FanoutBridge::new(
        hub.clone(),
        redis_client,
        config.fanout_channel_prefix.clone(),
        BrokerRetryPolicy {
            base: Duration::from_millis(config.broker_retry_base_ms),
            max: Duration::from_millis(config.broker_retry_max_ms),
            ceiling: config.broker_retry_ceiling,
        },
    ));
    tokio::spawn(fanout.clone().run_listener());

    let verifier = Arc::new(TokenVerifier::from_rsa_pem(&config.jwt_public_key_pem)?);
    let state = AppState {
        db: pool.clone(),
        hub,
        presence: PresenceTracker::new(Duration::from_secs(config.presence_ttl_secs)),
        fanout,
        media: Arc::new(DbMediaClient::new(pool.clone())),
        verifier,
        config: Arc::new(config.clone()),
    };

    DeliveryService::spawn_sweeper(pool, state.presence.clone());

    if config.transport == Transport::Standalone {
        let ws_state = state.clone();
        let port = config.standalone_port;
        tokio::spawn(async move {
            if let Err(e) = run_standalone_listener(ws_state, port).await {
                tracing::error!(error = %e, "standalone listener exited");
            }
        });
    }

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(format!("bind {addr}: {e}")))?;
    info!(%addr, transport = ?config.transport, "realtime service listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    Ok(())
}
