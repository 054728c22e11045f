use sqlx::{Pool, Postgres};
use std::sync::Arc;

use crate::config::Config;
use crate::middleware::auth::TokenVerifier;
use crate::services::MediaReadiness;
use crate::websocket::{FanoutBridge, PresenceTracker, TopicHub};

/// Shared handles for every request and connection.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub hub: TopicHub,
    pub presence: PresenceTracker,
    pub fanout: Arc<FanoutBridge>,
    pub media: Arc<dyn MediaReadiness>,
    pub verifier: Arc<TokenVerifier>,
    pub config: Arc<Config>,
}
