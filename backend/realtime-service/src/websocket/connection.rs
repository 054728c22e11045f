use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::metrics;
use crate::services::ConversationService;
use crate::state::AppState;
use crate::websocket::frames::{PresenceUpdatePayload, ServerFrame};
use crate::websocket::hub::{conversation_topic, user_topic, ConnId};
use crate::websocket::rate_limit::FixedWindowLimiter;
use crate::websocket::router::{handle_frame, ConnectionContext, RouterOutcome};
use crate::websocket::PublishScope;

/// Transport-neutral connection lifecycle. Both the HTTP-upgrade path and
/// the standalone listener drive one of these per socket.
pub struct Connection {
    ctx: ConnectionContext,
    state: AppState,
    limiter: FixedWindowLimiter,
    refresh_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Register the connection: topic subscriptions, presence, heartbeat.
    pub async fn open(
        state: AppState,
        user_id: Uuid,
        device_id: String,
        tx: UnboundedSender<String>,
    ) -> AppResult<Self> {
        let conn_id: ConnId = Uuid::new_v4();
        let ctx = ConnectionContext {
            conn_id,
            user_id,
            device_id: device_id.clone(),
            tx: tx.clone(),
        };

        // Fetch memberships before touching shared state so a failed open
        // leaves nothing behind.
        let conversation_ids =
            ConversationService::list_conversation_ids(&state.db, user_id).await?;

        let was_online = state.presence.is_online(user_id).await;
        state.presence.connect(user_id, &device_id).await;

        state.hub.register(conn_id, tx).await;
        state.hub.subscribe(conn_id, &user_topic(user_id)).await;
        for conversation_id in &conversation_ids {
            state
                .hub
                .subscribe(conn_id, &conversation_topic(*conversation_id))
                .await;
        }

        if !was_online {
            publish_presence(&state, user_id, true, &conversation_ids).await;
        }

        // Keep the presence entry fresh while the socket idles.
        let refresh_task = {
            let presence = state.presence.clone();
            let device_id = device_id.clone();
            let every = Duration::from_secs(state.config.presence_refresh_secs.max(1));
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    presence.connect(user_id, &device_id).await;
                }
            }))
        };

        metrics::record_connection(1);
        info!(%user_id, device_id = %ctx.device_id, %conn_id, "realtime connection opened");

        let limiter = FixedWindowLimiter::new(
            Duration::from_millis(state.config.rate_limit_window_ms),
            state.config.rate_limit_max,
        );
        Ok(Self {
            ctx,
            state,
            limiter,
            refresh_task,
        })
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Handle one inbound text frame. Frames are processed in arrival
    /// order on this connection.
    pub async fn handle_text(&mut self, text: &str) -> RouterOutcome {
        if text.len() > self.state.config.max_frame_bytes {
            warn!(user_id = %self.ctx.user_id, "oversized frame, closing");
            return RouterOutcome::Close;
        }
        if !self.limiter.check() {
            warn!(user_id = %self.ctx.user_id, "frame rate limit exceeded, closing");
            return RouterOutcome::Close;
        }
        // Any inbound traffic is proof of life.
        self.state
            .presence
            .connect(self.ctx.user_id, &self.ctx.device_id)
            .await;
        handle_frame(&self.state, &self.ctx, text).await
    }

    /// Tear down registrations and emit offline presence when this was the
    /// user's last live device.
    pub async fn close(mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.state.hub.unsubscribe_all(self.ctx.conn_id).await;
        self.state
            .presence
            .disconnect(self.ctx.user_id, &self.ctx.device_id)
            .await;
        metrics::record_connection(-1);
        debug!(user_id = %self.ctx.user_id, conn_id = %self.ctx.conn_id, "realtime connection closed");

        if !self.state.presence.is_online(self.ctx.user_id).await {
            match ConversationService::list_conversation_ids(&self.state.db, self.ctx.user_id).await
            {
                Ok(ids) => publish_presence(&self.state, self.ctx.user_id, false, &ids).await,
                Err(e) => warn!(error = %e, "offline presence publish skipped"),
            }
        }
    }
}

/// Broadcast an online/offline transition to every conversation the user
/// belongs to.
async fn publish_presence(state: &AppState, user_id: Uuid, online: bool, conversation_ids: &[Uuid]) {
    let frame = ServerFrame::PresenceUpdate(PresenceUpdatePayload { user_id, online });
    let payload = frame.to_json();
    for conversation_id in conversation_ids {
        state
            .fanout
            .publish(
                PublishScope::Conversation,
                &conversation_topic(*conversation_id),
                &payload,
            )
            .await;
    }
}
