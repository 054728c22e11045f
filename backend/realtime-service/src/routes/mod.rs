pub mod conversations;
pub mod messages;

use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::config::Transport;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::websocket::transport::ws_handler;

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics() -> impl IntoResponse {
    crate::metrics::gather()
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::create_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/:conversation_id/members",
            post(conversations::add_member),
        )
        .route(
            "/conversations/:conversation_id/leave",
            post(conversations::leave_conversation),
        )
        .route(
            "/conversations/:conversation_id/messages",
            post(messages::send_message).get(messages::list_messages),
        )
        .route(
            "/conversations/:conversation_id/read",
            post(messages::mark_read),
        )
        .route(
            "/conversations/:conversation_id/delivered",
            post(messages::mark_delivered),
        )
        .route(
            "/conversations/:conversation_id/sync",
            post(messages::sync_conversation),
        )
        .route("/messages/:message_id", put(messages::edit_message))
        .route("/messages/:message_id", delete(messages::delete_message))
        .route(
            "/messages/:message_id/reactions",
            post(messages::set_reaction)
                .get(messages::list_reactions)
                .delete(messages::remove_reaction),
        )
        .layer(from_fn_with_state(state.clone(), require_auth));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api);

    // The realtime upgrade endpoint authenticates inside the handler; it
    // only exists on the HTTP transport.
    if state.config.transport == Transport::Http {
        router = router.route("/ws", get(ws_handler));
    }

    router.with_state(state)
}
