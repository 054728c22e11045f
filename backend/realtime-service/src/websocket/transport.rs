use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::connection::Connection;
use crate::websocket::router::RouterOutcome;

/// Credentials a client presents at handshake, before the upgrade.
#[derive(Debug)]
pub struct HandshakeCredentials {
    pub token: String,
    pub device_id: String,
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}

/// Pull the access token and device id out of headers or query string.
/// Headers win; the query string exists for clients that cannot set
/// headers on a WebSocket handshake.
pub fn extract_credentials(
    headers: &HeaderMap,
    query: Option<&str>,
) -> AppResult<HandshakeCredentials> {
    let query = query.unwrap_or("");
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .or_else(|| query_param(query, "token"))
        .ok_or(AppError::Unauthorized)?
        .to_string();
    let device_id = headers
        .get("x-device-id")
        .and_then(|v| v.to_str().ok())
        .or_else(|| query_param(query, "deviceId"))
        .ok_or_else(|| AppError::validation("INVALID_BODY", "device id required"))?
        .to_string();
    if device_id.is_empty() || device_id.len() > 128 {
        return Err(AppError::validation("INVALID_BODY", "invalid device id"));
    }
    Ok(HandshakeCredentials { token, device_id })
}

/// GET /ws — authenticate, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credentials = match extract_credentials(&headers, uri.query()) {
        Ok(c) => c,
        Err(e) => return (e.status_code(), e.to_string()).into_response(),
    };
    let user_id = match state.verifier.verify(&credentials.token) {
        Ok(id) => id,
        Err(_) => return (StatusCode::UNAUTHORIZED, "invalid token").into_response(),
    };

    let max_frame = state.config.max_frame_bytes;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| serve_axum_socket(state, socket, user_id, credentials.device_id))
}

async fn serve_axum_socket(state: AppState, socket: WebSocket, user_id: Uuid, device_id: String) {
    let (tx, mut rx) = unbounded_channel::<String>();
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs.max(1));
    let mut connection = match Connection::open(state, user_id, device_id, tx).await {
        Ok(c) => c,
        Err(e) => {
            warn!(%user_id, error = %e, "connection setup failed");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(payload) = outbound else { break };
                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                        if connection.handle_text(&text).await == RouterOutcome::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                    }
                    Some(Ok(Message::Binary(_))) => break,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            _ = &mut idle => {
                warn!(%user_id, "idle timeout, closing connection");
                break;
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    connection.close().await;
}

/// Dedicated WebSocket listener for deployments without the HTTP stack.
pub async fn run_standalone_listener(state: AppState, port: u16) -> AppResult<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(format!("bind {addr}: {e}")))?;
    info!(%addr, "standalone realtime listener started");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_standalone_socket(state, socket).await {
                warn!(%peer, error = %e, "standalone connection ended with error");
            }
        });
    }
}

async fn serve_standalone_socket(
    state: AppState,
    socket: tokio::net::TcpStream,
) -> AppResult<()> {
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    // Credentials are captured during the handshake callback so a bad
    // token rejects the upgrade with a proper HTTP status.
    let verifier = state.verifier.clone();
    let mut identity: Option<(Uuid, String)> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let mut headers = HeaderMap::new();
        for (name, value) in request.headers() {
            headers.insert(name.clone(), value.clone());
        }
        let credentials = extract_credentials(&headers, request.uri().query())
            .map_err(|e| reject(e.status_code()))?;
        let user_id = verifier
            .verify(&credentials.token)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED))?;
        identity = Some((user_id, credentials.device_id));
        Ok(response)
    };

    fn reject(status: StatusCode) -> ErrorResponse {
        let mut response = ErrorResponse::new(None);
        *response.status_mut() = status;
        response
    }

    let ws = tokio_tungstenite::accept_hdr_async(socket, callback)
        .await
        .map_err(|e| AppError::Protocol(format!("handshake: {e}")))?;
    let (user_id, device_id) = match identity {
        Some(pair) => pair,
        None => return Err(AppError::Unauthorized),
    };

    let (tx, mut rx) = unbounded_channel::<String>();
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs.max(1));
    let mut connection = Connection::open(state, user_id, device_id, tx).await?;

    let (mut sink, mut stream) = ws.split();
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(payload) = outbound else { break };
                if sink.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                        if connection.handle_text(&text).await == RouterOutcome::Close {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                    }
                    Some(Ok(WsMessage::Binary(_))) => break,
                    Some(Ok(_)) | Some(Err(_)) | None => break,
                }
            }
            _ = &mut idle => {
                warn!(%user_id, "idle timeout, closing connection");
                break;
            }
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    connection.close().await;
    Ok(())
}
