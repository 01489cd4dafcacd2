//! WebSocket connection lifecycle: handshake, read/write loops, teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vidlisync_core::config::Config;
use vidlisync_core::error::{Result, SyncError};
use vidlisync_core::protocol::{ClientMessage, ServerMessage};

use crate::handlers::{handle_message, leave_room};
use crate::state::{ConnectionState, GatewayState};

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check a client token against the configured auth mode.
///
/// In `none` mode any non-empty token passes; real token verification lives
/// outside the gateway. In `token` mode the SHA-256 digests of the provided
/// and configured tokens must match.
pub fn authenticate(config: &Config, token: &str) -> Result<()> {
    match config.auth_mode() {
        "none" => Ok(()),
        "token" => {
            let expected = config
                .gateway
                .as_ref()
                .and_then(|g| g.auth.as_ref())
                .and_then(|a| a.resolve_token())
                .ok_or_else(|| SyncError::Unauthorized("Server token not configured".into()))?;

            let expected_hash = Sha256::digest(expected.as_bytes());
            let provided_hash = Sha256::digest(token.as_bytes());
            if constant_time_eq(&provided_hash, &expected_hash) {
                Ok(())
            } else {
                Err(SyncError::Unauthorized("Invalid token".into()))
            }
        }
        other => Err(SyncError::Unauthorized(format!("Unknown auth mode: {other}"))),
    }
}

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    let conn = ConnectionState::new(conn_id.clone(), event_tx);
    let cancel = conn.cancel.clone();
    state.connections.write().await.insert(conn_id.clone(), conn);

    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    state
        .send_to(
            &conn_id,
            &ServerMessage::ConnectionEstablished {
                connection_id: conn_id.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

    // The channel closes when the connection record is dropped at teardown.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let max_bytes = state.config.gateway().max_message_bytes;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!(conn_id = %conn_id, "Connection closed by idle sweep");
                break;
            }
            next = ws_rx.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                handle_text(&state, &conn_id, text.as_str(), max_bytes).await;
            }
            Some(Ok(Message::Binary(_))) => {
                let err = SyncError::Malformed("Binary frames are not supported".into());
                state.send_to(&conn_id, &ServerMessage::error(&err)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(conn_id = %conn_id, "Client closed connection");
                break;
            }
            Some(Err(e)) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
            // Axum answers pings itself
            Some(Ok(_)) => {}
        }
    }

    teardown_connection(&state, &conn_id).await;
    if tokio::time::timeout(Duration::from_secs(2), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Parse, dispatch and answer one text frame. Errors are reported on the
/// connection and never end it.
async fn handle_text(state: &Arc<GatewayState>, conn_id: &str, text: &str, max_bytes: usize) {
    if let Some(conn) = state.connections.write().await.get_mut(conn_id) {
        conn.touch();
    }

    let outcome = if text.len() > max_bytes {
        Err(SyncError::Malformed(format!(
            "Message exceeds {max_bytes} bytes"
        )))
    } else {
        match ClientMessage::parse(text) {
            Ok(msg) => {
                let kind = msg.kind();
                let started = Instant::now();
                debug!(conn_id, kind, room = msg.is_room_message(), "Message received");
                let result = handle_message(state, conn_id, msg).await;

                #[cfg(feature = "metrics")]
                crate::metrics::record_message(kind, started.elapsed().as_secs_f64());
                debug!(conn_id, kind, elapsed_ms = started.elapsed().as_millis() as u64, "Message handled");
                result
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = outcome {
        warn!(conn_id, code = e.code(), error = %e, "Message rejected");
        #[cfg(feature = "metrics")]
        crate::metrics::record_error(e.code());
        state.send_to(conn_id, &ServerMessage::error(&e)).await;
    }
}

/// Remove a connection and release everything it holds: its stream session
/// is closed (final flush included, result discarded) and it leaves its room.
/// Safe to call more than once.
pub async fn teardown_connection(state: &Arc<GatewayState>, conn_id: &str) {
    let Some(conn) = state.connections.write().await.remove(conn_id) else {
        return;
    };
    conn.cancel.cancel();

    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();

    if let Some(session_id) = &conn.session_id {
        match state.sessions.close(session_id).await {
            Ok(summary) => debug!(
                conn_id,
                session_id = %session_id,
                chunks = summary.chunks_processed,
                "Session closed on teardown"
            ),
            Err(e) => debug!(conn_id, session_id = %session_id, error = %e, "Session already gone"),
        }
    }

    if let Some(code) = &conn.room_code {
        leave_room(state, conn_id, code).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidlisync_core::config::{GatewayAuthConfig, GatewayConfig};

    fn make_config_with_auth(mode: &str, token: Option<&str>) -> Config {
        Config {
            gateway: Some(GatewayConfig {
                auth: Some(GatewayAuthConfig {
                    mode: Some(mode.to_string()),
                    token: token.map(|s| s.to_string()),
                    token_env: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_auth_mode_none() {
        let config = make_config_with_auth("none", None);
        assert!(authenticate(&config, "anything").is_ok());
        assert!(authenticate(&Config::default(), "x").is_ok());
    }

    #[test]
    fn test_auth_token_valid() {
        let config = make_config_with_auth("token", Some("secret-token"));
        assert!(authenticate(&config, "secret-token").is_ok());
    }

    #[test]
    fn test_auth_token_invalid() {
        let config = make_config_with_auth("token", Some("secret-token"));
        let err = authenticate(&config, "wrong-token").unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[test]
    fn test_auth_token_not_configured() {
        let config = make_config_with_auth("token", None);
        assert!(authenticate(&config, "secret-token").is_err());
    }

    #[test]
    fn test_auth_unknown_mode() {
        let config = make_config_with_auth("oauth", None);
        assert!(authenticate(&config, "x").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
