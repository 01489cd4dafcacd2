//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vidlisync_core::config::Config;
use vidlisync_core::protocol::ServerMessage;
use vidlisync_pipeline::{SessionManager, TranslationPipeline};

use crate::rooms::{Delivery, RoomRegistry};

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Arc<TranslationPipeline>,
    pub sessions: Arc<SessionManager>,
    pub rooms: RoomRegistry,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
    pub started_at: Instant,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Where a connection is in its protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connected,
    Authenticated,
    Streaming,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub room_code: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub connected_instant: Instant,
    pub last_activity: Instant,
    pub message_count: u64,
    pub event_tx: mpsc::UnboundedSender<String>,
    /// Cancelled to make the read loop exit (idle sweep).
    pub cancel: CancellationToken,
}

impl ConnectionState {
    pub fn new(conn_id: String, event_tx: mpsc::UnboundedSender<String>) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            user_id: None,
            session_id: None,
            room_code: None,
            connected_at: Utc::now(),
            connected_instant: now,
            last_activity: now,
            message_count: 0,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match (&self.user_id, &self.session_id) {
            (_, Some(_)) => Phase::Streaming,
            (Some(_), None) => Phase::Authenticated,
            (None, None) => Phase::Connected,
        }
    }

    /// Record an inbound message. Activity time never moves backwards.
    pub fn touch(&mut self) {
        self.last_activity = self.last_activity.max(Instant::now());
        self.message_count += 1;
    }

    pub fn send(&self, msg: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            let _ = self.event_tx.send(json);
        }
    }
}

/// Statistics row for `GET /connections`.
#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub connection_id: String,
    pub phase: Phase,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub room_code: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub connected_secs: f64,
    pub idle_secs: f64,
    pub message_count: u64,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, pipeline: Arc<TranslationPipeline>) -> Self {
        let sessions = Arc::new(SessionManager::new(pipeline.clone()));
        Self {
            config,
            pipeline,
            sessions,
            rooms: RoomRegistry::new(),
            connections: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    /// Send one message to a connection, if it is still registered.
    pub async fn send_to(&self, conn_id: &str, msg: &ServerMessage) {
        if let Some(conn) = self.connections.read().await.get(conn_id) {
            conn.send(msg);
        }
    }

    /// Send a batch of room deliveries.
    pub async fn deliver(&self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }
        let connections = self.connections.read().await;
        for (conn_id, msg) in deliveries {
            match connections.get(&conn_id) {
                Some(conn) => conn.send(&msg),
                None => debug!(conn_id = %conn_id, "Dropping delivery to departed connection"),
            }
        }
    }

    pub async fn connection_stats(&self) -> Vec<ConnectionStats> {
        let connections = self.connections.read().await;
        let mut stats: Vec<_> = connections
            .values()
            .map(|c| ConnectionStats {
                connection_id: c.conn_id.clone(),
                phase: c.phase(),
                user_id: c.user_id.clone(),
                session_id: c.session_id.clone(),
                room_code: c.room_code.clone(),
                connected_at: c.connected_at,
                connected_secs: c.connected_instant.elapsed().as_secs_f64(),
                idle_secs: c.last_activity.elapsed().as_secs_f64(),
                message_count: c.message_count,
            })
            .collect();
        stats.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        stats
    }
}
