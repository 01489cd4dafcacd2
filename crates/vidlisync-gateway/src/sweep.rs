//! Background sweep that closes idle connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::teardown_connection;
use crate::state::GatewayState;

/// Spawn the periodic idle sweep using the gateway's configured timings.
pub fn spawn_idle_sweep(state: Arc<GatewayState>) -> JoinHandle<()> {
    let gateway = state.config.gateway();
    let idle = Duration::from_secs(gateway.idle_timeout_secs);
    let every = Duration::from_secs(gateway.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let closed = sweep_idle(&state, idle).await;
            if closed > 0 {
                info!(closed, "Idle connections closed");
            }
        }
    })
}

/// Tear down every connection idle for longer than `idle`. Returns how many
/// were closed.
pub async fn sweep_idle(state: &Arc<GatewayState>, idle: Duration) -> usize {
    let stale: Vec<String> = state
        .connections
        .read()
        .await
        .values()
        .filter(|c| c.last_activity.elapsed() >= idle)
        .map(|c| c.conn_id.clone())
        .collect();

    for conn_id in &stale {
        debug!(conn_id = %conn_id, "Closing idle connection");
        teardown_connection(state, conn_id).await;
    }
    stale.len()
}
