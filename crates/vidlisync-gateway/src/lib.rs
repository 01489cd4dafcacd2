//! WebSocket gateway for real-time speech-to-speech translation.
//!
//! The gateway hosts the WebSocket server, runs the per-connection protocol
//! state machine, forwards audio to stream sessions, and hosts multi-party
//! presentation rooms that fan translated audio out per listener language.

pub mod connection;
pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rooms;
pub mod server;
pub mod state;
pub mod sweep;

pub use server::start_gateway;
pub use state::GatewayState;
