//! Message dispatch for the connection protocol and presentation rooms.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use vidlisync_core::error::{Result, SyncError};
use vidlisync_core::protocol::{ClientMessage, FinalTranslation, ServerMessage, decode_audio};
use vidlisync_core::types::VoiceProfile;
use vidlisync_pipeline::{ChunkOutcome, FanoutOutcome, SessionSpec};

use crate::connection::authenticate;
use crate::rooms::room_session_id;
use crate::state::GatewayState;

/// What a handler needs to know about the calling connection.
struct Caller {
    user_id: Option<String>,
    session_id: Option<String>,
    room_code: Option<String>,
}

async fn caller(state: &GatewayState, conn_id: &str) -> Result<Caller> {
    let connections = state.connections.read().await;
    let conn = connections
        .get(conn_id)
        .ok_or_else(|| SyncError::NotFound(format!("Connection {conn_id} not found")))?;
    Ok(Caller {
        user_id: conn.user_id.clone(),
        session_id: conn.session_id.clone(),
        room_code: conn.room_code.clone(),
    })
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::Malformed(format!("Missing {field}")))
}

fn room_of(caller: &Caller) -> Result<&str> {
    caller
        .room_code
        .as_deref()
        .ok_or_else(|| SyncError::NotFound("Not in a presentation".into()))
}

/// Room of a caller issuing a presenter-only action. Outside a room the
/// caller is not a presenter of anything.
fn presenter_room_of<'a>(caller: &'a Caller, action: &str) -> Result<&'a str> {
    caller
        .room_code
        .as_deref()
        .ok_or_else(|| SyncError::Unauthorized(format!("Only the presenter can {action}")))
}

/// Dispatch one validated client message.
pub async fn handle_message(
    state: &Arc<GatewayState>,
    conn_id: &str,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::Authenticate { user_id, token } => {
            handle_authenticate(state, conn_id, &user_id, &token).await
        }
        ClientMessage::StartStream {
            voice_profile,
            target_language,
            source_language,
        } => {
            handle_start_stream(state, conn_id, voice_profile, &target_language, source_language)
                .await
        }
        ClientMessage::AudioChunk { audio_data } => {
            handle_audio_chunk(state, conn_id, audio_data.as_deref()).await
        }
        ClientMessage::EndStream => handle_end_stream(state, conn_id).await,
        ClientMessage::Ping => {
            let now = Utc::now();
            state
                .send_to(
                    conn_id,
                    &ServerMessage::Pong {
                        timestamp: now,
                        server_time: now,
                    },
                )
                .await;
            Ok(())
        }
        room_msg => handle_room_message(state, conn_id, room_msg).await,
    }
}

// --- Connection protocol ---

async fn handle_authenticate(
    state: &Arc<GatewayState>,
    conn_id: &str,
    user_id: &Option<String>,
    token: &Option<String>,
) -> Result<()> {
    let caller = caller(state, conn_id).await?;
    if caller.session_id.is_some() {
        return Err(SyncError::Malformed(
            "Cannot re-authenticate while a stream is active".into(),
        ));
    }

    let user_id = required(user_id, "user_id")?;
    let token = required(token, "token")?;
    authenticate(&state.config, token)?;

    if let Some(conn) = state.connections.write().await.get_mut(conn_id) {
        conn.user_id = Some(user_id.to_string());
    }
    info!(conn_id, user_id, "Connection authenticated");
    state
        .send_to(
            conn_id,
            &ServerMessage::Authenticated {
                user_id: user_id.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
    Ok(())
}

async fn handle_start_stream(
    state: &Arc<GatewayState>,
    conn_id: &str,
    voice_profile: Option<VoiceProfile>,
    target_language: &Option<String>,
    source_language: Option<String>,
) -> Result<()> {
    let caller = caller(state, conn_id).await?;
    let user_id = caller
        .user_id
        .ok_or_else(|| SyncError::Unauthorized("Authentication required".into()))?;
    if let Some(active) = caller.session_id {
        return Err(SyncError::Malformed(format!(
            "Stream {active} already active"
        )));
    }

    let voice_profile =
        voice_profile.ok_or_else(|| SyncError::Malformed("Missing voice_profile".into()))?;
    let target_language = required(target_language, "target_language")?.to_string();
    let source_language = source_language.filter(|s| !s.trim().is_empty());

    let session_id = state.sessions.open(SessionSpec {
        user_id,
        voice_profile,
        target_language: target_language.clone(),
        source_language: source_language.clone(),
    })?;

    let attached = match state.connections.write().await.get_mut(conn_id) {
        Some(conn) => {
            conn.session_id = Some(session_id.clone());
            true
        }
        None => false,
    };
    if !attached {
        // Connection went away while the session was being opened.
        let _ = state.sessions.close(&session_id).await;
        return Err(SyncError::NotFound(format!("Connection {conn_id} not found")));
    }

    state
        .send_to(
            conn_id,
            &ServerMessage::StreamStarted {
                session_id,
                target_language,
                source_language,
                timestamp: Utc::now(),
            },
        )
        .await;
    Ok(())
}

async fn handle_audio_chunk(
    state: &Arc<GatewayState>,
    conn_id: &str,
    audio_data: Option<&str>,
) -> Result<()> {
    let caller = caller(state, conn_id).await?;
    let session_id = caller
        .session_id
        .ok_or_else(|| SyncError::NotFound("No active stream session".into()))?;
    let chunk = decode_audio(audio_data)?;

    match state.sessions.push_chunk(&session_id, chunk).await? {
        ChunkOutcome::Buffering => {}
        ChunkOutcome::Processed(result) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_pipeline(result.success, result.performance_metrics.total_time_ms);
            state
                .send_to(conn_id, &ServerMessage::translation_result(&session_id, &result))
                .await;
        }
        ChunkOutcome::Discarded => {
            debug!(conn_id, session_id = %session_id, "Result discarded after session close");
        }
    }
    Ok(())
}

async fn handle_end_stream(state: &Arc<GatewayState>, conn_id: &str) -> Result<()> {
    let session_id = {
        let mut connections = state.connections.write().await;
        let conn = connections
            .get_mut(conn_id)
            .ok_or_else(|| SyncError::NotFound(format!("Connection {conn_id} not found")))?;
        conn.session_id
            .take()
            .ok_or_else(|| SyncError::NotFound("No active stream session".into()))?
    };

    let summary = state.sessions.close(&session_id).await?;
    state
        .send_to(
            conn_id,
            &ServerMessage::StreamEnded {
                session_id,
                chunks_processed: summary.chunks_processed,
                final_translation: summary.final_result.as_ref().map(FinalTranslation::from_result),
                timestamp: Utc::now(),
            },
        )
        .await;
    Ok(())
}

// --- Presentation rooms ---

async fn handle_room_message(
    state: &Arc<GatewayState>,
    conn_id: &str,
    msg: ClientMessage,
) -> Result<()> {
    let caller = caller(state, conn_id).await?;

    match msg {
        ClientMessage::JoinPresentation {
            room_code,
            participant_name,
            selected_language,
            is_presenter,
            voice_profile,
        } => {
            let code = required(&room_code, "room_code")?;
            let name = required(&participant_name, "participant_name")?;

            if let Some(current) = caller.room_code.as_deref().filter(|c| *c != code) {
                leave_room(state, conn_id, current).await;
            }

            let outcome =
                state
                    .rooms
                    .join(code, conn_id, name, &selected_language, is_presenter, voice_profile);
            if let Some(conn) = state.connections.write().await.get_mut(conn_id) {
                conn.room_code = Some(code.to_string());
            }
            if let Some(previous) = outcome.replaced_presenter {
                // The room session carries the old presenter's voice; the next
                // presenter_audio opens a fresh one.
                if let Ok(chunks) = state.sessions.abort(&room_session_id(code)).await {
                    debug!(room_code = %code, %previous, chunks, "Room session reset for new presenter");
                }
            }
            state.deliver(outcome.deliveries).await;
            Ok(())
        }

        ClientMessage::PresenterAudio { audio_data } => {
            let code = presenter_room_of(&caller, "send presenter audio")?;
            let stream = state.rooms.presenter_stream(code, conn_id)?;
            let chunk = decode_audio(audio_data.as_deref())?;

            if stream.target_languages.is_empty() {
                debug!(room_code = %code, "No listeners, presenter audio not forwarded");
                return Ok(());
            }

            let session_id = state.sessions.open_or_get(
                &stream.session_id,
                SessionSpec {
                    user_id: conn_id.to_string(),
                    voice_profile: stream.voice_profile,
                    target_language: stream.source_language.clone(),
                    source_language: Some(stream.source_language),
                },
            )?;

            match state
                .sessions
                .push_fanout_chunk(&session_id, chunk, &stream.target_languages)
                .await?
            {
                FanoutOutcome::Processed(result) if result.success => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_pipeline(true, result.total_time_ms);
                    let deliveries = state.rooms.distribute(code, &result);
                    state.deliver(deliveries).await;
                }
                FanoutOutcome::Processed(result) => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_pipeline(false, result.total_time_ms);
                    warn!(
                        room_code = %code,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Presenter utterance failed"
                    );
                }
                FanoutOutcome::Buffering | FanoutOutcome::Discarded => {}
            }
            Ok(())
        }

        ClientMessage::ParticipantMute { participant_id } => {
            let code = presenter_room_of(&caller, "mute")?;
            let target = required(&participant_id, "participant_id")?;
            let deliveries = state.rooms.set_muted(code, conn_id, target, true)?;
            state.deliver(deliveries).await;
            Ok(())
        }

        ClientMessage::ParticipantUnmute { participant_id } => {
            let code = presenter_room_of(&caller, "unmute")?;
            let target = required(&participant_id, "participant_id")?;
            let deliveries = state.rooms.set_muted(code, conn_id, target, false)?;
            state.deliver(deliveries).await;
            Ok(())
        }

        ClientMessage::AllowSpeak { participant_id } => {
            let code = presenter_room_of(&caller, "allow participants to speak")?;
            let target = required(&participant_id, "participant_id")?;
            let deliveries = state.rooms.allow_speak(code, conn_id, target)?;
            state.deliver(deliveries).await;
            Ok(())
        }

        ClientMessage::RaiseHand { raised } => {
            let code = room_of(&caller)?;
            let deliveries = state.rooms.set_hand(code, conn_id, raised)?;
            state.deliver(deliveries).await;
            Ok(())
        }

        ClientMessage::UpdateLanguage { language } => {
            let code = room_of(&caller)?;
            let language = required(&language, "language")?;
            let deliveries = state.rooms.update_language(code, conn_id, language)?;
            state.deliver(deliveries).await;
            Ok(())
        }

        ClientMessage::EndPresentation => {
            let code = presenter_room_of(&caller, "end the presentation")?.to_string();
            let (deliveries, members) = state.rooms.end(&code, conn_id)?;
            state.deliver(deliveries).await;
            close_room(state, &code, &members).await;
            Ok(())
        }

        other => Err(SyncError::Malformed(format!(
            "Unexpected message type: {}",
            other.kind()
        ))),
    }
}

/// Take a connection out of its room. A departing presenter ends the room.
pub async fn leave_room(state: &Arc<GatewayState>, conn_id: &str, code: &str) {
    let outcome = state.rooms.leave(code, conn_id);
    if let Some(conn) = state.connections.write().await.get_mut(conn_id) {
        if conn.room_code.as_deref() == Some(code) {
            conn.room_code = None;
        }
    }
    state.deliver(outcome.deliveries).await;
    if let Some(members) = outcome.ended_members {
        close_room(state, code, &members).await;
    }
}

/// Release room-scoped state after a room ended.
async fn close_room(state: &Arc<GatewayState>, code: &str, members: &[String]) {
    {
        let mut connections = state.connections.write().await;
        for id in members {
            if let Some(conn) = connections.get_mut(id) {
                if conn.room_code.as_deref() == Some(code) {
                    conn.room_code = None;
                }
            }
        }
    }
    if let Ok(chunks) = state.sessions.abort(&room_session_id(code)).await {
        debug!(room_code = %code, chunks, "Room session aborted");
    }
}
