//! WebSocket wire protocol.
//!
//! Every frame is a JSON object discriminated by its `type` field. Client
//! frames are validated at the boundary into [`ClientMessage`] before any
//! dispatch happens; server frames are [`ServerMessage`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{LatencyBreakdown, PipelineResult, QualityMetrics, VoiceProfile};

/// Client -> server message types understood by the gateway.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "authenticate",
    "start_stream",
    "audio_chunk",
    "end_stream",
    "ping",
    "join_presentation",
    "presenter_audio",
    "participant_mute",
    "participant_unmute",
    "raise_hand",
    "allow_speak",
    "update_language",
    "end_presentation",
];

/// A client -> server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },
    StartStream {
        #[serde(default)]
        voice_profile: Option<VoiceProfile>,
        #[serde(default)]
        target_language: Option<String>,
        #[serde(default)]
        source_language: Option<String>,
    },
    AudioChunk {
        #[serde(default)]
        audio_data: Option<String>,
    },
    EndStream,
    Ping,

    // Presentation rooms
    JoinPresentation {
        #[serde(default)]
        room_code: Option<String>,
        #[serde(default)]
        participant_name: Option<String>,
        #[serde(default = "default_language")]
        selected_language: String,
        #[serde(default)]
        is_presenter: bool,
        #[serde(default)]
        voice_profile: Option<VoiceProfile>,
    },
    PresenterAudio {
        #[serde(default)]
        audio_data: Option<String>,
    },
    ParticipantMute {
        #[serde(default)]
        participant_id: Option<String>,
    },
    ParticipantUnmute {
        #[serde(default)]
        participant_id: Option<String>,
    },
    RaiseHand {
        #[serde(default = "default_true")]
        raised: bool,
    },
    AllowSpeak {
        #[serde(default)]
        participant_id: Option<String>,
    },
    UpdateLanguage {
        #[serde(default)]
        language: Option<String>,
    },
    EndPresentation,
}

fn default_language() -> String {
    "en".into()
}

fn default_true() -> bool {
    true
}

impl ClientMessage {
    /// Parse and validate a raw text frame.
    ///
    /// Unparsable JSON, a missing or unknown `type`, and ill-typed fields are
    /// all reported as [`SyncError::Malformed`].
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|_| SyncError::Malformed("Invalid JSON message".into()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .ok_or_else(|| SyncError::Malformed("Missing message type".into()))?;

        if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
            return Err(SyncError::Malformed(format!("Unknown message type: {kind}")));
        }

        serde_json::from_value(value)
            .map_err(|e| SyncError::Malformed(format!("Invalid {kind} message: {e}")))
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::StartStream { .. } => "start_stream",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::EndStream => "end_stream",
            Self::Ping => "ping",
            Self::JoinPresentation { .. } => "join_presentation",
            Self::PresenterAudio { .. } => "presenter_audio",
            Self::ParticipantMute { .. } => "participant_mute",
            Self::ParticipantUnmute { .. } => "participant_unmute",
            Self::RaiseHand { .. } => "raise_hand",
            Self::AllowSpeak { .. } => "allow_speak",
            Self::UpdateLanguage { .. } => "update_language",
            Self::EndPresentation => "end_presentation",
        }
    }

    /// Whether this message belongs to the presentation-room extension.
    pub fn is_room_message(&self) -> bool {
        matches!(
            self,
            Self::JoinPresentation { .. }
                | Self::PresenterAudio { .. }
                | Self::ParticipantMute { .. }
                | Self::ParticipantUnmute { .. }
                | Self::RaiseHand { .. }
                | Self::AllowSpeak { .. }
                | Self::UpdateLanguage { .. }
                | Self::EndPresentation
        )
    }
}

/// Decode base64 audio carried in a client frame.
pub fn decode_audio(field: Option<&str>) -> Result<Vec<u8>> {
    let encoded = field.ok_or_else(|| SyncError::Malformed("Missing audio_data".into()))?;
    STANDARD
        .decode(encoded)
        .map_err(|_| SyncError::Malformed("Invalid base64 audio data".into()))
}

/// One room member as shown in rosters and join notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub connection_id: String,
    pub name: String,
    pub language: String,
    pub is_presenter: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub has_raised_hand: bool,
}

/// Translation attached to a `stream_ended` summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTranslation {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub synthesized_audio: String,
}

/// A server -> client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    Authenticated {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    StreamStarted {
        session_id: String,
        target_language: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_language: Option<String>,
        timestamp: DateTime<Utc>,
    },
    TranslationResult {
        session_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translated_text: Option<String>,
        synthesized_audio: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality_metrics: Option<QualityMetrics>,
        performance_metrics: LatencyBreakdown,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    StreamEnded {
        session_id: String,
        chunks_processed: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_translation: Option<FinalTranslation>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
        server_time: DateTime<Utc>,
    },
    Error {
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    // Presentation rooms
    JoinedPresentation {
        room_code: String,
        participant_count: usize,
        participants: Vec<ParticipantInfo>,
    },
    ParticipantJoined {
        participant: ParticipantInfo,
        participant_count: usize,
    },
    ParticipantLeft {
        participant_id: String,
        participant_count: usize,
    },
    TranslatedAudio {
        audio_data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_text: Option<String>,
        translated_text: String,
        language: String,
        timestamp: DateTime<Utc>,
    },
    Muted {
        by_presenter: bool,
    },
    Unmuted {
        by_presenter: bool,
    },
    ParticipantMuted {
        participant_id: String,
    },
    ParticipantUnmuted {
        participant_id: String,
    },
    HandRaised {
        participant_id: String,
        participant_name: String,
    },
    HandLowered {
        participant_id: String,
        participant_name: String,
    },
    AllowedToSpeak {
        by_presenter: bool,
    },
    ParticipantLanguageUpdated {
        participant_id: String,
        language: String,
    },
    PresentationEnded {
        ended_by: String,
    },
}

impl ServerMessage {
    pub fn error(err: &SyncError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Build a `translation_result` frame from a pipeline pass.
    pub fn translation_result(session_id: &str, result: &PipelineResult) -> Self {
        Self::TranslationResult {
            session_id: session_id.to_string(),
            success: result.success,
            source_text: result.source_text.clone(),
            translated_text: result.translated_text.clone(),
            synthesized_audio: STANDARD.encode(&result.synthesized_audio),
            quality_metrics: result.quality_metrics.clone(),
            performance_metrics: result.performance_metrics.clone(),
            error: result.error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl FinalTranslation {
    pub fn from_result(result: &PipelineResult) -> Self {
        Self {
            success: result.success,
            source_text: result.source_text.clone(),
            translated_text: result.translated_text.clone(),
            synthesized_audio: STANDARD.encode(&result.synthesized_audio),
        }
    }
}
