//! Shared data model: voice profiles and pipeline results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality assumed for a voice profile that does not report one.
pub const DEFAULT_VOICE_QUALITY: f64 = 0.8;

/// Reference to a speaker's cloned voice.
///
/// The synthesis engine owns the meaning of everything beyond `id` and
/// `quality_score`; extra attributes are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl VoiceProfile {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn quality(&self) -> f64 {
        self.quality_score.unwrap_or(DEFAULT_VOICE_QUALITY)
    }
}

/// Confidence and threshold checks for one translated utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub overall_quality: f64,
    pub stt_confidence: f64,
    pub translation_confidence: f64,
    pub voice_quality: f64,
    pub meets_accuracy_threshold: bool,
    pub meets_voice_threshold: bool,
}

/// Per-stage latency of one pipeline pass, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub total_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stt_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lip_sync_time_ms: Option<f64>,
    pub meets_latency_target: bool,
    pub latency_target_ms: u64,
}

/// Output of one end-to-end speech-to-speech pass. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_text: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub synthesized_audio: Vec<u8>,
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub lip_sync_video: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    pub performance_metrics: LatencyBreakdown,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    /// A failed pass carrying only the error and the time spent so far.
    pub fn failure(error: impl Into<String>, performance_metrics: LatencyBreakdown) -> Self {
        Self {
            success: false,
            source_text: None,
            translated_text: None,
            optimized_text: None,
            synthesized_audio: Vec::new(),
            lip_sync_video: None,
            detected_language: None,
            target_language: None,
            quality_metrics: None,
            performance_metrics,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Translation and synthesis for one listener language of a fan-out pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageOutput {
    pub translated_text: String,
    pub optimized_text: String,
    #[serde(with = "base64_bytes")]
    pub synthesized_audio: Vec<u8>,
    pub translation_confidence: f64,
    pub time_ms: f64,
}

/// Output of one utterance translated into several languages at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    pub translations: BTreeMap<String, LanguageOutput>,
    pub stt_time_ms: f64,
    pub total_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FanoutResult {
    pub fn failure(error: impl Into<String>, stt_time_ms: f64, total_time_ms: f64) -> Self {
        Self {
            success: false,
            source_text: None,
            detected_language: None,
            translations: BTreeMap::new(),
            stt_time_ms,
            total_time_ms,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Serde adapter: `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<Vec<u8>>` as an optional base64 string.
pub mod base64_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_profile_defaults_quality() {
        let profile: VoiceProfile = serde_json::from_str(r#"{"id": "vp-1", "speaker": "ana"}"#).unwrap();
        assert_eq!(profile.id.as_deref(), Some("vp-1"));
        assert_eq!(profile.quality(), DEFAULT_VOICE_QUALITY);
        assert_eq!(profile.attributes["speaker"], "ana");

        let profile: VoiceProfile = serde_json::from_str(r#"{"quality_score": 0.42}"#).unwrap();
        assert_eq!(profile.quality(), 0.42);
    }

    #[test]
    fn test_pipeline_result_audio_is_base64() {
        let mut result = PipelineResult::failure("boom", LatencyBreakdown::default());
        result.synthesized_audio = vec![1, 2, 3];
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["synthesized_audio"], "AQID");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("lip_sync_video").is_none());

        let back: PipelineResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.synthesized_audio, vec![1, 2, 3]);
    }
}
