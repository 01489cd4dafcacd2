//! Engine adapters for the speech-to-speech pipeline.
//!
//! Each stage of the pipeline talks to an engine through one of three traits:
//! [`SpeechEngine`] (speech to text), [`TranslationEngine`] (text to text) and
//! [`VoiceSynthesisEngine`] (voice-cloned speech and lip-sync video). Concrete
//! engines are HTTP clients for hosted services or local mocks used in
//! development and tests; [`factory::build_engines`] picks one per stage from
//! configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vidlisync_core::types::VoiceProfile;

pub mod audio;
pub mod factory;
pub mod google_translate;
pub mod mock;
pub mod normalize;
pub mod voice_service;
pub mod whisper;

/// Output of a speech-to-text call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Detected (or hinted) source language code.
    pub language: String,
    pub confidence: f64,
}

/// Output of a text translation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub text: String,
    pub confidence: f64,
}

/// Speech-to-text engine.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Engine identifier (e.g., "whisper-groq", "mock").
    fn id(&self) -> &str;

    async fn initialize(&self) -> anyhow::Result<()>;

    fn is_ready(&self) -> bool;

    /// Transcribe one utterance of 16-bit mono PCM (or a WAV file).
    async fn transcribe(
        &self,
        audio: &[u8],
        language_hint: Option<&str>,
    ) -> anyhow::Result<Transcription>;

    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Text translation engine.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn id(&self) -> &str;

    async fn initialize(&self) -> anyhow::Result<()>;

    fn is_ready(&self) -> bool;

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
    ) -> anyhow::Result<Translation>;

    /// Rewrite translated text so it reads naturally when spoken.
    fn optimize_for_speech(&self, text: &str, _target_language: &str) -> anyhow::Result<String> {
        Ok(normalize::optimize_for_speech(text))
    }

    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Voice-cloned speech synthesis and lip-sync video generation.
#[async_trait]
pub trait VoiceSynthesisEngine: Send + Sync {
    fn id(&self) -> &str;

    async fn initialize(&self) -> anyhow::Result<()>;

    fn is_ready(&self) -> bool;

    /// Speak `text` in the voice described by `profile`. Returns 16-bit PCM.
    async fn clone_voice(
        &self,
        text: &str,
        profile: &VoiceProfile,
        target_language: &str,
    ) -> anyhow::Result<Vec<u8>>;

    async fn generate_lip_sync(&self, audio: &[u8], face_image: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Model name -> version declared by the engine.
    async fn model_versions(&self) -> anyhow::Result<BTreeMap<String, String>>;

    /// Check that every pinned model is loaded at exactly the pinned version.
    async fn verify_model_versions(
        &self,
        manifest: &BTreeMap<String, String>,
    ) -> anyhow::Result<bool> {
        let declared = self.model_versions().await?;
        for (model, expected) in manifest {
            match declared.get(model) {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    tracing::error!(model = %model, %expected, %actual, "Model version mismatch");
                    return Ok(false);
                }
                None => {
                    tracing::error!(model = %model, %expected, "Pinned model not loaded");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn health_check(&self) -> anyhow::Result<()>;
}
