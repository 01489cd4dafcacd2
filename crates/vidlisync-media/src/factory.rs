//! Build the engine set from configuration.

use std::sync::Arc;

use tracing::{info, warn};

use vidlisync_core::config::EnginesConfig;

use crate::google_translate::GoogleTranslateEngine;
use crate::mock::{MockSpeechEngine, MockTranslationEngine, MockVoiceEngine};
use crate::voice_service::HttpVoiceEngine;
use crate::whisper::WhisperEngine;
use crate::{SpeechEngine, TranslationEngine, VoiceSynthesisEngine};

/// One engine per pipeline stage.
#[derive(Clone)]
pub struct EngineSet {
    pub speech: Arc<dyn SpeechEngine>,
    pub translation: Arc<dyn TranslationEngine>,
    pub voice: Arc<dyn VoiceSynthesisEngine>,
}

impl EngineSet {
    /// All-mock engines.
    pub fn mock() -> Self {
        Self {
            speech: Arc::new(MockSpeechEngine::new()),
            translation: Arc::new(MockTranslationEngine::new()),
            voice: Arc::new(MockVoiceEngine::new()),
        }
    }
}

/// Pick an engine per stage. Hosted engines without credentials fall back to
/// the local mock with a warning.
pub fn build_engines(config: Option<&EnginesConfig>) -> EngineSet {
    let mut set = EngineSet::mock();
    let Some(config) = config else {
        info!("No engines configured, using mock engines");
        return set;
    };

    if let Some(speech) = &config.speech {
        match speech.provider.as_str() {
            "mock" => {}
            "openai" | "groq" if speech.resolve_api_key().is_some() => {
                set.speech = Arc::new(WhisperEngine::new(speech));
            }
            "openai" | "groq" => {
                warn!(provider = %speech.provider, "Speech engine has no API key, using mock");
            }
            other => warn!(provider = %other, "Unknown speech provider, using mock"),
        }
    }

    if let Some(translation) = &config.translation {
        match translation.provider.as_str() {
            "mock" => {}
            "google" if translation.resolve_api_key().is_some() => {
                set.translation = Arc::new(GoogleTranslateEngine::new(translation));
            }
            "google" => warn!("Google Translate has no API key, using mock"),
            other => warn!(provider = %other, "Unknown translation provider, using mock"),
        }
    }

    if let Some(voice) = &config.voice {
        match (voice.provider.as_str(), voice.base_url.as_deref()) {
            ("mock", _) => {}
            ("http", Some(base_url)) => {
                set.voice = Arc::new(HttpVoiceEngine::new(base_url, voice));
            }
            ("http", None) => warn!("Voice service has no base_url, using mock"),
            (other, _) => warn!(provider = %other, "Unknown voice provider, using mock"),
        }
    }

    info!(
        speech = set.speech.id(),
        translation = set.translation.id(),
        voice = set.voice.id(),
        "Engines selected"
    );
    set
}
