//! Whisper speech-to-text over the OpenAI-compatible transcription API.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use vidlisync_core::config::SpeechEngineConfig;

use crate::audio::ensure_wav;
use crate::{SpeechEngine, Transcription};

/// Confidence reported when the API returns no segment log-probabilities.
const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Get the transcription API URL for a given provider.
pub fn provider_url(config: &SpeechEngineConfig) -> String {
    if let Some(base) = &config.base_url {
        return format!("{}/audio/transcriptions", base.trim_end_matches('/'));
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions".into(),
        _ => "https://api.groq.com/openai/v1/audio/transcriptions".into(),
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

/// Map Whisper's language names ("english") to ISO 639-1 codes.
pub fn language_code(name: &str) -> Option<&'static str> {
    let code = match name.to_ascii_lowercase().as_str() {
        "english" | "en" => "en",
        "spanish" | "es" => "es",
        "french" | "fr" => "fr",
        "german" | "de" => "de",
        "italian" | "it" => "it",
        "portuguese" | "pt" => "pt",
        "russian" | "ru" => "ru",
        "chinese" | "zh" => "zh",
        "japanese" | "ja" => "ja",
        "korean" | "ko" => "ko",
        "arabic" | "ar" => "ar",
        "hindi" | "hi" => "hi",
        "dutch" | "nl" => "nl",
        "polish" | "pl" => "pl",
        "turkish" | "tr" => "tr",
        _ => return None,
    };
    Some(code)
}

/// Mean per-segment probability, clamped to [0, 1].
fn segment_confidence(segments: &[Segment]) -> f64 {
    let probs: Vec<f64> = segments
        .iter()
        .filter_map(|s| s.avg_logprob)
        .map(f64::exp)
        .collect();
    if probs.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    (probs.iter().sum::<f64>() / probs.len() as f64).clamp(0.0, 1.0)
}

fn parse_response(body: &str, language_hint: Option<&str>) -> Result<Transcription> {
    let parsed: VerboseTranscription = serde_json::from_str(body)?;
    let language = language_hint
        .map(str::to_string)
        .or_else(|| {
            parsed
                .language
                .as_deref()
                .map(|l| language_code(l).map(str::to_string).unwrap_or_else(|| l.to_string()))
        })
        .unwrap_or_else(|| "en".to_string());

    Ok(Transcription {
        text: parsed.text.trim().to_string(),
        language,
        confidence: segment_confidence(&parsed.segments),
    })
}

pub struct WhisperEngine {
    id: String,
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl WhisperEngine {
    pub fn new(config: &SpeechEngineConfig) -> Self {
        Self {
            id: format!("whisper-{}", config.provider),
            url: provider_url(config),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "whisper-large-v3".to_string()),
            api_key: config.resolve_api_key(),
            client: reqwest::Client::new(),
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SpeechEngine for WhisperEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        if self.api_key.is_none() {
            anyhow::bail!("No transcription API key configured");
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(engine = %self.id, model = %self.model, "Speech engine initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> Result<Transcription> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;

        let wav = ensure_wav(audio);
        debug!(url = %self.url, model = %self.model, wav_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);
        if let Some(lang) = language_hint {
            form = form.text("language", lang.to_string());
        }

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let body = resp.text().await?;
        parse_response(&body, language_hint)
    }

    async fn health_check(&self) -> Result<()> {
        if !self.is_ready() {
            anyhow::bail!("Speech engine not initialized");
        }
        Ok(())
    }
}
