//! HTTP client for a voice cloning / lip-sync service.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST /voice/clone`: JSON `{text, voice_profile, target_language}` -> PCM bytes
//! - `POST /lipsync`: JSON `{audio_data, face_image}` (base64) -> video bytes
//! - `GET /models`: JSON object of model name -> version

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use vidlisync_core::config::VoiceEngineConfig;
use vidlisync_core::types::VoiceProfile;

use crate::VoiceSynthesisEngine;

pub struct HttpVoiceEngine {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    models: RwLock<BTreeMap<String, String>>,
    ready: AtomicBool,
}

impl HttpVoiceEngine {
    pub fn new(base_url: &str, config: &VoiceEngineConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            client: reqwest::Client::new(),
            models: RwLock::new(BTreeMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    async fn send_for_bytes(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let resp = self.authorized(req).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{what} error {status}: {body}");
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn fetch_models(&self) -> Result<BTreeMap<String, String>> {
        let resp = self
            .authorized(self.client.get(self.url("/models")))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("Voice service /models returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl VoiceSynthesisEngine for HttpVoiceEngine {
    fn id(&self) -> &str {
        "http"
    }

    async fn initialize(&self) -> Result<()> {
        let models = self.fetch_models().await?;
        info!(base_url = %self.base_url, models = models.len(), "Voice engine initialized");
        *self.models.write().await = models;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn clone_voice(
        &self,
        text: &str,
        profile: &VoiceProfile,
        target_language: &str,
    ) -> Result<Vec<u8>> {
        debug!(chars = text.len(), target_language, "Requesting voice clone");
        let req = self.client.post(self.url("/voice/clone")).json(&json!({
            "text": text,
            "voice_profile": profile,
            "target_language": target_language,
        }));
        self.send_for_bytes(req, "Voice clone").await
    }

    async fn generate_lip_sync(&self, audio: &[u8], face_image: &[u8]) -> Result<Vec<u8>> {
        let req = self.client.post(self.url("/lipsync")).json(&json!({
            "audio_data": STANDARD.encode(audio),
            "face_image": STANDARD.encode(face_image),
        }));
        self.send_for_bytes(req, "Lip sync").await
    }

    async fn model_versions(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.models.read().await.clone())
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_models().await.map(|_| ())
    }
}
