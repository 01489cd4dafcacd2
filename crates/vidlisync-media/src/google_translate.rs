//! Google Cloud Translation (v2 REST) engine.
//!
//! Auth is via API key in query parameter.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vidlisync_core::config::TranslationEngineConfig;

use crate::{TranslationEngine, Translation};

const DEFAULT_BASE_URL: &str = "https://translation.googleapis.com";

/// The v2 API reports no confidence; this is what callers see instead.
const REPORTED_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslatedText {
    translated_text: String,
}

pub struct GoogleTranslateEngine {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl GoogleTranslateEngine {
    pub fn new(config: &TranslationEngineConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolve_api_key(),
            client: reqwest::Client::new(),
            ready: AtomicBool::new(false),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/language/translate/v2", self.base_url)
    }
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: TranslateResponse = serde_json::from_str(body)?;
    parsed
        .data
        .translations
        .into_iter()
        .next()
        .map(|t| t.translated_text)
        .ok_or_else(|| anyhow::anyhow!("Translation response contained no translations"))
}

#[async_trait]
impl TranslationEngine for GoogleTranslateEngine {
    fn id(&self) -> &str {
        "google"
    }

    async fn initialize(&self) -> Result<()> {
        if self.api_key.is_none() {
            anyhow::bail!("No Google Translate API key configured");
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(base_url = %self.base_url, "Translation engine initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
    ) -> Result<Translation> {
        if text.trim().is_empty() {
            return Ok(Translation {
                text: String::new(),
                confidence: 1.0,
            });
        }

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No Google Translate API key configured"))?;

        let request = TranslateRequest {
            q: text,
            target: target_language,
            source: source_language,
            format: "text",
        };

        debug!(target_language, chars = text.len(), "Sending text for translation");

        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Translation API error {status}: {body}");
        }

        let body = resp.text().await?;
        Ok(Translation {
            text: parse_response(&body)?,
            confidence: REPORTED_CONFIDENCE,
        })
    }

    async fn health_check(&self) -> Result<()> {
        if !self.is_ready() {
            anyhow::bail!("Translation engine not initialized");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(base_url: Option<&str>) -> GoogleTranslateEngine {
        GoogleTranslateEngine::new(&TranslationEngineConfig {
            provider: "google".into(),
            api_key: None,
            api_key_env: None,
            base_url: base_url.map(Into::into),
        })
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            engine(None).endpoint(),
            "https://translation.googleapis.com/language/translate/v2"
        );
        assert_eq!(
            engine(Some("http://127.0.0.1:8080/")).endpoint(),
            "http://127.0.0.1:8080/language/translate/v2"
        );
    }

    #[test]
    fn test_request_shape() {
        let req = TranslateRequest {
            q: "hello",
            target: "es",
            source: None,
            format: "text",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["q"], "hello");
        assert_eq!(json["target"], "es");
        assert!(json.get("source").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"data":{"translations":[{"translatedText":"hola","detectedSourceLanguage":"en"}]}}"#;
        assert_eq!(parse_response(body).unwrap(), "hola");
        assert!(parse_response(r#"{"data":{"translations":[]}}"#).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_needs_no_network() {
        let t = engine(None).translate("  ", "es", None).await.unwrap();
        assert_eq!(t.text, "");
        assert_eq!(t.confidence, 1.0);
    }
}
