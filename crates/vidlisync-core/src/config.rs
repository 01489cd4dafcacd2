//! Configuration loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level VidLiSync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engines: Option<EnginesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<GatewayAuthConfig>,

    /// Connections silent for longer than this are torn down by the sweep.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Largest accepted WebSocket text frame, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            auth: None,
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_port() -> u16 {
    8765
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayAuthConfig {
    /// Auth mode: "none" or "token". Default: "none".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl GatewayAuthConfig {
    /// Resolve the shared token from direct value or env var.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }

    /// Get the effective auth mode.
    pub fn effective_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("none")
    }
}

// --- Pipeline ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_latency_target")]
    pub latency_target_ms: u64,

    #[serde(default = "default_max_sessions")]
    pub max_concurrent_sessions: usize,

    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f64,

    #[serde(default = "default_quality_threshold")]
    pub voice_quality_threshold: f64,

    #[serde(default = "default_quality_threshold")]
    pub lip_sync_quality_threshold: f64,

    /// Per-adapter-call timeout. Unset means no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_ms: Option<u64>,

    /// Pinned model name -> version map the voice engine must declare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_manifest: Option<BTreeMap<String, String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latency_target_ms: default_latency_target(),
            max_concurrent_sessions: default_max_sessions(),
            accuracy_threshold: default_accuracy_threshold(),
            voice_quality_threshold: default_quality_threshold(),
            lip_sync_quality_threshold: default_quality_threshold(),
            stage_timeout_ms: None,
            model_manifest: None,
        }
    }
}

impl PipelineConfig {
    /// The configured manifest, or the pinned default set.
    pub fn manifest(&self) -> BTreeMap<String, String> {
        self.model_manifest
            .clone()
            .unwrap_or_else(default_model_manifest)
    }
}

fn default_latency_target() -> u64 {
    400
}

fn default_max_sessions() -> usize {
    100
}

fn default_accuracy_threshold() -> f64 {
    0.95
}

fn default_quality_threshold() -> f64 {
    0.8
}

/// Model versions the synthesis engine is pinned to.
pub fn default_model_manifest() -> BTreeMap<String, String> {
    [
        ("voice_clone", "wunjo-voice-v2.1"),
        ("lip_sync", "wunjo-lips-v1.8"),
        ("face_detect", "retinaface-resnet50"),
        ("whisper", "whisper-large-v3"),
        ("vocoder", "hifigan-universal-v1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// --- Engines ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechEngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationEngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceEngineConfig>,
}

/// Speech-to-text engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechEngineConfig {
    /// Provider: "mock", "openai" or "groq" (default: "mock").
    #[serde(default = "default_mock_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl SpeechEngineConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text translation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEngineConfig {
    /// Provider: "mock" or "google" (default: "mock").
    #[serde(default = "default_mock_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl TranslationEngineConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Voice cloning / lip-sync service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEngineConfig {
    /// Provider: "mock" or "http" (default: "mock").
    #[serde(default = "default_mock_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl VoiceEngineConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_mock_provider() -> String {
    "mock".into()
}

// --- Logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "vidlisync_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::SyncError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| crate::error::SyncError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn auth_mode(&self) -> &str {
        self.gateway
            .as_ref()
            .and_then(|g| g.auth.as_ref())
            .map(|a| a.effective_mode())
            .unwrap_or("none")
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.idle_timeout_secs == 0 {
                errors.push("Gateway idle_timeout_secs cannot be 0".to_string());
            }
            if let Some(auth) = &gw.auth {
                match auth.effective_mode() {
                    "none" => {}
                    "token" => {
                        if auth.resolve_token().is_none() {
                            errors.push("Auth mode 'token' requires a token".to_string());
                        }
                    }
                    other => errors.push(format!("Unknown auth mode: {other}")),
                }
            }
        }

        if let Some(p) = &self.pipeline {
            if p.max_concurrent_sessions == 0 {
                errors.push("Pipeline max_concurrent_sessions cannot be 0".to_string());
            }
            if p.model_manifest.as_ref().is_some_and(|m| m.is_empty()) {
                errors.push("Pipeline model_manifest cannot be empty".to_string());
            }
        }

        if let Some(engines) = &self.engines {
            if let Some(s) = &engines.speech {
                if s.provider != "mock" && s.resolve_api_key().is_none() {
                    warnings.push(format!(
                        "Speech engine '{}' has no API key configured, falling back to mock",
                        s.provider
                    ));
                }
            }
            if let Some(t) = &engines.translation {
                if t.provider != "mock" && t.resolve_api_key().is_none() {
                    warnings.push(format!(
                        "Translation engine '{}' has no API key configured, falling back to mock",
                        t.provider
                    ));
                }
            }
            if let Some(v) = &engines.voice {
                if v.provider != "mock" && v.base_url.is_none() {
                    warnings.push(format!(
                        "Voice engine '{}' has no base_url configured, falling back to mock",
                        v.provider
                    ));
                }
            }
        }

        (warnings, errors)
    }
}

/// Base directory for VidLiSync data: `~/.vidlisync/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vidlisync")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_VLS_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_VLS_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_VLS_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_VLS_TEST}"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8765);
        assert_eq!(config.auth_mode(), "none");
        let pipeline = config.pipeline();
        assert_eq!(pipeline.latency_target_ms, 400);
        assert_eq!(pipeline.max_concurrent_sessions, 100);
        assert_eq!(pipeline.manifest().len(), 5);
        assert_eq!(config.gateway().idle_timeout_secs, 300);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/vidlisync/config.json")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                gateway: { port: 9000, idle_timeout_secs: 30 },
                pipeline: { max_concurrent_sessions: 2, stage_timeout_ms: 1500 },
                engines: { speech: { provider: "groq", api_key: "k" } },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(config.gateway().idle_timeout_secs, 30);
        assert_eq!(config.gateway().sweep_interval_secs, 60);
        assert_eq!(config.pipeline().max_concurrent_sessions, 2);
        assert_eq!(config.pipeline().stage_timeout_ms, Some(1500));
        let speech = config.engines.unwrap().speech.unwrap();
        assert_eq!(speech.provider, "groq");
        assert_eq!(speech.resolve_api_key().as_deref(), Some("k"));
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ gateway: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn test_auth_resolve_token_env() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_VLS_GW_TOKEN", "from-env") };
        let auth = GatewayAuthConfig {
            mode: Some("token".into()),
            token: None,
            token_env: Some("TEST_VLS_GW_TOKEN".into()),
        };
        assert_eq!(auth.resolve_token(), Some("from-env".into()));

        let direct = GatewayAuthConfig {
            token: Some("direct".into()),
            ..auth.clone()
        };
        // Direct value takes priority
        assert_eq!(direct.resolve_token(), Some("direct".into()));
        unsafe { std::env::remove_var("TEST_VLS_GW_TOKEN") };
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config {
            engines: Some(EnginesConfig {
                speech: Some(SpeechEngineConfig {
                    provider: "openai".into(),
                    api_key: None,
                    api_key_env: None,
                    model: None,
                    base_url: None,
                }),
                ..Default::default()
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(errors.is_empty());
        assert!(
            warnings.iter().any(|w| w.contains("openai") && w.contains("mock")),
            "Expected a mock-fallback warning, got: {warnings:?}"
        );
    }

    #[test]
    fn test_validate_errors() {
        let config = Config {
            gateway: Some(GatewayConfig {
                port: 0,
                auth: Some(GatewayAuthConfig {
                    mode: Some("token".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            pipeline: Some(PipelineConfig {
                max_concurrent_sessions: 0,
                model_manifest: Some(BTreeMap::new()),
                ..Default::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert_eq!(errors.len(), 4, "got: {errors:?}");
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("token")));
    }
}
