//! Local mock engines.
//!
//! Used when no hosted engine is configured and as test doubles. Each mock has
//! builder knobs for fixed output, injected failure and artificial latency,
//! and counts the calls it receives.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use vidlisync_core::config::default_model_manifest;
use vidlisync_core::types::VoiceProfile;

use crate::audio::{SAMPLE_RATE, pcm_duration_secs};
use crate::{SpeechEngine, Transcription, TranslationEngine, Translation, VoiceSynthesisEngine};

async fn simulate(delay: Option<Duration>) {
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
}

// --- Speech ---

pub struct MockSpeechEngine {
    text: Option<String>,
    confidence: f64,
    fail: bool,
    fail_init: bool,
    delay: Option<Duration>,
    ready: AtomicBool,
    healthy: AtomicBool,
    calls: AtomicUsize,
    received: Mutex<Vec<usize>>,
}

impl Default for MockSpeechEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpeechEngine {
    pub fn new() -> Self {
        Self {
            text: None,
            confidence: 0.95,
            fail: false,
            fail_init: false,
            delay: None,
            ready: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Always transcribe to `text` instead of the length-based default.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Byte length of every utterance transcribed so far, in call order.
    pub fn received(&self) -> Vec<usize> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechEngine for MockSpeechEngine {
    fn id(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<()> {
        if self.fail_init {
            anyhow::bail!("mock speech engine failed to initialize");
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.received.lock() {
            r.push(audio.len());
        }
        simulate(self.delay).await;
        if self.fail {
            anyhow::bail!("mock speech engine failure");
        }

        let text = match &self.text {
            Some(t) => t.clone(),
            None => {
                let secs = pcm_duration_secs(audio);
                if secs < 1.0 {
                    "Hello".to_string()
                } else if secs < 3.0 {
                    "Hello, how are you?".to_string()
                } else {
                    "Hello, how are you? This is a test of the speech recognition system."
                        .to_string()
                }
            }
        };

        Ok(Transcription {
            text,
            language: language_hint.unwrap_or("en").to_string(),
            confidence: self.confidence,
        })
    }

    async fn health_check(&self) -> Result<()> {
        if !self.healthy.load(Ordering::SeqCst) {
            anyhow::bail!("mock speech engine unhealthy");
        }
        Ok(())
    }
}

// --- Translation ---

const PHRASES: &[(&str, &str, &str)] = &[
    ("hello", "es", "hola"),
    ("hello", "fr", "bonjour"),
    ("hello", "de", "hallo"),
    ("hello", "it", "ciao"),
    ("hello", "pt", "olá"),
    ("hello", "ru", "привет"),
    ("hello", "zh", "你好"),
    ("hello", "ja", "こんにちは"),
    ("hello", "ko", "안녕하세요"),
    ("how are you", "es", "cómo estás"),
    ("how are you", "fr", "comment allez-vous"),
    ("how are you", "de", "wie geht es dir"),
];

pub struct MockTranslationEngine {
    confidence: f64,
    fail: bool,
    fail_languages: HashSet<String>,
    fail_normalizer: bool,
    delay: Option<Duration>,
    ready: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockTranslationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranslationEngine {
    pub fn new() -> Self {
        Self {
            confidence: 0.9,
            fail: false,
            fail_languages: HashSet::new(),
            fail_normalizer: false,
            delay: None,
            ready: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Fail only translations into `language`.
    pub fn failing_for(mut self, language: impl Into<String>) -> Self {
        self.fail_languages.insert(language.into());
        self
    }

    pub fn failing_normalizer(mut self) -> Self {
        self.fail_normalizer = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Look up a canned translation, ignoring case and trailing punctuation.
fn phrase(text: &str, target_language: &str) -> Option<&'static str> {
    let key = text
        .trim()
        .trim_end_matches(['.', '!', '?', ','])
        .to_lowercase();
    PHRASES
        .iter()
        .find(|(src, lang, _)| *src == key && *lang == target_language)
        .map(|(_, _, out)| *out)
}

#[async_trait]
impl TranslationEngine for MockTranslationEngine {
    fn id(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        _source_language: Option<&str>,
    ) -> Result<Translation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay).await;
        if self.fail || self.fail_languages.contains(target_language) {
            anyhow::bail!("mock translation failure for '{target_language}'");
        }
        if text.trim().is_empty() {
            return Ok(Translation {
                text: String::new(),
                confidence: 1.0,
            });
        }

        let translated = match phrase(text, target_language) {
            Some(p) => p.to_string(),
            None => format!("[{target_language}] {text}"),
        };
        Ok(Translation {
            text: translated,
            confidence: self.confidence,
        })
    }

    fn optimize_for_speech(&self, text: &str, _target_language: &str) -> Result<String> {
        if self.fail_normalizer {
            anyhow::bail!("mock normalizer failure");
        }
        Ok(crate::normalize::optimize_for_speech(text))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// --- Voice synthesis ---

/// Placeholder returned by [`MockVoiceEngine::generate_lip_sync`].
pub const PLACEHOLDER_VIDEO: &[u8] = b"placeholder_video_data";

/// Synthesized samples per input character (100 ms at [`SAMPLE_RATE`]).
const SAMPLES_PER_CHAR: usize = SAMPLE_RATE as usize / 10;

pub struct MockVoiceEngine {
    versions: BTreeMap<String, String>,
    fail: bool,
    fail_lip_sync: bool,
    delay: Option<Duration>,
    ready: AtomicBool,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockVoiceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVoiceEngine {
    /// A mock that declares exactly the pinned model manifest.
    pub fn new() -> Self {
        Self {
            versions: default_model_manifest(),
            fail: false,
            fail_lip_sync: false,
            delay: None,
            ready: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_versions(mut self, versions: BTreeMap<String, String>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn failing_lip_sync(mut self) -> Self {
        self.fail_lip_sync = true;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceSynthesisEngine for MockVoiceEngine {
    fn id(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn clone_voice(
        &self,
        text: &str,
        _profile: &VoiceProfile,
        _target_language: &str,
    ) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay).await;
        if self.fail {
            anyhow::bail!("mock voice synthesis failure");
        }

        let samples = text.chars().count() * SAMPLES_PER_CHAR;
        let level = (i16::MAX / 20).to_le_bytes();
        Ok(level.iter().copied().cycle().take(samples * 2).collect())
    }

    async fn generate_lip_sync(&self, _audio: &[u8], _face_image: &[u8]) -> Result<Vec<u8>> {
        simulate(self.delay).await;
        if self.fail_lip_sync {
            anyhow::bail!("mock lip sync failure");
        }
        Ok(PLACEHOLDER_VIDEO.to_vec())
    }

    async fn model_versions(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.versions.clone())
    }

    async fn health_check(&self) -> Result<()> {
        if !self.healthy.load(Ordering::SeqCst) {
            anyhow::bail!("mock voice engine unhealthy");
        }
        Ok(())
    }
}
