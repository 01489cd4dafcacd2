//! Pipeline coordinator: one speech-to-speech pass over an utterance.
//!
//! Stages run in order (speech recognition, translation, speech
//! normalization, voice synthesis, optional lip sync), each timed on its own.
//! Engine failures never escape [`TranslationPipeline::process`]; they become
//! an unsuccessful [`PipelineResult`] carrying the time spent so far.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use vidlisync_core::config::PipelineConfig;
use vidlisync_core::error::{Result, SyncError};
use vidlisync_core::types::{
    FanoutResult, LanguageOutput, LatencyBreakdown, PipelineResult, QualityMetrics, VoiceProfile,
};
use vidlisync_media::factory::EngineSet;
use vidlisync_media::{SpeechEngine, TranslationEngine, VoiceSynthesisEngine};

use crate::stats::{
    EngineHealth, HealthStatus, PipelineHealth, PipelineMetrics, PipelineStats, Thresholds,
    quality_score,
};

/// One utterance to translate.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub audio: Vec<u8>,
    pub target_language: String,
    pub voice_profile: VoiceProfile,
    /// Absent means auto-detect.
    pub source_language: Option<String>,
    pub include_lip_sync: bool,
    pub face_image: Option<Vec<u8>>,
}

pub struct TranslationPipeline {
    speech: Arc<dyn SpeechEngine>,
    translation: Arc<dyn TranslationEngine>,
    voice: Arc<dyn VoiceSynthesisEngine>,
    config: PipelineConfig,
    ready: AtomicBool,
    stats: Mutex<PipelineStats>,
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

impl TranslationPipeline {
    pub fn new(engines: EngineSet, config: PipelineConfig) -> Self {
        Self {
            speech: engines.speech,
            translation: engines.translation,
            voice: engines.voice,
            config,
            ready: AtomicBool::new(false),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Initialize all three engines concurrently, then check the voice
    /// engine's models against the pinned manifest.
    pub async fn initialize(&self) -> Result<()> {
        let started = Instant::now();
        let (speech, translation, voice) = tokio::join!(
            self.speech.initialize(),
            self.translation.initialize(),
            self.voice.initialize(),
        );

        for (stage, outcome) in [("speech", speech), ("translation", translation), ("voice", voice)] {
            if let Err(e) = outcome {
                error!(stage, error = %e, "Engine initialization failed");
                return Err(SyncError::Upstream(format!(
                    "{stage} engine failed to initialize: {e}"
                )));
            }
        }

        let manifest = self.config.manifest();
        let verified = self
            .voice
            .verify_model_versions(&manifest)
            .await
            .map_err(|e| SyncError::Upstream(format!("Model verification failed: {e}")))?;
        if !verified {
            return Err(SyncError::Upstream(
                "Voice engine model versions do not match the pinned manifest".into(),
            ));
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(
            elapsed_ms = elapsed_ms(started),
            speech = self.speech.id(),
            translation = self.translation.id(),
            voice = self.voice.id(),
            "Translation pipeline initialized"
        );
        Ok(())
    }

    fn stats(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats_snapshot(&self) -> PipelineStats {
        self.stats().clone()
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.stats().active_sessions = count;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SyncError::NotReady("Translation pipeline not initialized".into()))
        }
    }

    /// Run an engine call, bounded by the configured stage timeout.
    async fn stage<T, F>(&self, name: &str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.config.stage_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| anyhow::anyhow!("{name} timed out after {ms}ms"))?,
            None => fut.await,
        }
    }

    fn finish(&self, mut perf: LatencyBreakdown, started: Instant) -> LatencyBreakdown {
        perf.total_time_ms = elapsed_ms(started);
        perf.meets_latency_target = perf.total_time_ms <= self.config.latency_target_ms as f64;
        perf
    }

    fn failed(&self, error: String, perf: LatencyBreakdown, started: Instant) -> PipelineResult {
        let perf = self.finish(perf, started);
        warn!(error = %error, elapsed_ms = perf.total_time_ms, "Pipeline pass failed");
        PipelineResult::failure(error, perf)
    }

    /// Translate one utterance end to end.
    ///
    /// Returns `Err` only for problems detected before any engine is called
    /// (not initialized, lip sync without a face image).
    pub async fn process(&self, request: ProcessRequest) -> Result<PipelineResult> {
        self.ensure_ready()?;
        if request.include_lip_sync && request.face_image.is_none() {
            return Err(SyncError::Malformed(
                "Face image required for lip sync".into(),
            ));
        }

        let started = Instant::now();
        let result = self.run(&request, started).await;
        self.stats()
            .record(result.success, result.performance_metrics.total_time_ms);
        Ok(result)
    }

    async fn run(&self, req: &ProcessRequest, started: Instant) -> PipelineResult {
        let mut perf = LatencyBreakdown {
            latency_target_ms: self.config.latency_target_ms,
            ..Default::default()
        };

        // 1. Speech recognition
        let t = Instant::now();
        let transcription = match self
            .stage(
                "Speech recognition",
                self.speech.transcribe(&req.audio, req.source_language.as_deref()),
            )
            .await
        {
            Ok(t) => t,
            Err(e) => return self.failed(format!("Speech recognition failed: {e}"), perf, started),
        };
        perf.stt_time_ms = Some(elapsed_ms(t));

        if transcription.text.trim().is_empty() {
            return self.failed("No speech detected".into(), perf, started);
        }

        // 2. Translation
        let t = Instant::now();
        let translation = match self
            .stage(
                "Translation",
                self.translation.translate(
                    &transcription.text,
                    &req.target_language,
                    Some(transcription.language.as_str()),
                ),
            )
            .await
        {
            Ok(t) => t,
            Err(e) => return self.failed(format!("Translation failed: {e}"), perf, started),
        };
        perf.translation_time_ms = Some(elapsed_ms(t));

        // 3. Normalization never fails the pass
        let optimized = self.optimize(&translation.text, &req.target_language);

        // 4. Voice synthesis
        let t = Instant::now();
        let audio = match self
            .stage(
                "Voice synthesis",
                self.voice
                    .clone_voice(&optimized, &req.voice_profile, &req.target_language),
            )
            .await
        {
            Ok(a) => a,
            Err(e) => return self.failed(format!("Voice synthesis failed: {e}"), perf, started),
        };
        perf.tts_time_ms = Some(elapsed_ms(t));

        // 5. Lip sync
        let mut video = None;
        if let (true, Some(face)) = (req.include_lip_sync, req.face_image.as_deref()) {
            let t = Instant::now();
            match self
                .stage("Lip sync", self.voice.generate_lip_sync(&audio, face))
                .await
            {
                Ok(v) => video = Some(v),
                Err(e) => return self.failed(format!("Lip sync failed: {e}"), perf, started),
            }
            perf.lip_sync_time_ms = Some(elapsed_ms(t));
        }

        let voice_quality = req.voice_profile.quality();
        let quality = QualityMetrics {
            overall_quality: quality_score(
                transcription.confidence,
                translation.confidence,
                voice_quality,
            ),
            stt_confidence: transcription.confidence,
            translation_confidence: translation.confidence,
            voice_quality,
            meets_accuracy_threshold: transcription.confidence >= self.config.accuracy_threshold
                && translation.confidence >= self.config.accuracy_threshold,
            meets_voice_threshold: voice_quality >= self.config.voice_quality_threshold,
        };

        let perf = self.finish(perf, started);
        debug!(
            total_ms = perf.total_time_ms,
            stt_ms = perf.stt_time_ms,
            translation_ms = perf.translation_time_ms,
            tts_ms = perf.tts_time_ms,
            target = %req.target_language,
            "Pipeline pass complete"
        );
        if !perf.meets_latency_target {
            warn!(
                total_ms = perf.total_time_ms,
                target_ms = perf.latency_target_ms,
                "Pipeline pass exceeded latency target"
            );
        }

        PipelineResult {
            success: true,
            source_text: Some(transcription.text),
            translated_text: Some(translation.text),
            optimized_text: Some(optimized),
            synthesized_audio: audio,
            lip_sync_video: video,
            detected_language: Some(transcription.language),
            target_language: Some(req.target_language.clone()),
            quality_metrics: Some(quality),
            performance_metrics: perf,
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn optimize(&self, text: &str, target_language: &str) -> String {
        match self.translation.optimize_for_speech(text, target_language) {
            Ok(optimized) => optimized,
            Err(e) => {
                debug!(error = %e, "Speech normalization failed, using raw translation");
                text.to_string()
            }
        }
    }

    /// Recognize speech once and translate it into several languages
    /// concurrently. Languages whose translation or synthesis fails are left
    /// out of the result.
    pub async fn process_fanout(
        &self,
        audio: &[u8],
        target_languages: &[String],
        voice_profile: &VoiceProfile,
        source_language: Option<&str>,
    ) -> Result<FanoutResult> {
        self.ensure_ready()?;
        let started = Instant::now();
        let result = self
            .run_fanout(audio, target_languages, voice_profile, source_language, started)
            .await;
        self.stats().record(result.success, result.total_time_ms);
        Ok(result)
    }

    async fn run_fanout(
        &self,
        audio: &[u8],
        target_languages: &[String],
        voice_profile: &VoiceProfile,
        source_language: Option<&str>,
        started: Instant,
    ) -> FanoutResult {
        let t = Instant::now();
        let transcription = match self
            .stage("Speech recognition", self.speech.transcribe(audio, source_language))
            .await
        {
            Ok(t) => t,
            Err(e) => {
                let stt_ms = elapsed_ms(t);
                warn!(error = %e, "Fan-out speech recognition failed");
                return FanoutResult::failure(
                    format!("Speech recognition failed: {e}"),
                    stt_ms,
                    elapsed_ms(started),
                );
            }
        };
        let stt_ms = elapsed_ms(t);

        if transcription.text.trim().is_empty() {
            return FanoutResult::failure("No speech detected", stt_ms, elapsed_ms(started));
        }

        let languages: BTreeSet<&str> = target_languages.iter().map(String::as_str).collect();
        let jobs = languages.iter().map(|lang| {
            let text = transcription.text.as_str();
            let source = transcription.language.as_str();
            async move {
                let t = Instant::now();
                let outcome = self.translate_and_speak(text, lang, source, voice_profile).await;
                (*lang, outcome.map(|(translation, optimized, audio, confidence)| {
                    LanguageOutput {
                        translated_text: translation,
                        optimized_text: optimized,
                        synthesized_audio: audio,
                        translation_confidence: confidence,
                        time_ms: elapsed_ms(t),
                    }
                }))
            }
        });

        let mut translations = BTreeMap::new();
        for (lang, outcome) in futures::future::join_all(jobs).await {
            match outcome {
                Ok(output) => {
                    translations.insert(lang.to_string(), output);
                }
                Err(e) => warn!(language = lang, error = %e, "Fan-out language failed"),
            }
        }

        let total_ms = elapsed_ms(started);
        if !languages.is_empty() && translations.is_empty() {
            return FanoutResult::failure("All target languages failed", stt_ms, total_ms);
        }

        debug!(
            languages = translations.len(),
            total_ms, "Fan-out pass complete"
        );
        FanoutResult {
            success: true,
            source_text: Some(transcription.text),
            detected_language: Some(transcription.language),
            translations,
            stt_time_ms: stt_ms,
            total_time_ms: total_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    async fn translate_and_speak(
        &self,
        text: &str,
        target_language: &str,
        source_language: &str,
        voice_profile: &VoiceProfile,
    ) -> anyhow::Result<(String, String, Vec<u8>, f64)> {
        let translation = self
            .stage(
                "Translation",
                self.translation
                    .translate(text, target_language, Some(source_language)),
            )
            .await?;
        let optimized = self.optimize(&translation.text, target_language);
        let audio = self
            .stage(
                "Voice synthesis",
                self.voice
                    .clone_voice(&optimized, voice_profile, target_language),
            )
            .await?;
        Ok((translation.text, optimized, audio, translation.confidence))
    }

    /// Readiness plus a live health check of every engine.
    pub async fn health(&self) -> PipelineHealth {
        let (speech, translation, voice) = tokio::join!(
            self.speech.health_check(),
            self.translation.health_check(),
            self.voice.health_check(),
        );

        let mut engines = BTreeMap::new();
        let entries = [
            ("speech", self.speech.id(), self.speech.is_ready(), speech),
            ("translation", self.translation.id(), self.translation.is_ready(), translation),
            ("voice", self.voice.id(), self.voice.is_ready(), voice),
        ];
        for (stage, id, ready, check) in entries {
            engines.insert(
                stage.to_string(),
                EngineHealth {
                    engine: id.to_string(),
                    ready,
                    healthy: check.is_ok(),
                    error: check.err().map(|e| e.to_string()),
                },
            );
        }

        let initialized = self.is_ready();
        let status = if !initialized {
            HealthStatus::Unhealthy
        } else if engines.values().all(|e| e.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        PipelineHealth {
            status,
            initialized,
            engines,
            timestamp: Utc::now(),
        }
    }

    pub fn metrics(&self) -> PipelineMetrics {
        let stats = self.stats_snapshot();
        let engines_ready = [
            ("speech", self.speech.is_ready()),
            ("translation", self.translation.is_ready()),
            ("voice", self.voice.is_ready()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        PipelineMetrics {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            success_rate: stats.success_rate(),
            average_latency_ms: stats.average_latency_ms,
            active_sessions: stats.active_sessions,
            max_concurrent_sessions: self.config.max_concurrent_sessions,
            latency_target_ms: self.config.latency_target_ms,
            engines_ready,
            thresholds: Thresholds {
                accuracy: self.config.accuracy_threshold,
                voice_quality: self.config.voice_quality_threshold,
                lip_sync_quality: self.config.lip_sync_quality_threshold,
            },
        }
    }
}
