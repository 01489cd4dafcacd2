//! Stream session manager.
//!
//! A session buffers incoming audio chunks and flushes them through the
//! pipeline as one utterance every [`FLUSH_THRESHOLD`] chunks. The registry
//! lock is only held for map lookups; each session has its own async lock,
//! held across a flush so chunks of one session are processed strictly in
//! arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use vidlisync_core::error::{Result, SyncError};
use vidlisync_core::types::{FanoutResult, LatencyBreakdown, PipelineResult, VoiceProfile};

use crate::coordinator::{ProcessRequest, TranslationPipeline};

/// Buffered chunks that trigger a flush.
pub const FLUSH_THRESHOLD: usize = 5;

/// One ongoing translation conversation.
#[derive(Debug)]
pub struct StreamSession {
    pub id: String,
    pub user_id: String,
    pub target_language: String,
    pub source_language: Option<String>,
    pub voice_profile: VoiceProfile,
    pub created_at: DateTime<Utc>,
    pub chunks_processed: u64,
    buffer: Vec<Vec<u8>>,
    closed: bool,
}

impl StreamSession {
    fn take_audio(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer).concat()
    }

    fn request(&self, audio: Vec<u8>) -> ProcessRequest {
        ProcessRequest {
            audio,
            target_language: self.target_language.clone(),
            voice_profile: self.voice_profile.clone(),
            source_language: self.source_language.clone(),
            include_lip_sync: false,
            face_image: None,
        }
    }

    /// Append a chunk. Returns the buffered audio once the threshold is hit.
    fn append(&mut self, chunk: Vec<u8>) -> Option<Vec<u8>> {
        self.buffer.push(chunk);
        self.chunks_processed += 1;
        (self.buffer.len() >= FLUSH_THRESHOLD).then(|| self.take_audio())
    }
}

/// Parameters of a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionSpec {
    pub user_id: String,
    pub voice_profile: VoiceProfile,
    pub target_language: String,
    pub source_language: Option<String>,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    /// Below the flush threshold; nothing was processed.
    Buffering,
    Processed(PipelineResult),
    /// The session was closed while this flush was in flight.
    Discarded,
}

#[derive(Debug)]
pub enum FanoutOutcome {
    Buffering,
    Processed(FanoutResult),
    Discarded,
}

#[derive(Debug)]
pub struct CloseSummary {
    pub session_id: String,
    pub chunks_processed: u64,
    pub final_result: Option<PipelineResult>,
}

type SessionHandle = Arc<tokio::sync::Mutex<StreamSession>>;

pub struct SessionManager {
    pipeline: Arc<TranslationPipeline>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(pipeline: Arc<TranslationPipeline>) -> Self {
        let max_sessions = pipeline.config().max_concurrent_sessions;
        Self {
            pipeline,
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn pipeline(&self) -> &Arc<TranslationPipeline> {
        &self.pipeline
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active_count(&self) -> usize {
        self.registry().len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.registry().contains_key(session_id)
    }

    /// Open a session with a generated id.
    pub fn open(&self, spec: SessionSpec) -> Result<String> {
        let id = format!(
            "stream_{}_{}_{}",
            spec.user_id,
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        self.insert(id, spec, false)
    }

    /// Open a session under a caller-chosen id, or return the existing one.
    pub fn open_or_get(&self, session_id: &str, spec: SessionSpec) -> Result<String> {
        self.insert(session_id.to_string(), spec, true)
    }

    fn insert(&self, id: String, spec: SessionSpec, reuse: bool) -> Result<String> {
        let count = {
            let mut sessions = self.registry();
            if sessions.contains_key(&id) {
                if reuse {
                    return Ok(id);
                }
                return Err(SyncError::Capacity(format!("Session {id} already exists")));
            }
            if sessions.len() >= self.max_sessions {
                warn!(max = self.max_sessions, "Session ceiling reached");
                return Err(SyncError::Capacity(format!(
                    "Maximum concurrent sessions ({}) reached",
                    self.max_sessions
                )));
            }
            let session = StreamSession {
                id: id.clone(),
                user_id: spec.user_id,
                target_language: spec.target_language,
                source_language: spec.source_language,
                voice_profile: spec.voice_profile,
                created_at: Utc::now(),
                chunks_processed: 0,
                buffer: Vec::with_capacity(FLUSH_THRESHOLD),
                closed: false,
            };
            sessions.insert(id.clone(), Arc::new(tokio::sync::Mutex::new(session)));
            sessions.len()
        };

        self.pipeline.set_active_sessions(count);
        info!(session_id = %id, active = count, "Stream session opened");
        Ok(id)
    }

    fn get(&self, session_id: &str) -> Result<SessionHandle> {
        self.registry()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("Session {session_id} not found")))
    }

    fn remove(&self, session_id: &str) -> Result<SessionHandle> {
        let (handle, count) = {
            let mut sessions = self.registry();
            let handle = sessions
                .remove(session_id)
                .ok_or_else(|| SyncError::NotFound(format!("Session {session_id} not found")))?;
            (handle, sessions.len())
        };
        self.pipeline.set_active_sessions(count);
        Ok(handle)
    }

    /// Buffer one chunk; flush through the pipeline at the threshold.
    pub async fn push_chunk(&self, session_id: &str, chunk: Vec<u8>) -> Result<ChunkOutcome> {
        let handle = self.get(session_id)?;
        let mut session = handle.lock().await;
        if session.closed {
            return Err(SyncError::NotFound(format!("Session {session_id} not found")));
        }

        let Some(audio) = session.append(chunk) else {
            return Ok(ChunkOutcome::Buffering);
        };

        debug!(session_id, bytes = audio.len(), "Flushing buffered audio");
        let result = self.pipeline.process(session.request(audio)).await?;
        if !self.contains(session_id) {
            debug!(session_id, "Session closed during flush, discarding result");
            return Ok(ChunkOutcome::Discarded);
        }
        Ok(ChunkOutcome::Processed(result))
    }

    /// Like [`push_chunk`](Self::push_chunk), but a flush translates into every
    /// language in `target_languages` instead of the session's own target.
    pub async fn push_fanout_chunk(
        &self,
        session_id: &str,
        chunk: Vec<u8>,
        target_languages: &[String],
    ) -> Result<FanoutOutcome> {
        let handle = self.get(session_id)?;
        let mut session = handle.lock().await;
        if session.closed {
            return Err(SyncError::NotFound(format!("Session {session_id} not found")));
        }

        let Some(audio) = session.append(chunk) else {
            return Ok(FanoutOutcome::Buffering);
        };

        debug!(
            session_id,
            bytes = audio.len(),
            languages = target_languages.len(),
            "Flushing buffered audio to fan-out"
        );
        let result = self
            .pipeline
            .process_fanout(
                &audio,
                target_languages,
                &session.voice_profile,
                session.source_language.as_deref(),
            )
            .await?;
        if !self.contains(session_id) {
            return Ok(FanoutOutcome::Discarded);
        }
        Ok(FanoutOutcome::Processed(result))
    }

    /// Close a session, flushing whatever is still buffered.
    pub async fn close(&self, session_id: &str) -> Result<CloseSummary> {
        let handle = self.remove(session_id)?;
        // Waits for an in-flight flush of this session to finish.
        let mut session = handle.lock().await;
        session.closed = true;

        let final_result = if session.buffer.is_empty() {
            None
        } else {
            let audio = session.take_audio();
            let request = session.request(audio);
            Some(match self.pipeline.process(request).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(session_id, error = %e, "Final flush rejected");
                    PipelineResult::failure(e.to_string(), LatencyBreakdown::default())
                }
            })
        };

        info!(
            session_id,
            chunks = session.chunks_processed,
            final_flush = final_result.is_some(),
            "Stream session closed"
        );
        Ok(CloseSummary {
            session_id: session_id.to_string(),
            chunks_processed: session.chunks_processed,
            final_result,
        })
    }

    /// Drop a session and its buffered audio without processing it.
    /// Returns the number of chunks it had received.
    pub async fn abort(&self, session_id: &str) -> Result<u64> {
        let handle = self.remove(session_id)?;
        let mut session = handle.lock().await;
        session.closed = true;
        session.buffer.clear();
        info!(session_id, chunks = session.chunks_processed, "Stream session aborted");
        Ok(session.chunks_processed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vidlisync_core::config::PipelineConfig;
    use vidlisync_media::factory::EngineSet;
    use vidlisync_media::mock::{MockSpeechEngine, MockTranslationEngine, MockVoiceEngine};

    use super::*;

    async fn manager_with(speech: MockSpeechEngine, max_sessions: usize) -> (SessionManager, Arc<MockSpeechEngine>) {
        let speech = Arc::new(speech);
        let pipeline = TranslationPipeline::new(
            EngineSet {
                speech: speech.clone(),
                translation: Arc::new(MockTranslationEngine::new()),
                voice: Arc::new(MockVoiceEngine::new()),
            },
            PipelineConfig {
                max_concurrent_sessions: max_sessions,
                ..Default::default()
            },
        );
        pipeline.initialize().await.unwrap();
        (SessionManager::new(Arc::new(pipeline)), speech)
    }

    async fn manager() -> (SessionManager, Arc<MockSpeechEngine>) {
        manager_with(MockSpeechEngine::new().with_text("Hello"), 100).await
    }

    fn spec(target: &str) -> SessionSpec {
        SessionSpec {
            user_id: "u1".into(),
            target_language: target.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_threshold_flush() {
        let (mgr, speech) = manager().await;
        let id = mgr.open(spec("es")).unwrap();
        assert!(id.starts_with("stream_u1_"));

        for i in 0..FLUSH_THRESHOLD - 1 {
            let outcome = mgr.push_chunk(&id, vec![i as u8; 10]).await.unwrap();
            assert!(matches!(outcome, ChunkOutcome::Buffering));
        }
        assert_eq!(speech.calls(), 0);

        match mgr.push_chunk(&id, vec![9; 10]).await.unwrap() {
            ChunkOutcome::Processed(result) => {
                assert!(result.success);
                assert!(result.performance_metrics.total_time_ms >= 0.0);
                assert_eq!(result.translated_text.as_deref(), Some("hola"));
            }
            other => panic!("expected a result, got {other:?}"),
        }
        // All five chunks concatenated into one utterance
        assert_eq!(speech.received(), vec![50]);

        // Buffer was cleared: the next chunk buffers again
        assert!(matches!(
            mgr.push_chunk(&id, vec![1]).await.unwrap(),
            ChunkOutcome::Buffering
        ));
    }

    #[tokio::test]
    async fn test_chunks_concatenate_in_arrival_order() {
        let (mgr, _) = manager().await;
        let id = mgr.open(spec("es")).unwrap();
        let handle = mgr.get(&id).unwrap();
        {
            let mut s = handle.lock().await;
            for i in 0..3u8 {
                assert!(s.append(vec![i, i]).is_none());
            }
            assert_eq!(s.take_audio(), vec![0, 0, 1, 1, 2, 2]);
        }
    }

    #[tokio::test]
    async fn test_close_with_remainder_flushes_once() {
        let (mgr, speech) = manager().await;
        let id = mgr.open(spec("fr")).unwrap();
        mgr.push_chunk(&id, vec![1; 4]).await.unwrap();
        mgr.push_chunk(&id, vec![2; 4]).await.unwrap();

        let summary = mgr.close(&id).await.unwrap();
        assert_eq!(summary.chunks_processed, 2);
        let result = summary.final_result.expect("final flush");
        assert_eq!(result.translated_text.as_deref(), Some("bonjour"));
        assert_eq!(speech.received(), vec![8]);
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn test_close_with_empty_buffer_has_no_result() {
        let (mgr, speech) = manager().await;
        let id = mgr.open(spec("es")).unwrap();
        for _ in 0..FLUSH_THRESHOLD {
            mgr.push_chunk(&id, vec![0; 2]).await.unwrap();
        }
        let summary = mgr.close(&id).await.unwrap();
        assert_eq!(summary.chunks_processed, FLUSH_THRESHOLD as u64);
        assert!(summary.final_result.is_none());
        assert_eq!(speech.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_double_close_are_not_found() {
        let (mgr, _) = manager().await;
        assert_eq!(
            mgr.push_chunk("nope", vec![1]).await.unwrap_err().code(),
            "not_found"
        );
        let id = mgr.open(spec("es")).unwrap();
        mgr.close(&id).await.unwrap();
        assert_eq!(mgr.close(&id).await.unwrap_err().code(), "not_found");
        assert_eq!(mgr.push_chunk(&id, vec![1]).await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let (mgr, _) = manager_with(MockSpeechEngine::new(), 2).await;
        mgr.open(spec("es")).unwrap();
        mgr.open(spec("de")).unwrap();
        let err = mgr.open(spec("fr")).unwrap_err();
        assert_eq!(err.code(), "capacity");
        assert_eq!(mgr.active_count(), 2);
        assert_eq!(mgr.pipeline().stats_snapshot().active_sessions, 2);
    }

    #[tokio::test]
    async fn test_open_or_get_reuses_session() {
        let (mgr, _) = manager().await;
        let a = mgr.open_or_get("presenter_ABC", spec("es")).unwrap();
        let b = mgr.open_or_get("presenter_ABC", spec("fr")).unwrap();
        assert_eq!(a, b);
        assert_eq!(mgr.active_count(), 1);
    }

    #[tokio::test]
    async fn test_abort_skips_pipeline() {
        let (mgr, speech) = manager().await;
        let id = mgr.open(spec("es")).unwrap();
        mgr.push_chunk(&id, vec![1; 4]).await.unwrap();
        assert_eq!(mgr.abort(&id).await.unwrap(), 1);
        assert_eq!(speech.calls(), 0);
        assert!(!mgr.contains(&id));
    }

    #[tokio::test]
    async fn test_concurrent_pushes_keep_order() {
        let (mgr, speech) = manager_with(
            MockSpeechEngine::new()
                .with_text("Hello")
                .with_delay(Duration::from_millis(20)),
            100,
        )
        .await;
        let mgr = Arc::new(mgr);
        let id = mgr.open(spec("es")).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..FLUSH_THRESHOLD * 2 {
            let mgr = mgr.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move { mgr.push_chunk(&id, vec![0; 3]).await }));
        }
        let mut processed = 0;
        for t in tasks {
            if let ChunkOutcome::Processed(_) = t.await.unwrap().unwrap() {
                processed += 1;
            }
        }
        assert_eq!(processed, 2);
        assert_eq!(speech.received(), vec![15, 15]);
    }

    #[tokio::test]
    async fn test_close_during_flush_discards_result() {
        let (mgr, _) = manager_with(
            MockSpeechEngine::new()
                .with_text("Hello")
                .with_delay(Duration::from_millis(50)),
            100,
        )
        .await;
        let mgr = Arc::new(mgr);
        let id = mgr.open(spec("es")).unwrap();
        for _ in 0..FLUSH_THRESHOLD - 1 {
            mgr.push_chunk(&id, vec![0; 2]).await.unwrap();
        }

        let flushing = {
            let mgr = mgr.clone();
            let id = id.clone();
            tokio::spawn(async move { mgr.push_chunk(&id, vec![0; 2]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let summary = mgr.close(&id).await.unwrap();
        assert!(summary.final_result.is_none());

        let outcome = flushing.await.unwrap().unwrap();
        assert!(matches!(outcome, ChunkOutcome::Discarded));
    }

    #[tokio::test]
    async fn test_fanout_chunk_flush() {
        let (mgr, _) = manager().await;
        let id = mgr.open_or_get("presenter_R1", spec("en")).unwrap();
        let targets = vec!["es".to_string(), "de".to_string()];
        for _ in 0..FLUSH_THRESHOLD - 1 {
            assert!(matches!(
                mgr.push_fanout_chunk(&id, vec![1], &targets).await.unwrap(),
                FanoutOutcome::Buffering
            ));
        }
        match mgr.push_fanout_chunk(&id, vec![1], &targets).await.unwrap() {
            FanoutOutcome::Processed(result) => {
                assert!(result.success);
                assert_eq!(result.translations["es"].translated_text, "hola");
                assert_eq!(result.translations["de"].translated_text, "hallo");
            }
            other => panic!("expected fan-out result, got {other:?}"),
        }
    }
}
