//! Speech-to-speech translation pipeline.
//!
//! [`TranslationPipeline`] sequences the three engines into one pass over an
//! utterance; [`SessionManager`] owns long-lived stream sessions that buffer
//! audio chunks and flush them through the pipeline.

pub mod coordinator;
pub mod sessions;
pub mod stats;

pub use coordinator::{ProcessRequest, TranslationPipeline};
pub use sessions::{
    ChunkOutcome, CloseSummary, FLUSH_THRESHOLD, FanoutOutcome, SessionManager, SessionSpec,
};
pub use stats::{HealthStatus, PipelineHealth, PipelineMetrics, PipelineStats};
