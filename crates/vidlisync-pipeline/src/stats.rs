//! Running counters and health/metrics snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weight of the newest sample in the rolling latency average.
pub const SMOOTHING_FACTOR: f64 = 0.1;

const STT_WEIGHT: f64 = 0.3;
const TRANSLATION_WEIGHT: f64 = 0.4;
const VOICE_WEIGHT: f64 = 0.3;

/// Process-wide request counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub average_latency_ms: f64,
    pub active_sessions: usize,
}

impl PipelineStats {
    /// Count one processed request. Only successes feed the latency average;
    /// the first success sets it directly.
    pub fn record(&mut self, success: bool, latency_ms: f64) {
        self.total_requests += 1;
        if !success {
            return;
        }
        self.successful_requests += 1;
        if self.successful_requests == 1 {
            self.average_latency_ms = latency_ms;
        } else {
            self.average_latency_ms =
                SMOOTHING_FACTOR * latency_ms + (1.0 - SMOOTHING_FACTOR) * self.average_latency_ms;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Weighted utterance quality in [0, 1].
pub fn quality_score(stt_confidence: f64, translation_confidence: f64, voice_quality: f64) -> f64 {
    let score = STT_WEIGHT * stt_confidence
        + TRANSLATION_WEIGHT * translation_confidence
        + VOICE_WEIGHT * voice_quality;
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub engine: String,
    pub ready: bool,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub status: HealthStatus,
    pub initialized: bool,
    /// Keyed by stage: "speech", "translation", "voice".
    pub engines: BTreeMap<String, EngineHealth>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub accuracy: f64,
    pub voice_quality: f64,
    pub lip_sync_quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub active_sessions: usize,
    pub max_concurrent_sessions: usize,
    pub latency_target_ms: u64,
    pub engines_ready: BTreeMap<String, bool>,
    pub thresholds: Thresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_success_sets_average() {
        let mut stats = PipelineStats::default();
        stats.record(true, 250.0);
        assert_eq!(stats.average_latency_ms, 250.0);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
    }

    #[test]
    fn test_exponential_smoothing() {
        let mut stats = PipelineStats::default();
        let samples = [100.0, 200.0, 400.0, 50.0];
        let mut expected = samples[0];
        stats.record(true, samples[0]);
        for s in &samples[1..] {
            stats.record(true, *s);
            expected = 0.1 * s + 0.9 * expected;
        }
        assert!((stats.average_latency_ms - expected).abs() < 1e-9);
        assert!((stats.average_latency_ms - 130.1).abs() < 1e-9);
    }

    #[test]
    fn test_failures_count_total_only() {
        let mut stats = PipelineStats::default();
        stats.record(false, 999.0);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 0);
        assert_eq!(stats.average_latency_ms, 0.0);

        // A failure before the first success does not disturb the first-sample rule
        stats.record(true, 80.0);
        assert_eq!(stats.average_latency_ms, 80.0);
        assert_eq!(stats.success_rate(), 0.5);
    }

    #[test]
    fn test_quality_score_is_clamped() {
        assert!((quality_score(0.95, 0.9, 0.8) - 0.885).abs() < 1e-9);
        assert_eq!(quality_score(5.0, 5.0, 5.0), 1.0);
        assert_eq!(quality_score(-3.0, -1.0, -2.0), 0.0);
        assert_eq!(quality_score(f64::NAN, 0.5, 0.5), 0.0);
        for (a, b, c) in [(1.2, 0.0, 0.9), (0.0, 2.0, -0.5), (0.5, 0.5, 10.0)] {
            let q = quality_score(a, b, c);
            assert!((0.0..=1.0).contains(&q), "{q} out of range");
        }
    }
}
