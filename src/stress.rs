//! # Stress Scoring
//!
//! Turns a wearable sensor reading into a bounded distress indicator in `[0.0, 1.0]`.
//!
//! ## Formula:
//! `score = min(1.0, 0.6 * clamp(rage_probability / 100) + 0.4 * max(0, heart_rate - 75) / 40)`
//!
//! The 75 bpm baseline and the 40 bpm normalization span are fixed constants,
//! they are not exposed through configuration.

use serde::Deserialize;

/// Resting heart rate below which heart rate contributes nothing.
pub const BASELINE_HEART_RATE: f64 = 75.0;

/// Heart rate span (above baseline) that maps to a full heart rate contribution.
pub const HEART_RATE_SPAN: f64 = 40.0;

const RAGE_WEIGHT: f64 = 0.6;
const HEART_RATE_WEIGHT: f64 = 0.4;

/// Sensor fields the relay cares about.
///
/// Readings arrive as the body of a `sensor` envelope and usually carry many
/// more fields (skin temperature, HRV, device ids...). Everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SensorMetrics {
    #[serde(default)]
    pub heart_rate: Option<f64>,

    /// Legacy alias still sent by older firmware
    #[serde(default)]
    pub heart_rate_bpm: Option<f64>,

    /// Rage probability in percent (0-100)
    #[serde(default)]
    pub rage_probability: Option<f64>,
}

impl SensorMetrics {
    /// Heart rate with the legacy alias as fallback.
    ///
    /// A zero `heart_rate` counts as absent, matching the firmware that reports
    /// `0` before the optical sensor has locked on.
    pub fn effective_heart_rate(&self) -> f64 {
        self.heart_rate
            .filter(|bpm| *bpm != 0.0)
            .or(self.heart_rate_bpm)
            .unwrap_or(0.0)
    }
}

/// Compute the stress score for one reading. Pure and deterministic.
pub fn score(metrics: &SensorMetrics) -> f64 {
    let rage = (metrics.rage_probability.unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
    let elevated = (metrics.effective_heart_rate() - BASELINE_HEART_RATE).max(0.0);

    (RAGE_WEIGHT * rage + HEART_RATE_WEIGHT * elevated / HEART_RATE_SPAN).min(1.0)
}

/// Natural-language prompt forwarded to the backend for a computed score.
pub fn prompt(score: f64) -> String {
    format!("Stress {:.2}", score)
}
