//! Congestion level classification.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierThresholds;

/// Discrete congestion label derived from the continuous index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
}

/// Converts a congestion index (0–100) into a discrete level.
///
/// | Range                    | Level  |
/// |--------------------------|--------|
/// | index < medium           | Low    |
/// | medium <= index < high   | Medium |
/// | index >= high            | High   |
///
/// Total over [0,100]. Out-of-range input is a caller bug: ingestion rejects
/// it upstream, so no clamping happens here.
pub fn classify(index: f64, thresholds: &ClassifierThresholds) -> CongestionLevel {
    match index {
        i if i < thresholds.medium => CongestionLevel::Low,
        i if i < thresholds.high => CongestionLevel::Medium,
        _ => CongestionLevel::High,
    }
}
