//! Data types used by the prediction engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::types::HourlyPattern;
use crate::classify::CongestionLevel;

/// A prediction request. `day_of_week` is encoded 0 = Sunday through
/// 6 = Saturday; absent context flags are derived from hour and day.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    pub route_id: String,
    pub hour: u8,
    pub day_of_week: u8,
    pub vehicle_count: u64,
    pub is_weekend: Option<bool>,
    pub is_rush_hour: Option<bool>,
}

/// The fully derived feature vector a scoring strategy sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub hour: u8,
    pub day_of_week: u8,
    pub vehicle_count: u64,
    pub is_weekend: bool,
    pub is_rush_hour: bool,
}

/// The target context a prediction speaks about.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PredictionContext {
    pub hour: u8,
    pub day_of_week: u8,
}

/// A congestion estimate with its supporting context. Ephemeral and always
/// recomputable from current samples; never ground truth.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub route_id: String,
    pub prediction_time: DateTime<Utc>,
    pub predicted_for: PredictionContext,
    pub congestion_index: f64,
    pub congestion_level: CongestionLevel,
    pub confidence: f64,
    pub factors: FeatureVector,
}

/// Historical evidence backing one `(route, hour)` estimate.
#[derive(Debug, Clone)]
pub struct RouteHistory {
    /// The rollup cell for the requested hour, if any samples back it.
    pub pattern: Option<HourlyPattern>,
    /// Sample-count-weighted all-hour average congestion for the route.
    pub route_average: Option<f64>,
    /// Newest sample timestamp in the whole store; staleness reference.
    pub newest_sample_at: Option<DateTime<Utc>>,
}

/// A raw score produced by a strategy, before envelope assembly.
#[derive(Debug, Clone, Copy)]
pub struct Score {
    pub congestion_index: f64,
    pub confidence: f64,
}

/// Pluggable scoring capability. Implementations must be pure: identical
/// features and history yield identical scores, with no hidden randomness
/// or wall-clock dependence.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, features: &FeatureVector, history: &RouteHistory) -> Score;
}
