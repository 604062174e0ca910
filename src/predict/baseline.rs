//! The deterministic baseline scoring strategy.

use std::sync::Arc;

use crate::analytics::utility::{round2, round4};
use crate::config::EngineConfig;
use crate::predict::types::{FeatureVector, RouteHistory, Score, ScoringStrategy};

/// Scores from the historical hourly pattern, adjusted by the requested
/// vehicle count relative to the historical mean at the same hour, plus
/// configurable rush-hour and weekend bias terms.
///
/// Confidence grows with the sample count backing the pattern and shrinks
/// with the staleness of its most recent sample, measured against the
/// newest sample in the store rather than the wall clock, so identical
/// inputs against an unchanged sample set score bit-identically. A route
/// hour with no history at all falls back to the route's all-hour average
/// with confidence 0.
pub struct BaselineStrategy {
    config: Arc<EngineConfig>,
}

impl BaselineStrategy {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }
}

impl ScoringStrategy for BaselineStrategy {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn score(&self, features: &FeatureVector, history: &RouteHistory) -> Score {
        let cfg = &self.config;

        let mut index = match &history.pattern {
            Some(pattern) => {
                let ratio = if pattern.avg_vehicle_count > 0.0 {
                    features.vehicle_count as f64 / pattern.avg_vehicle_count
                } else {
                    1.0
                };
                let ratio = ratio.clamp(cfg.vehicle_ratio_floor, cfg.vehicle_ratio_ceil);
                pattern.avg_congestion * (1.0 + cfg.vehicle_sensitivity * (ratio - 1.0))
            }
            None => history.route_average.unwrap_or(cfg.default_congestion),
        };

        if features.is_rush_hour {
            index += cfg.rush_hour_bias;
        }
        if features.is_weekend {
            index += cfg.weekend_bias;
        }
        let index = index.clamp(0.0, 100.0);

        let confidence = match &history.pattern {
            Some(pattern) => {
                let n = pattern.sample_count as f64;
                let support = n / (n + cfg.confidence_pivot);
                let age_hours = history
                    .newest_sample_at
                    .map(|newest| {
                        ((newest - pattern.last_sample_at).num_minutes() as f64 / 60.0).max(0.0)
                    })
                    .unwrap_or(0.0);
                let freshness = 0.5_f64.powf(age_hours / cfg.freshness_half_life_hours);
                support * freshness
            }
            None => 0.0,
        };

        Score {
            congestion_index: round2(index),
            confidence: round4(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::types::HourlyPattern;
    use crate::classify::CongestionLevel;
    use chrono::{DateTime, TimeZone, Utc};

    fn pattern(avg_congestion: f64, avg_vehicles: f64, count: usize) -> HourlyPattern {
        HourlyPattern {
            route_id: "R1".into(),
            hour: 8,
            avg_speed: 25.0,
            avg_congestion,
            avg_vehicle_count: avg_vehicles,
            sample_count: count,
            last_sample_at: base_ts(),
            congestion_level: CongestionLevel::Medium,
        }
    }

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap()
    }

    fn features(vehicle_count: u64) -> FeatureVector {
        FeatureVector {
            hour: 8,
            day_of_week: 1,
            vehicle_count,
            is_weekend: false,
            is_rush_hour: false,
        }
    }

    fn strategy() -> BaselineStrategy {
        BaselineStrategy::new(Arc::new(EngineConfig::default()))
    }

    #[test]
    fn test_matching_vehicle_count_returns_pattern_average() {
        let history = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: Some(55.0),
            newest_sample_at: Some(base_ts()),
        };

        let score = strategy().score(&features(80), &history);
        assert_eq!(score.congestion_index, 60.0);
        assert!(score.confidence > 0.0);
    }

    #[test]
    fn test_higher_vehicle_count_pushes_estimate_up() {
        let history = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };

        let low = strategy().score(&features(40), &history);
        let base = strategy().score(&features(80), &history);
        let high = strategy().score(&features(160), &history);
        assert!(low.congestion_index < base.congestion_index);
        assert!(high.congestion_index > base.congestion_index);
        assert!(high.congestion_index <= 100.0);
    }

    #[test]
    fn test_rush_hour_bias_is_additive() {
        let history = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };

        let calm = strategy().score(&features(80), &history);
        let mut rush = features(80);
        rush.is_rush_hour = true;
        let rushed = strategy().score(&rush, &history);
        assert_eq!(
            rushed.congestion_index,
            calm.congestion_index + EngineConfig::default().rush_hour_bias
        );
    }

    #[test]
    fn test_weekend_bias_lowers_estimate() {
        let history = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };

        let mut weekend = features(80);
        weekend.is_weekend = true;
        let scored = strategy().score(&weekend, &history);
        assert!(scored.congestion_index < 60.0);
    }

    #[test]
    fn test_index_clamped_to_valid_range() {
        let history = RouteHistory {
            pattern: Some(pattern(98.0, 10.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };

        let mut f = features(1000);
        f.is_rush_hour = true;
        let score = strategy().score(&f, &history);
        assert_eq!(score.congestion_index, 100.0);
    }

    #[test]
    fn test_no_pattern_falls_back_with_zero_confidence() {
        let history = RouteHistory {
            pattern: None,
            route_average: Some(42.0),
            newest_sample_at: Some(base_ts()),
        };

        let score = strategy().score(&features(80), &history);
        assert_eq!(score.congestion_index, 42.0);
        assert_eq!(score.confidence, 0.0);
    }

    #[test]
    fn test_no_history_at_all_uses_default_congestion() {
        let history = RouteHistory {
            pattern: None,
            route_average: None,
            newest_sample_at: None,
        };

        let score = strategy().score(&features(80), &history);
        assert_eq!(
            score.congestion_index,
            EngineConfig::default().default_congestion
        );
        assert_eq!(score.confidence, 0.0);
    }

    #[test]
    fn test_confidence_grows_with_sample_count() {
        let thin = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 5)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };
        let thick = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 500)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };

        let a = strategy().score(&features(80), &thin);
        let b = strategy().score(&features(80), &thick);
        assert!(b.confidence > a.confidence);
        assert!(b.confidence <= 1.0);
    }

    #[test]
    fn test_confidence_decays_with_staleness() {
        let fresh = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts()),
        };
        let stale = RouteHistory {
            pattern: Some(pattern(60.0, 80.0, 40)),
            route_average: None,
            newest_sample_at: Some(base_ts() + chrono::TimeDelta::hours(96)),
        };

        let a = strategy().score(&features(80), &fresh);
        let b = strategy().score(&features(80), &stale);
        assert!(b.confidence < a.confidence);
    }

    #[test]
    fn test_identical_inputs_score_bit_identically() {
        let history = RouteHistory {
            pattern: Some(pattern(61.37, 83.2, 41)),
            route_average: Some(55.0),
            newest_sample_at: Some(base_ts() + chrono::TimeDelta::hours(7)),
        };

        let a = strategy().score(&features(97), &history);
        let b = strategy().score(&features(97), &history);
        assert_eq!(a.congestion_index.to_bits(), b.congestion_index.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }
}
