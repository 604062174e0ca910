//! Short-TTL prediction cache.
//!
//! Entries are keyed by `(route_id, hour, day_of_week)` and only served when
//! the input features match, the entry is younger than the TTL, and the
//! backing pattern fingerprint is unchanged. Newer samples for the same
//! `(route, hour)` bucket change the fingerprint and therefore invalidate
//! the entry; predictions are never treated as ground truth.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::predict::types::{FeatureVector, Prediction};

pub type CacheKey = (String, u8, u8);

/// `(sample_count, last_sample_at)` of the rollup cell a prediction was
/// computed from; `None` when no pattern backed it.
pub type PatternFingerprint = Option<(usize, DateTime<Utc>)>;

struct CacheEntry {
    prediction: Prediction,
    features: FeatureVector,
    fingerprint: PatternFingerprint,
    cached_at: Instant,
}

pub struct PredictionCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl PredictionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached prediction for the key when still valid for the
    /// given features and pattern state.
    pub fn get(
        &self,
        key: &CacheKey,
        features: &FeatureVector,
        fingerprint: &PatternFingerprint,
    ) -> Option<Prediction> {
        let entries = self.entries.lock().expect("prediction cache lock poisoned");
        let entry = entries.get(key)?;

        if entry.cached_at.elapsed() >= self.ttl
            || entry.features != *features
            || entry.fingerprint != *fingerprint
        {
            return None;
        }
        trace!(route_id = %key.0, hour = key.1, "Prediction cache hit");
        Some(entry.prediction.clone())
    }

    pub fn put(
        &self,
        key: CacheKey,
        features: FeatureVector,
        fingerprint: PatternFingerprint,
        prediction: Prediction,
    ) {
        let mut entries = self.entries.lock().expect("prediction cache lock poisoned");
        entries.insert(
            key,
            CacheEntry {
                prediction,
                features,
                fingerprint,
                cached_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CongestionLevel;
    use crate::predict::types::PredictionContext;

    fn features() -> FeatureVector {
        FeatureVector {
            hour: 8,
            day_of_week: 1,
            vehicle_count: 80,
            is_weekend: false,
            is_rush_hour: true,
        }
    }

    fn prediction() -> Prediction {
        Prediction {
            route_id: "R1".into(),
            prediction_time: Utc::now(),
            predicted_for: PredictionContext {
                hour: 8,
                day_of_week: 1,
            },
            congestion_index: 62.5,
            congestion_level: CongestionLevel::Medium,
            confidence: 0.58,
            factors: features(),
        }
    }

    #[test]
    fn test_hit_requires_matching_features_and_fingerprint() {
        let cache = PredictionCache::new(Duration::from_secs(60));
        let key: CacheKey = ("R1".into(), 8, 1);
        let fp: PatternFingerprint = Some((10, Utc::now()));

        cache.put(key.clone(), features(), fp, prediction());

        assert!(cache.get(&key, &features(), &fp).is_some());

        // Different vehicle count: a different prediction, not a hit.
        let mut other = features();
        other.vehicle_count = 200;
        assert!(cache.get(&key, &other, &fp).is_none());

        // Newer samples changed the backing pattern: invalidated.
        let newer: PatternFingerprint = Some((11, Utc::now()));
        assert!(cache.get(&key, &features(), &newer).is_none());
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = PredictionCache::new(Duration::ZERO);
        let key: CacheKey = ("R1".into(), 8, 1);

        cache.put(key.clone(), features(), None, prediction());
        assert!(cache.get(&key, &features(), &None).is_none());
    }
}
