//! Materialized rollups.
//!
//! Heatmap, hourly-pattern, and daily-stats views span unbounded history, so
//! they are served from a precomputed [`RollupSet`] instead of rescanning
//! every retained sample per request. A background task rebuilds the set
//! periodically against the latest committed store state; readers always see
//! a complete set (the cache swaps whole `Arc`s) which may lag ingestion by
//! at most one refresh interval.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tracing::{debug, info_span};

use crate::classify::classify;
use crate::config::ClassifierThresholds;
use crate::analytics::types::{DailyStat, HourlyPattern};
use crate::store::SampleStore;

#[derive(Default)]
struct CellAcc {
    speed_sum: f64,
    congestion_sum: f64,
    vehicle_sum: f64,
    count: usize,
    last_sample_at: Option<DateTime<Utc>>,
}

impl CellAcc {
    fn push(&mut self, speed: f64, congestion: f64, vehicles: u64, ts: DateTime<Utc>) {
        self.speed_sum += speed;
        self.congestion_sum += congestion;
        self.vehicle_sum += vehicles as f64;
        self.count += 1;
        self.last_sample_at = Some(self.last_sample_at.map_or(ts, |prev| prev.max(ts)));
    }
}

/// A complete, internally consistent set of materialized aggregates.
pub struct RollupSet {
    hourly: BTreeMap<(String, u8), HourlyPattern>,
    daily: BTreeMap<(String, NaiveDate), DailyStat>,
    /// The newest sample timestamp anywhere in the store at build time.
    /// Used as the staleness reference for prediction confidence, so that
    /// confidence depends only on the sample set, not on wall-clock time.
    pub newest_sample_at: Option<DateTime<Utc>>,
    /// Store sequence number the set was built from.
    pub store_version: u64,
    pub refreshed_at: DateTime<Utc>,
}

impl RollupSet {
    /// An empty set, the state before the first refresh.
    pub fn empty() -> Self {
        Self {
            hourly: BTreeMap::new(),
            daily: BTreeMap::new(),
            newest_sample_at: None,
            store_version: 0,
            refreshed_at: Utc::now(),
        }
    }

    /// Scans every retained sample and groups by `(route, hour-of-day)` and
    /// `(route, calendar day)`.
    pub fn build(store: &SampleStore, thresholds: &ClassifierThresholds) -> Self {
        let span = info_span!("rollup_build");
        let _guard = span.enter();

        let store_version = store.version();
        let samples = store.all();

        let mut hourly_acc: BTreeMap<(String, u8), CellAcc> = BTreeMap::new();
        let mut daily_acc: BTreeMap<(String, NaiveDate), CellAcc> = BTreeMap::new();
        let mut newest_sample_at: Option<DateTime<Utc>> = None;

        for sample in &samples {
            let hour = sample.timestamp.hour() as u8;
            hourly_acc
                .entry((sample.route_id.clone(), hour))
                .or_default()
                .push(
                    sample.avg_speed,
                    sample.congestion_index,
                    sample.vehicle_count,
                    sample.timestamp,
                );
            daily_acc
                .entry((sample.route_id.clone(), sample.timestamp.date_naive()))
                .or_default()
                .push(
                    sample.avg_speed,
                    sample.congestion_index,
                    sample.vehicle_count,
                    sample.timestamp,
                );
            newest_sample_at =
                Some(newest_sample_at.map_or(sample.timestamp, |prev| prev.max(sample.timestamp)));
        }

        let hourly = hourly_acc
            .into_iter()
            .map(|((route_id, hour), acc)| {
                let avg_congestion = acc.congestion_sum / acc.count as f64;
                let pattern = HourlyPattern {
                    route_id: route_id.clone(),
                    hour,
                    avg_speed: acc.speed_sum / acc.count as f64,
                    avg_congestion,
                    avg_vehicle_count: acc.vehicle_sum / acc.count as f64,
                    sample_count: acc.count,
                    last_sample_at: acc.last_sample_at.expect("non-empty cell"),
                    congestion_level: classify(avg_congestion, thresholds),
                };
                ((route_id, hour), pattern)
            })
            .collect();

        let daily = daily_acc
            .into_iter()
            .map(|((route_id, date), acc)| {
                let stat = DailyStat {
                    route_id: route_id.clone(),
                    date,
                    avg_speed: acc.speed_sum / acc.count as f64,
                    avg_congestion: acc.congestion_sum / acc.count as f64,
                    sample_count: acc.count,
                };
                ((route_id, date), stat)
            })
            .collect();

        debug!(
            samples = samples.len(),
            store_version, "Rollup set materialized"
        );

        Self {
            hourly,
            daily,
            newest_sample_at,
            store_version,
            refreshed_at: Utc::now(),
        }
    }

    /// The pattern cell for one `(route, hour)`, if any sample ever fell in
    /// that hour.
    pub fn pattern(&self, route_id: &str, hour: u8) -> Option<&HourlyPattern> {
        self.hourly.get(&(route_id.to_string(), hour))
    }

    /// Pattern rows, optionally restricted to one route, ordered by
    /// `route_id` then `hour`.
    pub fn patterns(&self, route_id: Option<&str>) -> Vec<HourlyPattern> {
        self.hourly
            .values()
            .filter(|p| route_id.is_none_or(|rid| p.route_id == rid))
            .cloned()
            .collect()
    }

    /// Sample-count-weighted average congestion across every hour of one
    /// route. The prediction fallback when a specific hour has no history.
    pub fn route_average_congestion(&self, route_id: &str) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0usize;
        for p in self.hourly.values().filter(|p| p.route_id == route_id) {
            weighted += p.avg_congestion * p.sample_count as f64;
            total += p.sample_count;
        }
        (total > 0).then(|| weighted / total as f64)
    }

    /// The most recent `limit` daily rollups for a route, date descending.
    pub fn daily_stats(&self, route_id: &str, limit: usize) -> Vec<DailyStat> {
        self.daily
            .values()
            .filter(|d| d.route_id == route_id)
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Shared handle to the latest rollup set. Readers clone the inner `Arc`
/// and never block a refresh; a refresh swaps the whole set in one store.
pub struct RollupCache {
    current: RwLock<Arc<RollupSet>>,
}

impl RollupCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RollupSet::empty())),
        }
    }

    pub fn current(&self) -> Arc<RollupSet> {
        self.current
            .read()
            .expect("rollup cache lock poisoned")
            .clone()
    }

    /// Rebuilds from the latest committed store state and swaps the set in.
    pub fn refresh(&self, store: &SampleStore, thresholds: &ClassifierThresholds) -> Arc<RollupSet> {
        let fresh = Arc::new(RollupSet::build(store, thresholds));
        let mut slot = self.current.write().expect("rollup cache lock poisoned");
        *slot = fresh.clone();
        fresh
    }
}

impl Default for RollupCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the periodic refresh task, decoupled from request handling.
/// Skips the rebuild when the store has not changed since the last set.
pub fn spawn_refresher(
    store: Arc<SampleStore>,
    cache: Arc<RollupCache>,
    thresholds: ClassifierThresholds,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cache.current().store_version != store.version() {
                cache.refresh(&store, &thresholds);
            }
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Route, StaticRegistry};
    use crate::store::SampleDraft;
    use chrono::TimeZone;

    async fn seeded_store() -> Arc<SampleStore> {
        let registry = Arc::new(StaticRegistry::new(vec![
            Route {
                route_id: "R1".into(),
                name: "Main St".into(),
                start_lat: None,
                start_lng: None,
                end_lat: None,
                end_lng: None,
                distance_km: None,
            },
            Route {
                route_id: "R2".into(),
                name: "Bypass".into(),
                start_lat: None,
                start_lng: None,
                end_lat: None,
                end_lng: None,
                distance_km: None,
            },
        ]));
        let store = Arc::new(SampleStore::new(registry));

        // Two days of route R1 data at hour 8, one cell for R2 at hour 9.
        for (day, speed, index, vehicles) in
            [(6, 20.0, 80.0, 100u64), (7, 30.0, 60.0, 60)]
        {
            store
                .ingest(SampleDraft {
                    route_id: Some("R1".into()),
                    timestamp: Some(Utc.with_ymd_and_hms(2024, 5, day, 8, 0, 0).unwrap()),
                    avg_speed: Some(speed),
                    vehicle_count: Some(vehicles),
                    congestion_index: Some(index),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        store
            .ingest(SampleDraft {
                route_id: Some("R2".into()),
                timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 7, 9, 0, 0).unwrap()),
                avg_speed: Some(50.0),
                vehicle_count: Some(20),
                congestion_index: Some(10.0),
                ..Default::default()
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_build_hourly_patterns() {
        let store = seeded_store().await;
        let set = RollupSet::build(&store, &ClassifierThresholds::default());

        let p = set.pattern("R1", 8).unwrap();
        assert_eq!(p.sample_count, 2);
        assert_eq!(p.avg_speed, 25.0);
        assert_eq!(p.avg_congestion, 70.0);
        assert_eq!(p.avg_vehicle_count, 80.0);
        assert_eq!(
            p.last_sample_at,
            Utc.with_ymd_and_hms(2024, 5, 7, 8, 0, 0).unwrap()
        );

        assert!(set.pattern("R1", 9).is_none());
        assert!(set.pattern("R2", 9).is_some());
    }

    #[tokio::test]
    async fn test_patterns_ordered_by_route_then_hour() {
        let store = seeded_store().await;
        let set = RollupSet::build(&store, &ClassifierThresholds::default());

        let rows = set.patterns(None);
        let keys: Vec<_> = rows.iter().map(|p| (p.route_id.clone(), p.hour)).collect();
        assert_eq!(keys, vec![("R1".to_string(), 8), ("R2".to_string(), 9)]);

        let only_r2 = set.patterns(Some("R2"));
        assert_eq!(only_r2.len(), 1);
        assert_eq!(only_r2[0].route_id, "R2");
    }

    #[tokio::test]
    async fn test_daily_stats_date_descending_with_limit() {
        let store = seeded_store().await;
        let set = RollupSet::build(&store, &ClassifierThresholds::default());

        let stats = set.daily_stats("R1", 7);
        assert_eq!(stats.len(), 2);
        assert!(stats[0].date > stats[1].date);

        let limited = set.daily_stats("R1", 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].date, stats[0].date);
    }

    #[tokio::test]
    async fn test_route_average_congestion_weighted() {
        let store = seeded_store().await;
        let set = RollupSet::build(&store, &ClassifierThresholds::default());

        // R1 has a single cell, so the weighted average equals the cell's.
        assert_eq!(set.route_average_congestion("R1"), Some(70.0));
        assert_eq!(set.route_average_congestion("R9"), None);
    }

    #[tokio::test]
    async fn test_cache_swaps_on_refresh() {
        let store = seeded_store().await;
        let cache = RollupCache::new();
        assert!(cache.current().newest_sample_at.is_none());

        cache.refresh(&store, &ClassifierThresholds::default());
        let set = cache.current();
        assert_eq!(set.store_version, store.version());
        assert!(set.newest_sample_at.is_some());
    }
}
