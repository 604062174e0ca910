//! The aggregation engine: windowed views over the sample store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::analytics::rollup::RollupCache;
use crate::analytics::types::{
    DailyStat, HourlyPattern, RouteComparison, TrafficSummary, TrendBucket,
};
use crate::analytics::utility::{mean, truncate_to_hour};
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::registry::RouteRegistry;
use crate::store::{SampleStore, SampleView};

/// Computes summary, trend, heatmap, comparison, hourly-pattern, and
/// daily-stats views. Short windows scan raw samples; unbounded-history
/// views read the materialized rollup set.
///
/// Every public method is bounded by the configured query timeout and fails
/// with [`Error::Timeout`] instead of returning partial results. Windowed
/// methods have `*_at` variants taking an explicit reference instant; the
/// plain forms evaluate at the current time.
pub struct AggregationEngine {
    store: Arc<SampleStore>,
    registry: Arc<dyn RouteRegistry>,
    rollups: Arc<RollupCache>,
    config: Arc<EngineConfig>,
}

impl AggregationEngine {
    pub fn new(
        store: Arc<SampleStore>,
        registry: Arc<dyn RouteRegistry>,
        rollups: Arc<RollupCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            rollups,
            config,
        }
    }

    /// Rebuilds the rollup set synchronously. One-shot callers (CLI, tests)
    /// use this instead of waiting for the background refresher.
    pub fn refresh_rollups(&self) {
        self.rollups.refresh(&self.store, &self.config.thresholds);
    }

    /// Rolling summary over the trailing `window_hours`.
    pub async fn summary(&self, window_hours: i64) -> Result<TrafficSummary> {
        self.bounded(async { Ok(self.summary_at(Utc::now(), window_hours)) })
            .await
    }

    /// Summary relative to an explicit reference instant. Zero in-window
    /// samples yield zero counts and `None` averages, never an error.
    pub fn summary_at(&self, now: DateTime<Utc>, window_hours: i64) -> TrafficSummary {
        let samples = self.store.window(None, window_hours, now);

        let routes: HashSet<&str> = samples.iter().map(|s| s.route_id.as_str()).collect();
        let speeds: Vec<f64> = samples.iter().map(|s| s.avg_speed).collect();
        let congestion: Vec<f64> = samples.iter().map(|s| s.congestion_index).collect();

        let overall_congestion = (!congestion.is_empty()).then(|| mean(&congestion));
        TrafficSummary {
            total_routes: routes.len(),
            total_data_points: samples.len(),
            overall_avg_speed: (!speeds.is_empty()).then(|| mean(&speeds)),
            overall_congestion,
            congestion_level: overall_congestion.map(|c| classify(c, &self.config.thresholds)),
        }
    }

    /// Hour-aligned trend buckets over the trailing `window_hours`.
    pub async fn trends(&self, window_hours: i64) -> Result<Vec<TrendBucket>> {
        self.bounded(async { self.trends_at(Utc::now(), window_hours) })
            .await
    }

    /// Trend buckets relative to an explicit reference instant.
    ///
    /// The window starts at the hour boundary `window_hours - 1` hours
    /// before `now`'s hour, so the result covers the current (partial) hour
    /// plus the preceding full hours and never exceeds `window_hours`
    /// buckets. Empty buckets are omitted; order is bucket start ascending.
    pub fn trends_at(&self, now: DateTime<Utc>, window_hours: i64) -> Result<Vec<TrendBucket>> {
        if window_hours < 1 {
            return Err(Error::Validation(format!(
                "window must be at least one hour, got {window_hours}"
            )));
        }

        let start = truncate_to_hour(now) - TimeDelta::hours(window_hours - 1);
        let samples = self.store.query_since(None, start);

        let mut buckets: BTreeMap<DateTime<Utc>, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for sample in &samples {
            let bucket = buckets
                .entry(truncate_to_hour(sample.timestamp))
                .or_default();
            bucket.0.push(sample.avg_speed);
            bucket.1.push(sample.congestion_index);
        }

        Ok(buckets
            .into_iter()
            .map(|(bucket_start, (speeds, congestion))| {
                let avg_congestion = mean(&congestion);
                TrendBucket {
                    bucket_start,
                    avg_speed: mean(&speeds),
                    avg_congestion,
                    data_points: speeds.len(),
                    congestion_level: classify(avg_congestion, &self.config.thresholds),
                }
            })
            .collect())
    }

    /// Historical `(route, hour-of-day)` congestion heatmap, optionally
    /// restricted to one route. Served from the materialized rollup set.
    pub async fn heatmap(&self, route_id: Option<&str>) -> Result<Vec<HourlyPattern>> {
        self.bounded(async { Ok(self.rollups.current().patterns(route_id)) })
            .await
    }

    /// Hourly patterns are the same rollup as the heatmap, exposed under a
    /// second access pattern.
    pub async fn hourly_patterns(&self, route_id: Option<&str>) -> Result<Vec<HourlyPattern>> {
        self.heatmap(route_id).await
    }

    /// In-window averages for the requested routes, joined with registry
    /// names. Routes without in-window samples are excluded. Ordered by
    /// average congestion descending, ties broken alphabetically by name.
    pub async fn compare(&self, route_ids: &[String], window_hours: i64) -> Result<Vec<RouteComparison>> {
        self.bounded(self.compare_at(Utc::now(), route_ids, window_hours))
            .await
    }

    /// Comparison relative to an explicit reference instant.
    pub async fn compare_at(
        &self,
        now: DateTime<Utc>,
        route_ids: &[String],
        window_hours: i64,
    ) -> Result<Vec<RouteComparison>> {
        if route_ids.is_empty() {
            return Err(Error::Validation("route_ids must not be empty".into()));
        }

        let mut rows = Vec::new();
        for route_id in route_ids {
            let Some(route) = self.registry.get(route_id).await? else {
                debug!(route_id, "Skipping unknown route in comparison");
                continue;
            };

            let samples = self.store.window(Some(route_id), window_hours, now);
            if samples.is_empty() {
                continue;
            }

            let speeds: Vec<f64> = samples.iter().map(|s| s.avg_speed).collect();
            let congestion: Vec<f64> = samples.iter().map(|s| s.congestion_index).collect();
            let avg_congestion = mean(&congestion);

            rows.push(RouteComparison {
                route_id: route_id.clone(),
                route_name: route.name,
                avg_speed: mean(&speeds),
                avg_congestion,
                data_points: samples.len(),
                congestion_level: classify(avg_congestion, &self.config.thresholds),
            });
        }

        rows.sort_by(|a, b| {
            b.avg_congestion
                .partial_cmp(&a.avg_congestion)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.route_name.cmp(&b.route_name))
        });
        Ok(rows)
    }

    /// The most recent `limit` calendar-day rollups for a route, date
    /// descending.
    pub async fn daily_stats(&self, route_id: &str, limit: usize) -> Result<Vec<DailyStat>> {
        self.bounded(async {
            if self.registry.get(route_id).await?.is_none() {
                return Err(Error::NotFound(route_id.to_string()));
            }
            Ok(self.rollups.current().daily_stats(route_id, limit))
        })
        .await
    }

    /// The latest sample per route with its congestion level recomputed.
    pub async fn live(&self) -> Result<Vec<SampleView>> {
        self.bounded(async {
            Ok(self
                .store
                .latest_per_route()
                .iter()
                .map(|s| s.view(&self.config.thresholds))
                .collect())
        })
        .await
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.query_timeout)),
        }
    }
}
