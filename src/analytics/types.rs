//! Data types produced by the aggregation engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::classify::CongestionLevel;

/// Rolling summary over the trailing window. Averages are `None` when no
/// samples fall inside the window; that is a valid answer, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSummary {
    pub total_routes: usize,
    pub total_data_points: usize,
    pub overall_avg_speed: Option<f64>,
    pub overall_congestion: Option<f64>,
    pub congestion_level: Option<CongestionLevel>,
}

/// One hour-aligned trend bucket. Buckets with zero samples are omitted
/// from results rather than zero-filled.
#[derive(Debug, Clone, Serialize)]
pub struct TrendBucket {
    pub bucket_start: DateTime<Utc>,
    pub avg_speed: f64,
    pub avg_congestion: f64,
    pub data_points: usize,
    pub congestion_level: CongestionLevel,
}

/// Historical average for one `(route, hour-of-day)` cell. The canonical
/// rollup behind both the heatmap and the hourly-pattern view, and the
/// lookup the prediction baseline consults.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyPattern {
    pub route_id: String,
    pub hour: u8,
    pub avg_speed: f64,
    pub avg_congestion: f64,
    pub avg_vehicle_count: f64,
    pub sample_count: usize,
    pub last_sample_at: DateTime<Utc>,
    pub congestion_level: CongestionLevel,
}

/// In-window averages for one route, joined with its registry name.
#[derive(Debug, Clone, Serialize)]
pub struct RouteComparison {
    pub route_id: String,
    pub route_name: String,
    pub avg_speed: f64,
    pub avg_congestion: f64,
    pub data_points: usize,
    pub congestion_level: CongestionLevel,
}

/// One calendar-day rollup for a route.
#[derive(Debug, Clone, Serialize)]
pub struct DailyStat {
    pub route_id: String,
    pub date: NaiveDate,
    pub avg_speed: f64,
    pub avg_congestion: f64,
    pub sample_count: usize,
}
